//! # DutyRelay Roster
//!
//! Tracks who is on duty and notices when that changes.
//!
//! ```text
//! ScheduleSource ──snapshot──▶ DutyRegistry ──diff──▶ Transition
//!   (OnCall API)                (DutyState per          │
//!                                schedule, depth 2)     ▼
//!                                               Dispatcher::enqueue
//! ```
//!
//! The [`SchedulePoller`] drives the loop on a fixed interval.

pub mod diff;
pub mod oncall;
pub mod poller;
pub mod registry;
pub mod state;

pub use diff::{Transition, diff};
pub use oncall::OnCallApiSource;
pub use poller::{CycleReport, PollerStats, SchedulePoller};
pub use registry::DutyRegistry;
pub use state::DutyState;
