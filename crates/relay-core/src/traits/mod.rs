//! Collaborator traits consumed by the duty tracker and the dispatcher.

pub mod audit;
pub mod directory;
pub mod source;
pub mod transport;

pub use audit::AuditStore;
pub use directory::IdentityDirectory;
pub use source::ScheduleSource;
pub use transport::{CallbackClient, Transport};
