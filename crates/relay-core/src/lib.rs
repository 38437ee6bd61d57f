//! # DutyRelay Core
//!
//! Shared types, collaborator traits, configuration and errors for the
//! duty tracker (`relay-roster`), the notification pipeline (`relay-notify`)
//! and the HTTP gateway (`relay-gateway`).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
