//! Unified error types for DutyRelay.

use thiserror::Error;

/// Result type alias using RelayError.
pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    // Roster errors
    #[error("Schedule fetch failed: {0}")]
    Fetch(String),

    #[error("Schedule roster is empty: {0}")]
    EmptyRoster(String),

    #[error("Duty state is empty: {0}")]
    EmptyState(String),

    // Identity errors
    #[error("User not found: {0}")]
    IdentityNotFound(String),

    #[error("Phone number not verified for user: {0}")]
    PhoneNotVerified(String),

    #[error("Directory error: {0}")]
    Directory(String),

    // Inbound request errors
    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    #[error("Message text is empty")]
    EmptyMessage,

    // Delivery errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Notification queue is full ({0} pending)")]
    QueueFull(usize),

    #[error("Notification queue is closed")]
    QueueClosed,

    #[error("Audit store error: {0}")]
    Audit(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl RelayError {
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn directory(msg: impl Into<String>) -> Self {
        Self::Directory(msg.into())
    }

    pub fn audit(msg: impl Into<String>) -> Self {
        Self::Audit(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Stable machine-readable code, returned to inbound notify callers.
    /// Internal failures collapse into `internal-error` so their details never leak.
    pub fn kind_code(&self) -> &'static str {
        match self {
            Self::IdentityNotFound(_) => "user-not-found",
            Self::PhoneNotVerified(_) => "phonenumber-not-verified",
            Self::InvalidEmail(_) => "invalid-email",
            Self::EmptyMessage => "empty-message-text",
            Self::QueueFull(_) => "queue-full",
            Self::QueueClosed => "shutting-down",
            Self::Transport(_) => "delivery-failed",
            _ => "internal-error",
        }
    }
}
