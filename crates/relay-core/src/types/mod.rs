pub mod audit;
pub mod event;
pub mod identity;
pub mod roster;

pub use audit::{AuditRecord, MAX_AUDIT_MESSAGE_CHARS};
pub use event::{
    CallbackPayload, Channel, Delivery, EventOrigin, NotificationEvent, Recipient,
    TransitionKind, TransportKind,
};
pub use identity::{Identity, IdentityKey};
pub use roster::{DeliveryConfig, RosterSnapshot};
