//! # DutyRelay Notify
//!
//! Everything between "someone should be told" and "it was written down":
//!
//! - [`dispatcher`]: bounded queue and worker pool
//! - [`identity`]: directory lookups with a last-known-good cache
//! - [`transport`] / [`callback`]: outbound delivery
//! - [`audit`]: non-blocking audit sink and the SQLite `events` store
//! - [`directory`]: SQLite user directory
//! - [`template`]: notification text helpers

pub mod audit;
pub mod callback;
pub mod directory;
pub mod dispatcher;
pub mod identity;
pub mod template;
pub mod transport;

pub use audit::{AuditSink, AuditStats, AuditWriter, SqliteAuditStore};
pub use callback::HttpCallbackClient;
pub use directory::{DirectoryUser, ImportReport, SqliteDirectory};
pub use dispatcher::{DeliveryContext, DispatchStats, DispatchWorker, Dispatcher};
pub use identity::IdentityResolver;
pub use template::IncidentContext;
pub use transport::{LogTransport, RestTransport};
