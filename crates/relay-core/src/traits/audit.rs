//! Audit persistence.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::AuditRecord;

/// Appends delivery outcomes to durable storage.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;
}
