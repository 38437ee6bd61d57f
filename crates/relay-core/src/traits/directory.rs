//! Authoritative user directory.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Identity, IdentityKey};

/// Looks users up by id or email.
///
/// Unknown users yield `RelayError::IdentityNotFound`, storage failures
/// `RelayError::Directory`.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn lookup(&self, key: &IdentityKey) -> Result<Identity>;
}
