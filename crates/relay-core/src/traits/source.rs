//! Schedule source: supplies the current roster of a schedule.

use async_trait::async_trait;

use crate::config::ScheduleConfig;
use crate::error::Result;
use crate::types::RosterSnapshot;

/// Fetches a fresh roster snapshot for a configured schedule.
///
/// Implementations must be idempotent and side-effect free. Failures are
/// reported as `RelayError::Fetch`; the poller applies its own timeout on top.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    fn name(&self) -> &str;

    async fn current(&self, schedule: &ScheduleConfig) -> Result<RosterSnapshot>;
}
