//! Duty registry: one `DutyState` per schedule, created on first use.
//!
//! The map itself sits behind a short-lived std mutex; each state has its own
//! async lock, so a slow schedule never holds up another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use relay_core::types::RosterSnapshot;

use crate::diff::Transition;
use crate::state::DutyState;

/// Shared handle to one schedule's state.
pub type SharedState = Arc<tokio::sync::Mutex<DutyState>>;

#[derive(Default)]
pub struct DutyRegistry {
    entries: Mutex<HashMap<String, SharedState>>,
}

impl DutyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for `name`, created empty if this is the first request.
    pub fn get(&self, name: &str) -> SharedState {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(DutyState::new(name))))
            .clone()
    }

    /// Atomically record `snapshot` for `name` and return the transition.
    pub async fn record(&self, name: &str, snapshot: RosterSnapshot) -> Transition {
        let state = self.get(name);
        let mut state = state.lock().await;
        state.record_and_diff(snapshot)
    }

    /// Latest snapshot recorded for `name`, if any.
    pub async fn current(&self, name: &str) -> Option<RosterSnapshot> {
        let state = {
            let entries = self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entries.get(name).cloned()
        }?;
        let state = state.lock().await;
        state.peek().ok().cloned()
    }

    /// Names of all schedules seen so far.
    pub fn schedules(&self) -> Vec<String> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(members: &[&str]) -> RosterSnapshot {
        RosterSnapshot::new("S", "s", members.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn test_get_creates_lazily_and_reuses() {
        let reg = DutyRegistry::new();
        assert!(reg.schedules().is_empty());

        let a = reg.get("primary");
        let b = reg.get("primary");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.schedules(), vec!["primary"]);
        assert!(a.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_schedules_are_independent() {
        let reg = DutyRegistry::new();
        reg.record("primary", snap(&["alice"])).await;
        reg.record("secondary", snap(&["bob"])).await;

        let t = reg.record("primary", snap(&["carol"])).await;
        assert_eq!(t.started, vec!["carol"]);
        assert_eq!(t.ended, vec!["alice"]);

        let t = reg.record("secondary", snap(&["bob"])).await;
        assert!(t.is_empty());
    }

    #[tokio::test]
    async fn test_locked_schedule_does_not_block_others() {
        let reg = Arc::new(DutyRegistry::new());
        let held = reg.get("slow");
        let _guard = held.lock().await;

        let t = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            reg.record("fast", snap(&["alice"])),
        )
        .await;
        assert!(t.is_ok(), "other schedules must not wait on a held lock");
    }

    #[tokio::test]
    async fn test_concurrent_records_are_serialized() {
        let reg = Arc::new(DutyRegistry::new());
        reg.record("primary", snap(&[])).await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let reg = reg.clone();
            handles.push(tokio::spawn(async move {
                let members: Vec<String> = (0..=i).map(|n| format!("u{n}")).collect();
                reg.record("primary", RosterSnapshot::new("S", "s", members)).await
            }));
        }
        let mut started_total = 0i64;
        let mut ended_total = 0i64;
        for h in handles {
            let t = h.await.unwrap();
            started_total += t.started.len() as i64;
            ended_total += t.ended.len() as i64;
        }
        // Every snapshot was diffed against exactly one predecessor, so the
        // net change equals the size of whichever roster landed last.
        let last = reg.current("primary").await.unwrap();
        assert_eq!(started_total - ended_total, last.len() as i64);
    }
}
