//! Roster snapshot: who is on duty for one schedule at one instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::TransportKind;

/// How transitions of a schedule are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub transport: TransportKind,
    /// Required when `transport` is `Callback`.
    #[serde(default)]
    pub callback_url: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Sms,
            callback_url: None,
        }
    }
}

/// Point-in-time membership of a schedule.
///
/// Members are kept in source order and may repeat: one person can hold
/// several overlapping shift slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub schedule_id: String,
    pub name: String,
    pub time_zone: String,
    pub members: Vec<String>,
    pub delivery: DeliveryConfig,
    pub fetched_at: DateTime<Utc>,
}

impl RosterSnapshot {
    pub fn new(schedule_id: &str, name: &str, members: Vec<String>) -> Self {
        Self {
            schedule_id: schedule_id.to_string(),
            name: name.to_string(),
            time_zone: "UTC".into(),
            members,
            delivery: DeliveryConfig::default(),
            fetched_at: Utc::now(),
        }
    }

    pub fn with_time_zone(mut self, time_zone: &str) -> Self {
        self.time_zone = time_zone.to_string();
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryConfig) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_builder() {
        let snap = RosterSnapshot::new("S1", "primary", vec!["alice".into(), "alice".into()])
            .with_time_zone("Europe/Moscow");
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.time_zone, "Europe/Moscow");
        assert_eq!(snap.delivery.transport, TransportKind::Sms);
        assert!(!snap.is_empty());
    }
}
