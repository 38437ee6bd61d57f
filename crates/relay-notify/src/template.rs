//! Notification text helpers.

use serde::Deserialize;

/// Inserted before this marker when an alert message names its channel.
const CHANNEL_MARKER: &str = ", alert channel";

/// Fill a transition template.
pub fn render(template: &str, schedule: &str) -> String {
    template.replace("{schedule}", schedule)
}

/// Extra incident details an inbound alert can carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IncidentContext {
    #[serde(default)]
    pub alert_id: Option<String>,
    /// Affected host or service instance.
    #[serde(default)]
    pub instance: Option<String>,
}

impl IncidentContext {
    /// Add the instance name to `message`.
    ///
    /// Messages shaped like `"<alert>, alert channel <x>"` get the instance
    /// spliced in before the channel part; anything else gets it appended.
    pub fn decorate(&self, message: &str) -> String {
        let Some(instance) = self.instance.as_deref().filter(|i| !i.is_empty()) else {
            return message.to_string();
        };
        if message.contains(CHANNEL_MARKER) {
            message.replacen(CHANNEL_MARKER, &format!(" on {instance}{CHANNEL_MARKER}"), 1)
        } else {
            format!("{message} (instance: {instance})")
        }
    }
}
