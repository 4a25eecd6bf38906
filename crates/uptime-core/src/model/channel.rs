use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A notification delivery target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: Uuid,
    pub name: String,
    /// Sender type, e.g. `webhook` or `slack`.
    pub kind: String,
    /// Sender-specific settings, validated when a delivery is attempted.
    #[serde(default)]
    pub settings: serde_json::Value,
    /// Which event types to deliver. Empty means all.
    #[serde(default)]
    pub events: Vec<String>,
    pub enabled: bool,
}

impl NotificationChannel {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, settings: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: kind.into(),
            settings,
            events: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_events(mut self, events: Vec<String>) -> Self {
        self.events = events;
        self
    }

    pub fn accepts(&self, event_type: &str) -> bool {
        if self.events.is_empty() {
            return true;
        }
        self.events.iter().any(|e| e == event_type)
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }
}
