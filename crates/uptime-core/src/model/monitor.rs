use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Http,
    Tcp,
    Dns,
    Tls,
    WebSocket,
    Command,
    Heartbeat,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Tcp => write!(f, "tcp"),
            Self::Dns => write!(f, "dns"),
            Self::Tls => write!(f, "tls"),
            Self::WebSocket => write!(f, "web_socket"),
            Self::Command => write!(f, "command"),
            Self::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// A configured endpoint to watch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Uuid,
    pub name: String,
    pub kind: ProbeKind,
    /// URL, `host:port`, hostname or command line depending on `kind`.
    /// Empty for heartbeat monitors.
    #[serde(default)]
    pub target: String,
    /// Base interval between checks, in seconds.
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// A passing probe counts as a failure and vice versa.
    #[serde(default)]
    pub upside_down: bool,
    /// Reminder cadence while an incident stays open. Zero disables reminders.
    #[serde(default)]
    pub resend_interval_secs: u64,
    pub enabled: bool,
    #[serde(default)]
    pub content_check: bool,
    /// Latency above which an otherwise passing check is reported as degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_latency_ms: Option<u64>,
    /// Channels this monitor notifies. Empty means every enabled channel.
    #[serde(default)]
    pub channel_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Monitor {
    pub fn new(name: impl Into<String>, kind: ProbeKind, target: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            target: target.into(),
            interval_secs: 60,
            timeout_secs: 10,
            failure_threshold: 1,
            success_threshold: 1,
            upside_down: false,
            resend_interval_secs: 0,
            enabled: true,
            content_check: false,
            degraded_latency_ms: None,
            channel_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_thresholds(mut self, failure: u32, success: u32) -> Self {
        self.failure_threshold = failure;
        self.success_threshold = success;
        self
    }

    pub fn with_upside_down(mut self, upside_down: bool) -> Self {
        self.upside_down = upside_down;
        self
    }

    pub fn with_resend_interval(mut self, secs: u64) -> Self {
        self.resend_interval_secs = secs;
        self
    }

    pub fn with_content_check(mut self, enabled: bool) -> Self {
        self.content_check = enabled;
        self
    }

    pub fn with_degraded_latency(mut self, ms: u64) -> Self {
        self.degraded_latency_ms = Some(ms);
        self
    }

    pub fn with_channels(mut self, channel_ids: Vec<Uuid>) -> Self {
        self.channel_ids = channel_ids;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold.max(1)
    }

    pub fn success_threshold(&self) -> u32 {
        self.success_threshold.max(1)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind == ProbeKind::Heartbeat
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Up,
    Down,
    Degraded,
    Paused,
}

impl Status {
    pub fn is_failing(self) -> bool {
        matches!(self, Status::Down | Status::Degraded)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Degraded => write!(f, "degraded"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Runtime state of a monitor, rewritten after every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub monitor_id: Uuid,
    pub status: Status,
    pub consec_fails: u32,
    pub consec_successes: u32,
    pub last_check_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_body_hash: Option<String>,
    #[serde(skip)]
    pub last_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_latency_ms: Option<u64>,
}

impl MonitorStatus {
    pub fn pending(monitor_id: Uuid) -> Self {
        Self {
            monitor_id,
            status: Status::Pending,
            consec_fails: 0,
            consec_successes: 0,
            last_check_at: None,
            last_body_hash: None,
            last_body: None,
            last_message: None,
            last_latency_ms: None,
        }
    }

    pub fn paused(monitor_id: Uuid) -> Self {
        Self {
            status: Status::Paused,
            ..Self::pending(monitor_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_never_drop_below_one() {
        let m = Monitor::new("api", ProbeKind::Http, "https://example.com").with_thresholds(0, 0);
        assert_eq!(m.failure_threshold(), 1);
        assert_eq!(m.success_threshold(), 1);
    }

    #[test]
    fn failing_statuses() {
        assert!(Status::Down.is_failing());
        assert!(Status::Degraded.is_failing());
        assert!(!Status::Up.is_failing());
        assert!(!Status::Pending.is_failing());
        assert!(!Status::Paused.is_failing());
    }

    #[test]
    fn status_display() {
        assert_eq!(Status::Degraded.to_string(), "degraded");
        assert_eq!(ProbeKind::WebSocket.to_string(), "web_socket");
    }

    #[test]
    fn monitor_roundtrips_through_json_with_defaults() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "name": "db",
            "kind": "tcp",
            "target": "db.internal:5432",
            "interval_secs": 30,
            "timeout_secs": 5,
            "failure_threshold": 2,
            "success_threshold": 1,
            "enabled": true,
            "created_at": "2026-01-01T00:00:00Z"
        });
        let m: Monitor = serde_json::from_value(json).unwrap();
        assert_eq!(m.kind, ProbeKind::Tcp);
        assert!(!m.upside_down);
        assert!(m.channel_ids.is_empty());
        assert_eq!(m.interval(), Duration::from_secs(30));
    }
}
