use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::monitor::Status;

/// Push-style monitor state. The monitored service pings with `token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub monitor_id: Uuid,
    pub token: String,
    pub grace_secs: u64,
    pub last_ping_at: Option<DateTime<Utc>>,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

impl Heartbeat {
    pub fn new(monitor_id: Uuid, grace_secs: u64) -> Self {
        Self {
            monitor_id,
            token: generate_token(),
            grace_secs,
            last_ping_at: None,
            status: Status::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Moment after which the heartbeat counts as missed. A heartbeat that
    /// never pinged measures from its creation.
    pub fn deadline(&self, interval: Duration) -> DateTime<Utc> {
        let base = self.last_ping_at.unwrap_or(self.created_at);
        let window = interval + Duration::from_secs(self.grace_secs);
        chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| base.checked_add_signed(w))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        now > self.deadline(interval)
    }
}

fn generate_token() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}
