use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::monitor::Status;

/// Logical outcome of a single probe, after upside-down inversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Up,
    Down,
    Degraded,
}

impl CheckStatus {
    pub fn is_pass(self) -> bool {
        self == CheckStatus::Up
    }

    /// Upside-down monitors treat a pass as down and any failure as up.
    pub fn inverted(self) -> Self {
        match self {
            CheckStatus::Up => CheckStatus::Down,
            CheckStatus::Down | CheckStatus::Degraded => CheckStatus::Up,
        }
    }

    pub fn settled(self) -> Status {
        match self {
            CheckStatus::Up => Status::Up,
            CheckStatus::Down => Status::Down,
            CheckStatus::Degraded => Status::Degraded,
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// One recorded probe execution. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: Uuid,
    pub monitor_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub status: CheckStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_records: Vec<String>,
}

impl CheckResult {
    pub fn new(monitor_id: Uuid, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            monitor_id,
            checked_at: Utc::now(),
            status,
            latency_ms: 0,
            status_code: None,
            message: message.into(),
            cert_expires_at: None,
            dns_records: Vec::new(),
        }
    }

    pub fn with_latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }
}

/// Fixed-capacity history of check results. O(1) insert, evicts oldest when full.
#[derive(Debug, Clone)]
pub struct CheckRing {
    buffer: VecDeque<CheckResult>,
    capacity: usize,
}

impl CheckRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, result: CheckResult) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(result);
    }

    /// Newest first, at most `limit` entries.
    pub fn recent(&self, limit: usize) -> Vec<CheckResult> {
        self.buffer.iter().rev().take(limit).cloned().collect()
    }

    pub fn since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &CheckResult> {
        self.buffer.iter().filter(move |c| c.checked_at >= since)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
