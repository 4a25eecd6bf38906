use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
    Open,
    Acknowledged,
    Resolved,
}

impl IncidentState {
    pub fn can_transition_to(self, target: IncidentState) -> bool {
        matches!(
            (self, target),
            (IncidentState::Open, IncidentState::Acknowledged)
                | (IncidentState::Open, IncidentState::Resolved)
                | (IncidentState::Acknowledged, IncidentState::Resolved)
        )
    }

    pub fn is_resolved(self) -> bool {
        self == IncidentState::Resolved
    }
}

impl fmt::Display for IncidentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub monitor_id: Uuid,
    pub state: IncidentState,
    pub cause: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reminder_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn open(monitor_id: Uuid, cause: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            monitor_id,
            state: IncidentState::Open,
            cause: cause.into(),
            started_at: at,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            last_reminder_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state.is_resolved()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentEventKind {
    Created,
    Acknowledged,
    Resolved,
    CheckFailed,
    CheckRecovered,
}

impl fmt::Display for IncidentEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Resolved => write!(f, "resolved"),
            Self::CheckFailed => write!(f, "check_failed"),
            Self::CheckRecovered => write!(f, "check_recovered"),
        }
    }
}

/// Append-only timeline entry attached to an incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub kind: IncidentEventKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl IncidentEvent {
    pub fn new(incident_id: Uuid, kind: IncidentEventKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            incident_id,
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}
