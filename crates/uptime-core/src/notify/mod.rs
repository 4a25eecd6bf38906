//! Notification payloads, the sender capability and the dispatcher that fans
//! payloads out to channels.
//!
//! Senders are looked up by the channel's `kind` string in a [`SenderRegistry`]
//! built once at startup. The [`Dispatcher`] owns retries, backoff and the
//! concurrency limit; senders only perform a single delivery attempt.

mod dispatcher;
mod log;
mod slack;
mod webhook;

pub use dispatcher::{DeliveryReport, DispatchError, DispatchHandle, Dispatcher};
pub use log::LogSender;
pub use slack::SlackSender;
pub use webhook::{sign_payload, WebhookSender, SIGNATURE_HEADER};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::ContentChange;
use crate::model::{Incident, Monitor, NotificationChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "incident.created")]
    IncidentCreated,
    #[serde(rename = "incident.acknowledged")]
    IncidentAcknowledged,
    #[serde(rename = "incident.resolved")]
    IncidentResolved,
    #[serde(rename = "incident.reminder")]
    IncidentReminder,
    #[serde(rename = "content.changed")]
    ContentChanged,
    #[serde(rename = "test")]
    Test,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IncidentCreated => "incident.created",
            Self::IncidentAcknowledged => "incident.acknowledged",
            Self::IncidentResolved => "incident.resolved",
            Self::IncidentReminder => "incident.reminder",
            Self::ContentChanged => "content.changed",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The JSON envelope handed to senders.
#[derive(Debug, Clone, Serialize)]
pub struct Payload {
    pub version: u8,
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor: Option<Monitor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident: Option<Incident>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_change: Option<ContentChange>,
    pub message: String,
}

impl Payload {
    pub fn new(event: EventType, message: impl Into<String>) -> Self {
        Self {
            version: 1,
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
            monitor: None,
            incident: None,
            content_change: None,
            message: message.into(),
        }
    }

    pub fn incident(event: EventType, monitor: &Monitor, incident: &Incident) -> Self {
        let message = match event {
            EventType::IncidentCreated => format!("{} is down: {}", monitor.name, incident.cause),
            EventType::IncidentAcknowledged => format!(
                "{} incident acknowledged by {}",
                monitor.name,
                incident.acknowledged_by.as_deref().unwrap_or("unknown")
            ),
            EventType::IncidentResolved => format!("{} recovered", monitor.name),
            EventType::IncidentReminder => {
                format!("{} is still down: {}", monitor.name, incident.cause)
            }
            _ => format!("{}: {}", monitor.name, incident.cause),
        };
        Self {
            monitor: Some(monitor.clone()),
            incident: Some(incident.clone()),
            ..Self::new(event, message)
        }
    }

    pub fn content_changed(monitor: &Monitor, change: ContentChange) -> Self {
        Self {
            monitor: Some(monitor.clone()),
            content_change: Some(change),
            ..Self::new(
                EventType::ContentChanged,
                format!("{} content changed", monitor.name),
            )
        }
    }

    pub fn test(incident: Option<Incident>) -> Self {
        Self {
            incident,
            ..Self::new(EventType::Test, "Test notification from uptime-monitor")
        }
    }

    pub fn monitor_id(&self) -> Option<Uuid> {
        self.monitor
            .as_ref()
            .map(|m| m.id)
            .or_else(|| self.incident.as_ref().map(|i| i.monitor_id))
    }

    /// One-line human summary used by chat-style senders.
    pub fn summary(&self) -> String {
        let tag = match self.event {
            EventType::IncidentCreated => "DOWN",
            EventType::IncidentAcknowledged => "ACK",
            EventType::IncidentResolved => "UP",
            EventType::IncidentReminder => "STILL DOWN",
            EventType::ContentChanged => "CHANGED",
            EventType::Test => "TEST",
        };
        format!("[{tag}] {}", self.message)
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    /// Unknown channel type or malformed settings. Never retried.
    #[error("Channel configuration error: {0}")]
    Config(String),
    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },
    #[error("Delivery request failed: {0}")]
    Request(String),
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),
}

impl SendError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::Timeout(_))
    }
}

/// A concrete delivery mechanism for one channel type.
#[async_trait]
pub trait Sender: Send + Sync {
    /// The channel `kind` this sender handles.
    fn kind(&self) -> &'static str;
    async fn send(&self, channel: &NotificationChannel, payload: &Payload) -> Result<(), SendError>;
}

#[derive(Default, Clone)]
pub struct SenderRegistry {
    senders: HashMap<String, Arc<dyn Sender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `webhook`, `slack` and `log` senders.
    pub fn with_defaults(client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(WebhookSender::new(client.clone())));
        registry.register(Arc::new(SlackSender::new(client)));
        registry.register(Arc::new(LogSender));
        registry
    }

    pub fn register(&mut self, sender: Arc<dyn Sender>) {
        self.senders.insert(sender.kind().to_string(), sender);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Sender>> {
        self.senders.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.senders.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl fmt::Debug for SenderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
