mod http;
mod tcp;

pub use http::HttpProbe;
pub use tcp::TcpProbe;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::model::{CheckStatus, Monitor, ProbeKind};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("HTTP {status} from {target}")]
    Http { target: String, status: u16 },
    #[error("Request to {target} failed: {reason}")]
    Request { target: String, reason: String },
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },
    #[error("No probe registered for {0} monitors")]
    Unsupported(ProbeKind),
}

impl ProbeError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Raw result of one probe, before upside-down inversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: CheckStatus,
    pub latency_ms: u64,
    pub status_code: Option<u16>,
    pub message: String,
    /// SHA-256 of the full response body, set when content checking is on.
    pub body_hash: Option<String>,
    /// Bounded excerpt of the body used to render diffs.
    pub body: Option<String>,
    pub cert_expires_at: Option<DateTime<Utc>>,
    pub dns_records: Vec<String>,
}

impl ProbeOutcome {
    fn with_status(status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            latency_ms: 0,
            status_code: None,
            message: message.into(),
            body_hash: None,
            body: None,
            cert_expires_at: None,
            dns_records: Vec::new(),
        }
    }

    pub fn up(message: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Up, message)
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Down, message)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Degraded, message)
    }

    pub fn from_error(err: &ProbeError) -> Self {
        let mut outcome = Self::down(err.to_string());
        outcome.status_code = err.status_code();
        outcome
    }

    pub fn with_latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn with_body(mut self, hash: String, excerpt: String) -> Self {
        self.body_hash = Some(hash);
        self.body = Some(excerpt);
        self
    }
}

/// Protocol-specific check for one kind of monitor.
///
/// Implementations may ignore the monitor's timeout; the registry bounds
/// every call with it.
#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> ProbeKind;
    async fn probe(&self, monitor: &Monitor) -> Result<ProbeOutcome, ProbeError>;
}

/// Maps probe kinds to implementations. Built once at startup.
#[derive(Default, Clone)]
pub struct ProbeRegistry {
    probes: HashMap<ProbeKind, Arc<dyn Probe>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP and TCP probes sharing `client`.
    pub fn with_defaults(client: reqwest::Client, max_body_bytes: usize) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HttpProbe::new(client, max_body_bytes)));
        registry.register(Arc::new(TcpProbe));
        registry
    }

    pub fn register(&mut self, probe: Arc<dyn Probe>) {
        self.probes.insert(probe.kind(), probe);
    }

    pub fn get(&self, kind: ProbeKind) -> Option<Arc<dyn Probe>> {
        self.probes.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ProbeKind> {
        self.probes.keys().copied().collect()
    }

    /// Probe `monitor` within its timeout. Errors, timeouts and unknown
    /// kinds all come back as a down outcome.
    pub async fn run(&self, monitor: &Monitor) -> ProbeOutcome {
        let Some(probe) = self.get(monitor.kind) else {
            return ProbeOutcome::from_error(&ProbeError::Unsupported(monitor.kind));
        };

        let timeout = monitor.timeout();
        match tokio::time::timeout(timeout, probe.probe(monitor)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                debug!(monitor_id = %monitor.id, error = %e, "Probe failed");
                ProbeOutcome::from_error(&e)
            }
            Err(_) => ProbeOutcome::from_error(&ProbeError::Timeout(timeout)),
        }
    }
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
