use std::sync::Arc;

use chrono::{DateTime, Utc};
use uptime_core::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Prefix used to render heartbeat push URLs, e.g. `https://status.example.com`.
    pub public_url: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            public_url: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn push_url(&self, token: &str) -> String {
        let path = format!("/api/v1/push/{token}");
        match &self.public_url {
            Some(base) => format!("{base}{path}"),
            None => path,
        }
    }
}
