//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! log_format = "json"
//! public_url = "https://status.example.com"
//!
//! [engine]
//! min_interval_secs = 10
//! max_retries = 5
//!
//! [[channel]]
//! name = "ops"
//! kind = "webhook"
//! events = ["incident.created", "incident.resolved"]
//! settings = { url = "https://hooks.example.com/uptime", secret = "s3cret" }
//!
//! [[monitor]]
//! name = "api"
//! kind = "http"
//! target = "https://api.example.com/health"
//! interval_secs = 30
//! failure_threshold = 3
//! channels = ["ops"]
//!
//! [[monitor]]
//! name = "nightly-backup"
//! kind = "heartbeat"
//! interval_secs = 86400
//! grace_secs = 600
//!
//! [[maintenance]]
//! name = "db patching"
//! monitors = ["api"]
//! schedule = { type = "weekly", weekdays = [7], start_time = "02:00:00", duration_mins = 120 }
//! ```

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use uuid::Uuid;

use uptime_core::{
    EngineConfig, MaintenanceWindow, Monitor, NotificationChannel, ProbeKind, Schedule,
};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub engine: EngineOverrides,

    #[serde(default)]
    pub channel: Vec<ChannelDef>,

    #[serde(default)]
    pub monitor: Vec<MonitorDef>,

    #[serde(default)]
    pub maintenance: Vec<MaintenanceDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Base URL used when printing heartbeat push URLs.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
            public_url: None,
        }
    }
}

pub fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Optional overrides for [`EngineConfig`]. Unset fields keep the engine default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineOverrides {
    pub adaptive: Option<bool>,
    pub min_interval_secs: Option<u64>,
    pub watchdog_interval_secs: Option<u64>,
    pub initial_jitter_ms: Option<u64>,
    pub check_history_limit: Option<usize>,
    pub max_body_bytes: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub base_backoff_ms: Option<u64>,
    pub delivery_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
}

impl EngineOverrides {
    pub fn to_engine_config(&self) -> EngineConfig {
        let mut c = EngineConfig::default();
        if let Some(v) = self.adaptive {
            c = c.with_adaptive_enabled(v);
        }
        if let Some(v) = self.min_interval_secs {
            c = c.with_min_interval(v);
        }
        if let Some(v) = self.watchdog_interval_secs {
            c = c.with_watchdog_interval(v);
        }
        if let Some(v) = self.initial_jitter_ms {
            c = c.with_initial_jitter(v);
        }
        if let Some(v) = self.check_history_limit {
            c = c.with_check_history_limit(v);
        }
        if let Some(v) = self.max_body_bytes {
            c.max_body_bytes = v;
        }
        if let Some(v) = self.max_concurrency {
            c = c.with_max_concurrency(v);
        }
        if let Some(v) = self.max_retries {
            c = c.with_max_retries(v);
        }
        if let Some(v) = self.base_backoff_ms {
            c = c.with_base_backoff(v);
        }
        if let Some(v) = self.delivery_timeout_secs {
            c = c.with_delivery_timeout(v);
        }
        if let Some(v) = self.shutdown_grace_secs {
            c = c.with_shutdown_grace(v);
        }
        c
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelDef {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ChannelDef {
    pub fn to_channel(&self) -> NotificationChannel {
        let settings = if self.settings.is_null() {
            serde_json::json!({})
        } else {
            self.settings.clone()
        };
        let mut channel = NotificationChannel::new(&self.name, &self.kind, settings)
            .with_events(self.events.clone());
        channel.enabled = self.enabled;
        channel
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorDef {
    pub name: String,
    pub kind: ProbeKind,
    #[serde(default)]
    pub target: String,
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub failure_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
    #[serde(default)]
    pub upside_down: bool,
    pub resend_interval_secs: Option<u64>,
    #[serde(default)]
    pub content_check: bool,
    pub degraded_latency_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Channel names. Empty means every channel.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Heartbeat monitors only.
    pub grace_secs: Option<u64>,
    /// Heartbeat monitors only. Fixed push token; generated when unset.
    pub token: Option<String>,
}

impl MonitorDef {
    /// `channels` maps channel names to the IDs they were stored under.
    pub fn to_monitor(&self, channels: &HashMap<String, Uuid>) -> Monitor {
        let channel_ids = self
            .channels
            .iter()
            .filter_map(|name| channels.get(name).copied())
            .collect();
        let mut m = Monitor::new(&self.name, self.kind, &self.target)
            .with_upside_down(self.upside_down)
            .with_content_check(self.content_check)
            .with_channels(channel_ids);
        if let Some(v) = self.interval_secs {
            m = m.with_interval(v);
        }
        if let Some(v) = self.timeout_secs {
            m = m.with_timeout(v);
        }
        let failure = self.failure_threshold.unwrap_or(m.failure_threshold);
        let success = self.success_threshold.unwrap_or(m.success_threshold);
        m = m.with_thresholds(failure, success);
        if let Some(v) = self.resend_interval_secs {
            m = m.with_resend_interval(v);
        }
        if let Some(v) = self.degraded_latency_ms {
            m = m.with_degraded_latency(v);
        }
        m.enabled = self.enabled;
        m
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceDef {
    pub name: String,
    /// Monitor names. Empty means every monitor.
    #[serde(default)]
    pub monitors: Vec<String>,
    #[serde(default)]
    pub utc_offset_mins: i32,
    #[serde(default = "default_true")]
    pub active: bool,
    pub schedule: Schedule,
}

impl MaintenanceDef {
    pub fn to_window(&self, monitors: &HashMap<String, Uuid>) -> MaintenanceWindow {
        let ids = self
            .monitors
            .iter()
            .filter_map(|name| monitors.get(name).copied())
            .collect();
        let mut window = MaintenanceWindow::new(&self.name, self.schedule.clone())
            .for_monitors(ids)
            .with_utc_offset(self.utc_offset_mins);
        window.active = self.active;
        window
    }
}

fn default_true() -> bool {
    true
}

fn parse_http_url(value: &str) -> Result<url::Url, String> {
    let parsed = url::Url::parse(value).map_err(|e| format!("{value} ({e})"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(format!("{value} (unsupported scheme {other})")),
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }
        if let Some(ref public_url) = self.server.public_url {
            parse_http_url(public_url).map_err(|e| format!("Invalid public_url: {e}"))?;
        }

        let mut channel_names = HashSet::new();
        for ch in &self.channel {
            if ch.name.trim().is_empty() {
                return Err("Channel name must not be empty".into());
            }
            if !channel_names.insert(ch.name.as_str()) {
                return Err(format!("Duplicate channel name: {}", ch.name));
            }
            let url_key = match ch.kind.as_str() {
                "webhook" => Some("url"),
                "slack" => Some("webhook_url"),
                "log" => None,
                other => {
                    return Err(format!(
                        "Channel '{}' has unknown kind '{}': must be webhook, slack or log",
                        ch.name, other
                    ));
                }
            };
            if let Some(key) = url_key {
                let value = ch
                    .settings
                    .get(key)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| format!("Channel '{}' is missing settings.{}", ch.name, key))?;
                parse_http_url(value)
                    .map_err(|e| format!("Invalid URL in channel '{}' settings.{}: {}", ch.name, key, e))?;
            }
        }

        let mut monitor_names = HashSet::new();
        for m in &self.monitor {
            if m.name.trim().is_empty() {
                return Err("Monitor name must not be empty".into());
            }
            if !monitor_names.insert(m.name.as_str()) {
                return Err(format!("Duplicate monitor name: {}", m.name));
            }
            if m.interval_secs == Some(0) {
                return Err(format!("Monitor '{}' must have a positive interval", m.name));
            }
            match m.kind {
                ProbeKind::Heartbeat => {}
                ProbeKind::Http => {
                    parse_http_url(&m.target)
                        .map_err(|e| format!("Invalid target URL in monitor '{}': {}", m.name, e))?;
                }
                _ if m.target.trim().is_empty() => {
                    return Err(format!("Monitor '{}' has no target", m.name));
                }
                _ => {}
            }
            if m.kind != ProbeKind::Heartbeat && (m.grace_secs.is_some() || m.token.is_some()) {
                return Err(format!(
                    "Monitor '{}': grace_secs and token only apply to heartbeat monitors",
                    m.name
                ));
            }
            for name in &m.channels {
                if !channel_names.contains(name.as_str()) {
                    return Err(format!(
                        "Monitor '{}' references unknown channel '{}'",
                        m.name, name
                    ));
                }
            }
        }

        let tokens: Vec<&str> = self.monitor.iter().filter_map(|m| m.token.as_deref()).collect();
        let unique: HashSet<&str> = tokens.iter().copied().collect();
        if unique.len() != tokens.len() {
            return Err("Duplicate heartbeat token".into());
        }

        for w in &self.maintenance {
            for name in &w.monitors {
                if !monitor_names.contains(name.as_str()) {
                    return Err(format!(
                        "Maintenance window '{}' references unknown monitor '{}'",
                        w.name, name
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
[[monitor]]
name = "api"
kind = "http"
target = "https://example.com/health"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.monitor.len(), 1);
        assert_eq!(config.monitor[0].kind, ProbeKind::Http);
        assert_eq!(config.server.log_format, "pretty");
        assert_eq!(config.server.listen.port(), 8080);

        let m = config.monitor[0].to_monitor(&HashMap::new());
        assert_eq!(m.interval_secs, 60);
        assert!(m.enabled);
        assert!(m.channel_ids.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[server]
listen = "127.0.0.1:9090"
log_format = "json"
public_url = "https://status.example.com"

[engine]
adaptive = false
min_interval_secs = 10
max_retries = 5
base_backoff_ms = 500

[[channel]]
name = "ops"
kind = "webhook"
events = ["incident.created"]
settings = { url = "https://hooks.example.com/alerts", secret = "my-key" }

[[channel]]
name = "audit"
kind = "log"

[[monitor]]
name = "api"
kind = "http"
target = "https://api.example.com/health"
interval_secs = 30
failure_threshold = 3
channels = ["ops"]

[[monitor]]
name = "backup"
kind = "heartbeat"
interval_secs = 86400
grace_secs = 600
token = "backup-token"

[[maintenance]]
name = "patching"
monitors = ["api"]
utc_offset_mins = 60
schedule = { type = "weekly", weekdays = [7], start_time = "02:00:00", duration_mins = 120 }
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.listen.port(), 9090);
        assert_eq!(config.server.public_url.as_deref(), Some("https://status.example.com"));

        let engine = config.engine.to_engine_config();
        assert!(!engine.adaptive.enabled);
        assert_eq!(engine.adaptive.min_interval, Duration::from_secs(10));
        assert_eq!(engine.dispatch.max_retries, 5);
        assert_eq!(engine.dispatch.base_backoff, Duration::from_millis(500));
        assert_eq!(engine.watchdog_interval, Duration::from_secs(30));

        let ops = config.channel[0].to_channel();
        assert_eq!(ops.kind, "webhook");
        assert_eq!(ops.setting_str("secret"), Some("my-key"));
        assert!(ops.accepts("incident.created"));
        assert!(!ops.accepts("incident.resolved"));
        assert_eq!(config.channel[1].to_channel().settings, serde_json::json!({}));

        let channel_ids = HashMap::from([("ops".to_string(), ops.id)]);
        let api = config.monitor[0].to_monitor(&channel_ids);
        assert_eq!(api.interval_secs, 30);
        assert_eq!(api.failure_threshold, 3);
        assert_eq!(api.success_threshold, 1);
        assert_eq!(api.channel_ids, vec![ops.id]);

        assert_eq!(config.monitor[1].grace_secs, Some(600));
        assert_eq!(config.monitor[1].token.as_deref(), Some("backup-token"));

        let monitor_ids = HashMap::from([("api".to_string(), api.id)]);
        let window = config.maintenance[0].to_window(&monitor_ids);
        assert_eq!(window.monitor_ids, vec![api.id]);
        assert_eq!(window.utc_offset_mins, 60);
        assert!(matches!(window.schedule, Schedule::Weekly { duration_mins: 120, .. }));
    }

    #[test]
    fn validate_rejects_duplicate_monitor_names() {
        let toml = r#"
[[monitor]]
name = "same"
kind = "tcp"
target = "db:5432"

[[monitor]]
name = "same"
kind = "tcp"
target = "cache:6379"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate monitor name"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_target_url() {
        let toml = r#"
[[monitor]]
name = "bad"
kind = "http"
target = "not-a-url"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid target URL"), "{}", err);
    }

    #[test]
    fn validate_rejects_missing_tcp_target() {
        let toml = r#"
[[monitor]]
name = "db"
kind = "tcp"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("has no target"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_webhook_url() {
        let toml = r#"
[[channel]]
name = "ops"
kind = "webhook"
settings = { url = "not-valid" }
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid URL in channel"), "{}", err);
    }

    #[test]
    fn validate_rejects_unknown_channel_kind() {
        let toml = r#"
[[channel]]
name = "pager"
kind = "sms"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("unknown kind"), "{}", err);
    }

    #[test]
    fn validate_rejects_unknown_references() {
        let toml = r#"
[[monitor]]
name = "api"
kind = "http"
target = "https://example.com"
channels = ["nowhere"]
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("unknown channel"), "{}", err);

        let toml = r#"
[[maintenance]]
name = "window"
monitors = ["ghost"]
schedule = { type = "daily", start_time = "03:00:00", duration_mins = 30 }
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("unknown monitor"), "{}", err);
    }

    #[test]
    fn validate_rejects_grace_on_probe_monitor() {
        let toml = r#"
[[monitor]]
name = "api"
kind = "tcp"
target = "db:5432"
grace_secs = 30
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("only apply to heartbeat"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let toml = r#"
[server]
log_format = "xml"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid log_format"), "{}", err);
    }
}
