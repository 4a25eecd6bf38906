mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    CheckResult, CheckStatus, Heartbeat, Incident, IncidentEvent, MaintenanceWindow, Monitor,
    MonitorStatus, NotificationChannel,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Durable state consumed by the engine.
///
/// The engine never assumes transactions: each monitor's status row has a
/// single writer, and incident uniqueness is enforced above this layer.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_monitors(&self) -> Result<Vec<Monitor>, StoreError>;
    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>, StoreError>;
    async fn upsert_monitor(&self, monitor: &Monitor) -> Result<(), StoreError>;
    /// Removes the monitor together with its status, check history and heartbeat.
    async fn delete_monitor(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn list_enabled_monitors(&self) -> Result<Vec<Monitor>, StoreError> {
        Ok(self
            .list_monitors()
            .await?
            .into_iter()
            .filter(|m| m.enabled)
            .collect())
    }

    async fn get_status(&self, monitor_id: Uuid) -> Result<Option<MonitorStatus>, StoreError>;
    /// Fails with `NotFound` once the monitor is deleted.
    async fn save_status(&self, status: &MonitorStatus) -> Result<(), StoreError>;

    async fn append_check(&self, check: &CheckResult) -> Result<(), StoreError>;
    /// Newest first.
    async fn recent_checks(
        &self,
        monitor_id: Uuid,
        limit: usize,
    ) -> Result<Vec<CheckResult>, StoreError>;

    async fn insert_incident(&self, incident: &Incident) -> Result<(), StoreError>;
    async fn update_incident(&self, incident: &Incident) -> Result<(), StoreError>;
    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>, StoreError>;
    /// The non-resolved incident for a monitor, if any.
    async fn open_incident(&self, monitor_id: Uuid) -> Result<Option<Incident>, StoreError>;
    /// Newest first, optionally limited to one monitor.
    async fn list_incidents(&self, monitor_id: Option<Uuid>) -> Result<Vec<Incident>, StoreError>;
    async fn append_incident_event(&self, event: &IncidentEvent) -> Result<(), StoreError>;
    /// Chronological.
    async fn incident_events(&self, incident_id: Uuid) -> Result<Vec<IncidentEvent>, StoreError>;

    async fn list_maintenance_windows(&self) -> Result<Vec<MaintenanceWindow>, StoreError>;
    async fn upsert_maintenance_window(&self, window: &MaintenanceWindow) -> Result<(), StoreError>;
    async fn delete_maintenance_window(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn list_heartbeats(&self) -> Result<Vec<Heartbeat>, StoreError>;
    async fn get_heartbeat(&self, monitor_id: Uuid) -> Result<Option<Heartbeat>, StoreError>;
    async fn get_heartbeat_by_token(&self, token: &str) -> Result<Option<Heartbeat>, StoreError>;
    async fn save_heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), StoreError>;

    async fn list_channels(&self) -> Result<Vec<NotificationChannel>, StoreError>;
    async fn get_channel(&self, id: Uuid) -> Result<Option<NotificationChannel>, StoreError>;
    async fn upsert_channel(&self, channel: &NotificationChannel) -> Result<(), StoreError>;
    /// Channel subset assigned to a monitor. Empty means no restriction.
    async fn assigned_channels(&self, monitor_id: Uuid) -> Result<Vec<Uuid>, StoreError>;

    async fn list_enabled_channels(&self) -> Result<Vec<NotificationChannel>, StoreError> {
        Ok(self
            .list_channels()
            .await?
            .into_iter()
            .filter(|c| c.enabled)
            .collect())
    }

    /// Share of checks since `since` that were up or degraded.
    async fn uptime_ratio(
        &self,
        monitor_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError>;
    /// Nearest-rank latency percentile, `percentile` in `0.0..=100.0`.
    async fn latency_percentile(
        &self,
        monitor_id: Uuid,
        since: DateTime<Utc>,
        percentile: f64,
    ) -> Result<Option<u64>, StoreError>;
    async fn count_checks(
        &self,
        monitor_id: Uuid,
        since: DateTime<Utc>,
        status: Option<CheckStatus>,
    ) -> Result<u64, StoreError>;
}
