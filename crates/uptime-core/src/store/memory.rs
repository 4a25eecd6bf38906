use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::model::{
    CheckResult, CheckRing, CheckStatus, Heartbeat, Incident, IncidentEvent, MaintenanceWindow,
    Monitor, MonitorStatus, NotificationChannel,
};

#[derive(Default)]
struct Inner {
    monitors: HashMap<Uuid, Monitor>,
    statuses: HashMap<Uuid, MonitorStatus>,
    checks: HashMap<Uuid, CheckRing>,
    incidents: HashMap<Uuid, Incident>,
    incident_events: HashMap<Uuid, Vec<IncidentEvent>>,
    windows: HashMap<Uuid, MaintenanceWindow>,
    heartbeats: HashMap<Uuid, Heartbeat>,
    channels: HashMap<Uuid, NotificationChannel>,
}

/// In-process [`Store`] with bounded per-monitor check history.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    history_limit: usize,
}

impl MemoryStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            history_limit,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_monitors(&self) -> Result<Vec<Monitor>, StoreError> {
        let inner = self.inner.read().await;
        let mut monitors: Vec<Monitor> = inner.monitors.values().cloned().collect();
        monitors.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(monitors)
    }

    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>, StoreError> {
        Ok(self.inner.read().await.monitors.get(&id).cloned())
    }

    async fn upsert_monitor(&self, monitor: &Monitor) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .monitors
            .insert(monitor.id, monitor.clone());
        Ok(())
    }

    async fn delete_monitor(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let removed = inner.monitors.remove(&id).is_some();
        inner.statuses.remove(&id);
        inner.checks.remove(&id);
        inner.heartbeats.remove(&id);
        Ok(removed)
    }

    async fn get_status(&self, monitor_id: Uuid) -> Result<Option<MonitorStatus>, StoreError> {
        Ok(self.inner.read().await.statuses.get(&monitor_id).cloned())
    }

    async fn save_status(&self, status: &MonitorStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.monitors.contains_key(&status.monitor_id) {
            return Err(StoreError::not_found("monitor", status.monitor_id));
        }
        inner.statuses.insert(status.monitor_id, status.clone());
        Ok(())
    }

    /// Checks for unknown monitors are dropped.
    async fn append_check(&self, check: &CheckResult) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.monitors.contains_key(&check.monitor_id) {
            return Ok(());
        }
        let limit = self.history_limit;
        inner
            .checks
            .entry(check.monitor_id)
            .or_insert_with(|| CheckRing::new(limit))
            .push(check.clone());
        Ok(())
    }

    async fn recent_checks(
        &self,
        monitor_id: Uuid,
        limit: usize,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .checks
            .get(&monitor_id)
            .map(|ring| ring.recent(limit))
            .unwrap_or_default())
    }

    async fn insert_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .incidents
            .insert(incident.id, incident.clone());
        Ok(())
    }

    async fn update_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.incidents.get_mut(&incident.id) {
            Some(slot) => {
                *slot = incident.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("incident", incident.id)),
        }
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>, StoreError> {
        Ok(self.inner.read().await.incidents.get(&id).cloned())
    }

    async fn open_incident(&self, monitor_id: Uuid) -> Result<Option<Incident>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .incidents
            .values()
            .filter(|i| i.monitor_id == monitor_id && !i.is_resolved())
            .max_by_key(|i| i.started_at)
            .cloned())
    }

    async fn list_incidents(&self, monitor_id: Option<Uuid>) -> Result<Vec<Incident>, StoreError> {
        let inner = self.inner.read().await;
        let mut incidents: Vec<Incident> = inner
            .incidents
            .values()
            .filter(|i| monitor_id.is_none_or(|id| i.monitor_id == id))
            .cloned()
            .collect();
        incidents.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(incidents)
    }

    async fn append_incident_event(&self, event: &IncidentEvent) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .incident_events
            .entry(event.incident_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn incident_events(&self, incident_id: Uuid) -> Result<Vec<IncidentEvent>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .incident_events
            .get(&incident_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_maintenance_windows(&self) -> Result<Vec<MaintenanceWindow>, StoreError> {
        Ok(self.inner.read().await.windows.values().cloned().collect())
    }

    async fn upsert_maintenance_window(&self, window: &MaintenanceWindow) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .windows
            .insert(window.id, window.clone());
        Ok(())
    }

    async fn delete_maintenance_window(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.windows.remove(&id).is_some())
    }

    async fn list_heartbeats(&self) -> Result<Vec<Heartbeat>, StoreError> {
        Ok(self.inner.read().await.heartbeats.values().cloned().collect())
    }

    async fn get_heartbeat(&self, monitor_id: Uuid) -> Result<Option<Heartbeat>, StoreError> {
        Ok(self.inner.read().await.heartbeats.get(&monitor_id).cloned())
    }

    async fn get_heartbeat_by_token(&self, token: &str) -> Result<Option<Heartbeat>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.heartbeats.values().find(|h| h.token == token).cloned())
    }

    async fn save_heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .heartbeats
            .insert(heartbeat.monitor_id, heartbeat.clone());
        Ok(())
    }

    async fn list_channels(&self) -> Result<Vec<NotificationChannel>, StoreError> {
        let inner = self.inner.read().await;
        let mut channels: Vec<NotificationChannel> = inner.channels.values().cloned().collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(channels)
    }

    async fn get_channel(&self, id: Uuid) -> Result<Option<NotificationChannel>, StoreError> {
        Ok(self.inner.read().await.channels.get(&id).cloned())
    }

    async fn upsert_channel(&self, channel: &NotificationChannel) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .channels
            .insert(channel.id, channel.clone());
        Ok(())
    }

    async fn assigned_channels(&self, monitor_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .monitors
            .get(&monitor_id)
            .map(|m| m.channel_ids.clone())
            .unwrap_or_default())
    }

    async fn uptime_ratio(
        &self,
        monitor_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError> {
        let inner = self.inner.read().await;
        let Some(ring) = inner.checks.get(&monitor_id) else {
            return Ok(None);
        };
        let (total, available) = ring.since(since).fold((0u64, 0u64), |(t, a), c| {
            let up = matches!(c.status, CheckStatus::Up | CheckStatus::Degraded);
            (t + 1, a + u64::from(up))
        });
        if total == 0 {
            return Ok(None);
        }
        Ok(Some(available as f64 / total as f64))
    }

    async fn latency_percentile(
        &self,
        monitor_id: Uuid,
        since: DateTime<Utc>,
        percentile: f64,
    ) -> Result<Option<u64>, StoreError> {
        let inner = self.inner.read().await;
        let Some(ring) = inner.checks.get(&monitor_id) else {
            return Ok(None);
        };
        let mut latencies: Vec<u64> = ring.since(since).map(|c| c.latency_ms).collect();
        if latencies.is_empty() {
            return Ok(None);
        }
        latencies.sort_unstable();
        let p = percentile.clamp(0.0, 100.0) / 100.0;
        let rank = (p * latencies.len() as f64).ceil() as usize;
        let idx = rank.saturating_sub(1).min(latencies.len() - 1);
        Ok(Some(latencies[idx]))
    }

    async fn count_checks(
        &self,
        monitor_id: Uuid,
        since: DateTime<Utc>,
        status: Option<CheckStatus>,
    ) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .checks
            .get(&monitor_id)
            .map(|ring| {
                ring.since(since)
                    .filter(|c| status.is_none_or(|s| c.status == s))
                    .count() as u64
            })
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IncidentState, ProbeKind};

    fn check(monitor_id: Uuid, status: CheckStatus, latency_ms: u64) -> CheckResult {
        CheckResult::new(monitor_id, status, "test").with_latency(latency_ms)
    }

    async fn stored_monitor(store: &MemoryStore) -> Uuid {
        let m = Monitor::new("api", ProbeKind::Http, "https://example.com");
        store.upsert_monitor(&m).await.unwrap();
        m.id
    }

    #[tokio::test]
    async fn delete_monitor_drops_runtime_rows() {
        let store = MemoryStore::default();
        let m = Monitor::new("api", ProbeKind::Http, "https://example.com");
        store.upsert_monitor(&m).await.unwrap();
        store.save_status(&MonitorStatus::pending(m.id)).await.unwrap();
        store.append_check(&check(m.id, CheckStatus::Up, 10)).await.unwrap();

        assert!(store.delete_monitor(m.id).await.unwrap());
        assert!(store.get_status(m.id).await.unwrap().is_none());
        assert!(store.recent_checks(m.id, 10).await.unwrap().is_empty());
        assert!(!store.delete_monitor(m.id).await.unwrap());
        assert!(store.save_status(&MonitorStatus::pending(m.id)).await.is_err());

        store.append_check(&check(m.id, CheckStatus::Up, 10)).await.unwrap();
        assert!(store.recent_checks(m.id, 10).await.unwrap().is_empty());
        assert_eq!(
            store.count_checks(m.id, Utc::now() - chrono::Duration::hours(1), None).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn checks_for_unknown_monitors_are_dropped() {
        let store = MemoryStore::default();
        let stray = Uuid::new_v4();
        store.append_check(&check(stray, CheckStatus::Down, 5)).await.unwrap();
        assert!(store.recent_checks(stray, 10).await.unwrap().is_empty());
        assert!(store.inner.read().await.checks.is_empty());
    }

    #[tokio::test]
    async fn open_incident_ignores_resolved() {
        let store = MemoryStore::default();
        let monitor_id = Uuid::new_v4();
        let mut resolved = Incident::open(monitor_id, "old", Utc::now());
        resolved.state = IncidentState::Resolved;
        store.insert_incident(&resolved).await.unwrap();
        assert!(store.open_incident(monitor_id).await.unwrap().is_none());

        let open = Incident::open(monitor_id, "new", Utc::now());
        store.insert_incident(&open).await.unwrap();
        assert_eq!(store.open_incident(monitor_id).await.unwrap().unwrap().id, open.id);
    }

    #[tokio::test]
    async fn update_unknown_incident_is_not_found() {
        let store = MemoryStore::default();
        let err = store
            .update_incident(&Incident::open(Uuid::new_v4(), "x", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "incident", .. }));
    }

    #[tokio::test]
    async fn analytics_over_history() {
        let store = MemoryStore::default();
        let id = stored_monitor(&store).await;
        let since = Utc::now() - chrono::Duration::hours(1);
        for (status, latency) in [
            (CheckStatus::Up, 10),
            (CheckStatus::Up, 20),
            (CheckStatus::Degraded, 30),
            (CheckStatus::Down, 40),
        ] {
            store.append_check(&check(id, status, latency)).await.unwrap();
        }

        assert_eq!(store.uptime_ratio(id, since).await.unwrap(), Some(0.75));
        assert_eq!(store.latency_percentile(id, since, 50.0).await.unwrap(), Some(20));
        assert_eq!(store.latency_percentile(id, since, 100.0).await.unwrap(), Some(40));
        assert_eq!(store.latency_percentile(id, since, 0.0).await.unwrap(), Some(10));
        assert_eq!(store.count_checks(id, since, None).await.unwrap(), 4);
        assert_eq!(
            store.count_checks(id, since, Some(CheckStatus::Down)).await.unwrap(),
            1
        );
        assert_eq!(store.uptime_ratio(Uuid::new_v4(), since).await.unwrap(), None);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let store = MemoryStore::new(2);
        let id = stored_monitor(&store).await;
        for latency in [1, 2, 3] {
            store.append_check(&check(id, CheckStatus::Up, latency)).await.unwrap();
        }
        let recent = store.recent_checks(id, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].latency_ms, 3);
    }

    #[tokio::test]
    async fn heartbeat_lookup_by_token() {
        let store = MemoryStore::default();
        let hb = Heartbeat::new(Uuid::new_v4(), 30).with_token("secret-token");
        store.save_heartbeat(&hb).await.unwrap();
        let found = store.get_heartbeat_by_token("secret-token").await.unwrap();
        assert_eq!(found.unwrap().monitor_id, hb.monitor_id);
        assert!(store.get_heartbeat_by_token("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enabled_channels_filtered_by_default_method() {
        let store = MemoryStore::default();
        let on = NotificationChannel::new("a", "log", serde_json::json!({}));
        let mut off = NotificationChannel::new("b", "log", serde_json::json!({}));
        off.enabled = false;
        store.upsert_channel(&on).await.unwrap();
        store.upsert_channel(&off).await.unwrap();
        let enabled = store.list_enabled_channels().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, on.id);
    }
}
