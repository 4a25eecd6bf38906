use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::EngineError;
use crate::model::{Incident, IncidentEvent, IncidentEventKind, IncidentState, Monitor};
use crate::store::{Store, StoreError};

/// Open, acknowledge and resolve transitions.
///
/// Opening takes a per-monitor lock around the store's read-then-insert, so
/// concurrent callers for one monitor observe a single incident.
pub struct IncidentManager {
    store: Arc<dyn Store>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl IncidentManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, monitor_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(monitor_id).or_default().clone()
    }

    /// Returns the monitor's open incident, creating it when there is none.
    /// The flag is true only for a newly created incident.
    pub async fn open(
        &self,
        monitor_id: Uuid,
        cause: &str,
    ) -> Result<(Incident, bool), EngineError> {
        let lock = self.lock_for(monitor_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.store.open_incident(monitor_id).await? {
            return Ok((existing, false));
        }

        let incident = Incident::open(monitor_id, cause, Utc::now());
        self.store.insert_incident(&incident).await?;
        self.store
            .append_incident_event(&IncidentEvent::new(
                incident.id,
                IncidentEventKind::Created,
                cause,
            ))
            .await?;
        info!(monitor_id = %monitor_id, incident_id = %incident.id, cause, "Incident opened");
        Ok((incident, true))
    }

    pub async fn acknowledge(&self, incident_id: Uuid, by: &str) -> Result<Incident, EngineError> {
        let monitor_id = self.load(incident_id).await?.monitor_id;
        let lock = self.lock_for(monitor_id);
        let _guard = lock.lock().await;
        let mut incident = self.load(incident_id).await?;
        ensure_transition(&incident, IncidentState::Acknowledged)?;

        incident.state = IncidentState::Acknowledged;
        incident.acknowledged_at = Some(Utc::now());
        incident.acknowledged_by = Some(by.to_string());
        self.store.update_incident(&incident).await?;
        self.store
            .append_incident_event(&IncidentEvent::new(
                incident.id,
                IncidentEventKind::Acknowledged,
                format!("Acknowledged by {by}"),
            ))
            .await?;
        info!(incident_id = %incident.id, by, "Incident acknowledged");
        Ok(incident)
    }

    /// Shared by automatic recovery and manual resolution.
    pub async fn resolve(&self, incident_id: Uuid, by: &str) -> Result<Incident, EngineError> {
        let monitor_id = self.load(incident_id).await?.monitor_id;
        let lock = self.lock_for(monitor_id);
        let _guard = lock.lock().await;
        let mut incident = self.load(incident_id).await?;
        ensure_transition(&incident, IncidentState::Resolved)?;

        incident.state = IncidentState::Resolved;
        incident.resolved_at = Some(Utc::now());
        incident.resolved_by = Some(by.to_string());
        self.store.update_incident(&incident).await?;
        self.store
            .append_incident_event(&IncidentEvent::new(
                incident.id,
                IncidentEventKind::Resolved,
                format!("Resolved by {by}"),
            ))
            .await?;
        info!(monitor_id = %incident.monitor_id, incident_id = %incident.id, by, "Incident resolved");
        Ok(incident)
    }

    /// True once `resend_interval` has passed since the last reminder, or
    /// since the incident started when none was sent yet.
    pub fn reminder_due(&self, incident: &Incident, monitor: &Monitor, now: DateTime<Utc>) -> bool {
        if incident.is_resolved() || monitor.resend_interval_secs == 0 {
            return false;
        }
        let since = incident.last_reminder_at.unwrap_or(incident.started_at);
        let elapsed = now.signed_duration_since(since).num_seconds();
        elapsed >= 0 && elapsed as u64 >= monitor.resend_interval_secs
    }

    /// Records a reminder against the stored incident. Returns `None` if it
    /// was resolved in the meantime.
    pub async fn mark_reminded(
        &self,
        incident_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Incident>, EngineError> {
        let monitor_id = self.load(incident_id).await?.monitor_id;
        let lock = self.lock_for(monitor_id);
        let _guard = lock.lock().await;
        let mut incident = self.load(incident_id).await?;
        if incident.is_resolved() {
            return Ok(None);
        }
        incident.last_reminder_at = Some(at);
        self.store.update_incident(&incident).await?;
        Ok(Some(incident))
    }

    async fn load(&self, incident_id: Uuid) -> Result<Incident, EngineError> {
        self.store
            .get_incident(incident_id)
            .await?
            .ok_or_else(|| StoreError::not_found("incident", incident_id).into())
    }

    pub(crate) fn forget(&self, monitor_id: Uuid) {
        self.locks.remove(&monitor_id);
    }
}

fn ensure_transition(incident: &Incident, target: IncidentState) -> Result<(), EngineError> {
    if incident.state.can_transition_to(target) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            incident_id: incident.id,
            from: incident.state,
            to: target,
        })
    }
}
