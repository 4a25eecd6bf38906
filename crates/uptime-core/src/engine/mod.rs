//! The monitoring engine: per-monitor loops, the heartbeat watchdog and the
//! programmatic triggers exposed to the API.

mod content;
mod evaluator;
mod incident;
mod interval;
mod maintenance;
mod scheduler;
mod watchdog;

pub use content::{line_diff, ContentChange};
pub use evaluator::{apply_result, Evaluation, Evaluator, Transition};
pub use incident::IncidentManager;
pub use interval::next_interval;
pub use maintenance::MaintenanceGuard;
pub use scheduler::{CheckRequest, MonitorLoop};
pub use watchdog::Watchdog;

pub use crate::error::EngineError;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::model::{Heartbeat, Incident, Monitor, MonitorStatus, Status};
use crate::notify::{DispatchHandle, Dispatcher, EventType, Payload, SenderRegistry};
use crate::probe::{ProbeOutcome, ProbeRegistry};
use crate::store::{Store, StoreError};

const CHECK_QUEUE: usize = 8;

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    checks: mpsc::Sender<CheckRequest>,
}

/// Owns the monitor loops and the components they share.
pub struct Engine {
    store: Arc<dyn Store>,
    probes: Arc<ProbeRegistry>,
    evaluator: Arc<Evaluator>,
    incidents: Arc<IncidentManager>,
    guard: MaintenanceGuard,
    dispatcher: Arc<Dispatcher>,
    config: EngineConfig,
    root: CancellationToken,
    tracker: TaskTracker,
    loops: DashMap<Uuid, LoopHandle>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        probes: ProbeRegistry,
        senders: SenderRegistry,
        config: EngineConfig,
    ) -> Self {
        let incidents = Arc::new(IncidentManager::new(store.clone()));
        let guard = MaintenanceGuard::new(store.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            senders,
            config.dispatch.clone(),
        ));
        let evaluator = Arc::new(Evaluator::new(
            store.clone(),
            incidents.clone(),
            guard.clone(),
            dispatcher.clone(),
        ));

        Self {
            store,
            probes: Arc::new(probes),
            evaluator,
            incidents,
            guard,
            dispatcher,
            config,
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            loops: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn probes(&self) -> &ProbeRegistry {
        &self.probes
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn running_loops(&self) -> usize {
        self.loops.len()
    }

    pub fn is_running(&self, monitor_id: Uuid) -> bool {
        self.loops.contains_key(&monitor_id)
    }

    /// Starts a loop for every enabled probe-driven monitor plus the heartbeat
    /// watchdog. Returns the number of loops started.
    pub async fn start(&self) -> Result<usize, EngineError> {
        if self.root.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }

        let monitors = self.store.list_enabled_monitors().await?;
        let mut started = 0;
        for monitor in monitors.iter().filter(|m| !m.is_heartbeat()) {
            self.spawn_loop(monitor.id);
            started += 1;
        }

        let watchdog = Watchdog::new(
            self.store.clone(),
            self.evaluator.clone(),
            self.config.watchdog_interval,
        );
        self.tracker.spawn(watchdog.run(self.root.child_token()));

        info!(monitors = started, "Engine started");
        Ok(started)
    }

    fn spawn_loop(&self, monitor_id: Uuid) {
        if self.root.is_cancelled() {
            return;
        }
        self.stop_loop(monitor_id);

        let cancel = self.root.child_token();
        let (checks, requests) = mpsc::channel(CHECK_QUEUE);
        let monitor_loop = MonitorLoop {
            monitor_id,
            store: self.store.clone(),
            probes: self.probes.clone(),
            evaluator: self.evaluator.clone(),
            adaptive: self.config.adaptive.clone(),
            initial_jitter: self.config.initial_jitter,
            cancel: cancel.clone(),
            requests,
        };
        let task = self.tracker.spawn(monitor_loop.run());
        self.loops.insert(
            monitor_id,
            LoopHandle {
                cancel,
                task,
                checks,
            },
        );
    }

    fn stop_loop(&self, monitor_id: Uuid) -> Option<JoinHandle<()>> {
        self.loops.remove(&monitor_id).map(|(_, handle)| {
            handle.cancel.cancel();
            handle.task
        })
    }

    /// Stores the monitor and starts checking it if enabled. Heartbeat monitors
    /// get a heartbeat row with no grace period unless one exists.
    pub async fn add_monitor(&self, monitor: Monitor) -> Result<Monitor, EngineError> {
        validate(&monitor)?;
        self.store.upsert_monitor(&monitor).await?;

        let status = if monitor.enabled {
            MonitorStatus::pending(monitor.id)
        } else {
            MonitorStatus::paused(monitor.id)
        };
        self.store.save_status(&status).await?;

        if monitor.is_heartbeat() {
            if self.store.get_heartbeat(monitor.id).await?.is_none() {
                self.store.save_heartbeat(&Heartbeat::new(monitor.id, 0)).await?;
            }
        } else if monitor.enabled {
            self.spawn_loop(monitor.id);
        }
        info!(monitor_id = %monitor.id, monitor = %monitor.name, kind = %monitor.kind, "Monitor added");
        Ok(monitor)
    }

    /// Adds a heartbeat monitor with the given grace period.
    pub async fn add_heartbeat(
        &self,
        monitor: Monitor,
        grace_secs: u64,
    ) -> Result<Heartbeat, EngineError> {
        if !monitor.is_heartbeat() {
            return Err(EngineError::NotHeartbeat(monitor.id));
        }
        validate(&monitor)?;
        let heartbeat = Heartbeat::new(monitor.id, grace_secs);
        self.store.save_heartbeat(&heartbeat).await?;
        self.add_monitor(monitor).await?;
        Ok(heartbeat)
    }

    pub async fn pause(&self, monitor_id: Uuid) -> Result<Monitor, EngineError> {
        let mut monitor = self.load_monitor(monitor_id).await?;
        monitor.enabled = false;
        self.store.upsert_monitor(&monitor).await?;

        // The loop may still be finishing a probe; write the paused row after it exits.
        match self.stop_loop(monitor_id) {
            Some(task) => {
                let store = self.store.clone();
                self.tracker.spawn(async move {
                    let _ = task.await;
                    if let Err(e) = store.save_status(&MonitorStatus::paused(monitor_id)).await {
                        warn!(monitor_id = %monitor_id, error = %e, "Failed to persist paused status");
                    }
                });
            }
            None => self.store.save_status(&MonitorStatus::paused(monitor_id)).await?,
        }
        info!(monitor_id = %monitor_id, "Monitor paused");
        Ok(monitor)
    }

    /// Re-enables a monitor with fresh counters.
    pub async fn resume(&self, monitor_id: Uuid) -> Result<Monitor, EngineError> {
        let mut monitor = self.load_monitor(monitor_id).await?;
        monitor.enabled = true;
        self.store.upsert_monitor(&monitor).await?;
        self.store
            .save_status(&MonitorStatus::pending(monitor_id))
            .await?;
        if !monitor.is_heartbeat() {
            self.spawn_loop(monitor_id);
        }
        info!(monitor_id = %monitor_id, "Monitor resumed");
        Ok(monitor)
    }

    /// Stops the loop without waiting for an in-flight probe and removes the
    /// monitor's rows. Incidents are kept for history.
    pub async fn delete(&self, monitor_id: Uuid) -> Result<bool, EngineError> {
        self.stop_loop(monitor_id);
        let removed = self.store.delete_monitor(monitor_id).await?;
        self.incidents.forget(monitor_id);
        if removed {
            info!(monitor_id = %monitor_id, "Monitor deleted");
        }
        Ok(removed)
    }

    pub async fn acknowledge(&self, incident_id: Uuid, by: &str) -> Result<Incident, EngineError> {
        let incident = self.incidents.acknowledge(incident_id, by).await?;
        self.notify_incident(EventType::IncidentAcknowledged, &incident)
            .await;
        Ok(incident)
    }

    /// Manual resolution. Same state change and timeline entry as recovery.
    pub async fn resolve(&self, incident_id: Uuid, by: &str) -> Result<Incident, EngineError> {
        let incident = self.incidents.resolve(incident_id, by).await?;
        self.notify_incident(EventType::IncidentResolved, &incident)
            .await;
        Ok(incident)
    }

    async fn notify_incident(&self, event: EventType, incident: &Incident) {
        let monitor = match self.store.get_monitor(incident.monitor_id).await {
            Ok(Some(m)) => m,
            Ok(None) => return,
            Err(e) => {
                warn!(incident_id = %incident.id, error = %e, "Failed to load monitor for notification");
                return;
            }
        };
        if self.guard.suppressed(monitor.id, Utc::now()).await {
            return;
        }
        if let Err(e) = self
            .dispatcher
            .notify(Payload::incident(event, &monitor, incident))
            .await
        {
            warn!(incident_id = %incident.id, error = %e, "Failed to dispatch notification");
        }
    }

    pub async fn send_test(
        &self,
        channel_id: Uuid,
        incident_id: Option<Uuid>,
    ) -> Result<(), EngineError> {
        let incident = match incident_id {
            Some(id) => Some(
                self.store
                    .get_incident(id)
                    .await?
                    .ok_or_else(|| StoreError::not_found("incident", id))?,
            ),
            None => None,
        };
        self.dispatcher.send_test(channel_id, incident).await?;
        Ok(())
    }

    /// Records a push ping and evaluates it as a passing check.
    pub async fn record_ping(&self, token: &str) -> Result<MonitorStatus, EngineError> {
        let mut heartbeat = self
            .store
            .get_heartbeat_by_token(token)
            .await?
            .ok_or_else(|| StoreError::not_found("heartbeat", token))?;
        let monitor = self.load_monitor(heartbeat.monitor_id).await?;

        heartbeat.last_ping_at = Some(Utc::now());
        heartbeat.status = Status::Up;
        self.store.save_heartbeat(&heartbeat).await?;

        let mut status = self
            .store
            .get_status(monitor.id)
            .await?
            .unwrap_or_else(|| MonitorStatus::pending(monitor.id));
        if !monitor.enabled {
            return Ok(status);
        }
        self.evaluator
            .process(&monitor, &mut status, ProbeOutcome::up("Heartbeat received"))
            .await;
        Ok(status)
    }

    /// One watchdog pass at `now`, outside the periodic task.
    pub async fn sweep_heartbeats(&self, now: DateTime<Utc>) -> usize {
        Watchdog::new(
            self.store.clone(),
            self.evaluator.clone(),
            self.config.watchdog_interval,
        )
        .sweep(now)
        .await
    }

    /// Runs a probe and evaluates it immediately.
    ///
    /// A running loop performs the check itself and then reschedules from it.
    /// Monitors without a loop (paused, heartbeat, not yet started) are
    /// evaluated here against their stored status.
    pub async fn check_now(&self, monitor_id: Uuid) -> Result<Evaluation, EngineError> {
        let monitor = self.load_monitor(monitor_id).await?;

        let checks = self.loops.get(&monitor_id).map(|h| h.checks.clone());
        if let Some(checks) = checks {
            let (reply, answer) = oneshot::channel();
            if checks.send(reply).await.is_ok() {
                if let Ok(evaluation) = answer.await {
                    return Ok(evaluation);
                }
            }
            debug!(monitor_id = %monitor_id, "Monitor loop exited before answering, checking directly");
        }

        let mut status = self
            .store
            .get_status(monitor_id)
            .await?
            .unwrap_or_else(|| MonitorStatus::pending(monitor_id));
        let outcome = self.probes.run(&monitor).await;
        Ok(self.evaluator.process(&monitor, &mut status, outcome).await)
    }

    pub async fn notify(&self, payload: Payload) -> Result<DispatchHandle, EngineError> {
        Ok(self.dispatcher.notify(payload).await?)
    }

    pub async fn status(&self, monitor_id: Uuid) -> Result<MonitorStatus, EngineError> {
        let monitor = self.load_monitor(monitor_id).await?;
        let mut status = self
            .store
            .get_status(monitor_id)
            .await?
            .unwrap_or_else(|| MonitorStatus::pending(monitor_id));
        if !monitor.enabled {
            status.status = Status::Paused;
        }
        Ok(status)
    }

    pub async fn incident(&self, incident_id: Uuid) -> Result<Incident, EngineError> {
        Ok(self
            .store
            .get_incident(incident_id)
            .await?
            .ok_or_else(|| StoreError::not_found("incident", incident_id))?)
    }

    /// Cancels every loop and the watchdog, then waits up to `shutdown_grace`
    /// for in-flight probes and deliveries.
    pub async fn shutdown(&self) {
        info!(loops = self.loops.len(), "Engine shutting down");
        self.root.cancel();
        self.loops.clear();
        self.tracker.close();
        self.dispatcher.tracker().close();

        let drain = async {
            self.tracker.wait().await;
            self.dispatcher.tracker().wait().await;
        };
        if tokio::time::timeout(self.config.shutdown_grace, drain)
            .await
            .is_err()
        {
            warn!(
                grace_secs = self.config.shutdown_grace.as_secs(),
                "Shutdown grace elapsed with tasks still running"
            );
        }
        info!("Engine stopped");
    }

    async fn load_monitor(&self, monitor_id: Uuid) -> Result<Monitor, EngineError> {
        Ok(self
            .store
            .get_monitor(monitor_id)
            .await?
            .ok_or_else(|| StoreError::not_found("monitor", monitor_id))?)
    }
}

fn validate(monitor: &Monitor) -> Result<(), EngineError> {
    if monitor.name.trim().is_empty() {
        return Err(EngineError::InvalidMonitor("name must not be empty".into()));
    }
    if monitor.interval_secs == 0 {
        return Err(EngineError::InvalidMonitor("interval must be positive".into()));
    }
    if !monitor.is_heartbeat() && monitor.target.trim().is_empty() {
        return Err(EngineError::InvalidMonitor(format!(
            "{} monitors need a target",
            monitor.kind
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProbeKind;

    #[test]
    fn validation_rules() {
        let ok = Monitor::new("api", ProbeKind::Http, "https://example.com");
        assert!(validate(&ok).is_ok());
        assert!(validate(&Monitor::new("  ", ProbeKind::Http, "https://example.com")).is_err());
        assert!(validate(&Monitor::new("api", ProbeKind::Tcp, "")).is_err());
        assert!(validate(&ok.clone().with_interval(0)).is_err());
        assert!(validate(&Monitor::new("cron", ProbeKind::Heartbeat, "")).is_ok());
    }
}
