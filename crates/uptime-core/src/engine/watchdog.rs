use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::evaluator::Evaluator;
use crate::model::MonitorStatus;
use crate::probe::ProbeOutcome;
use crate::store::Store;

/// Periodic sweep that turns overdue heartbeats into failed checks.
pub struct Watchdog {
    store: Arc<dyn Store>,
    evaluator: Arc<Evaluator>,
    interval: Duration,
}

impl Watchdog {
    pub fn new(store: Arc<dyn Store>, evaluator: Arc<Evaluator>, interval: Duration) -> Self {
        Self {
            store,
            evaluator,
            interval,
        }
    }

    /// Drives every expired heartbeat through the failure path once.
    /// Returns how many were expired.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let monitors = match self.store.list_enabled_monitors().await {
            Ok(monitors) => monitors,
            Err(e) => {
                warn!(error = %e, "Watchdog failed to list monitors");
                return 0;
            }
        };

        let mut expired = 0;
        for monitor in monitors.iter().filter(|m| m.is_heartbeat()) {
            let heartbeat = match self.store.get_heartbeat(monitor.id).await {
                Ok(Some(hb)) => hb,
                Ok(None) => continue,
                Err(e) => {
                    warn!(monitor_id = %monitor.id, error = %e, "Failed to load heartbeat");
                    continue;
                }
            };
            if !heartbeat.is_expired(monitor.interval(), now) {
                continue;
            }
            expired += 1;

            let mut status = match self.store.get_status(monitor.id).await {
                Ok(Some(s)) => s,
                Ok(None) => MonitorStatus::pending(monitor.id),
                Err(e) => {
                    warn!(monitor_id = %monitor.id, error = %e, "Failed to load status");
                    MonitorStatus::pending(monitor.id)
                }
            };
            let message = match heartbeat.last_ping_at {
                Some(at) => format!("No heartbeat since {}", at.to_rfc3339()),
                None => "No heartbeat received".to_string(),
            };
            debug!(monitor_id = %monitor.id, deadline = %heartbeat.deadline(monitor.interval()), "Heartbeat overdue");
            self.evaluator
                .process(monitor, &mut status, ProbeOutcome::down(message))
                .await;

            // Re-read so a ping that raced this sweep keeps its timestamp.
            match self.store.get_heartbeat(monitor.id).await {
                Ok(Some(mut latest)) if latest.last_ping_at == heartbeat.last_ping_at => {
                    latest.status = status.status;
                    if let Err(e) = self.store.save_heartbeat(&latest).await {
                        warn!(monitor_id = %monitor.id, error = %e, "Failed to save heartbeat");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(monitor_id = %monitor.id, error = %e, "Failed to reload heartbeat"),
            }
        }
        expired
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(interval_secs = self.interval.as_secs(), "Heartbeat watchdog started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let expired = self.sweep(Utc::now()).await;
                    if expired > 0 {
                        debug!(expired, "Watchdog sweep finished");
                    }
                }
            }
        }
        debug!("Heartbeat watchdog stopped");
    }
}
