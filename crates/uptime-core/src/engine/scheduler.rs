use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::evaluator::{Evaluation, Evaluator};
use super::interval::next_interval;
use crate::config::AdaptiveConfig;
use crate::model::{MonitorStatus, Status};
use crate::probe::ProbeRegistry;
use crate::store::Store;

/// A request for an immediate check, answered with its evaluation.
pub type CheckRequest = oneshot::Sender<Evaluation>;

enum Wake {
    Cancelled,
    Elapsed,
    CheckNow(CheckRequest),
}

/// The timing loop for one monitor. Owns the monitor's status row while running.
///
/// Manual checks arrive on `requests` and are evaluated by the loop itself, so
/// the in-memory status never diverges from the stored one.
pub struct MonitorLoop {
    pub(crate) monitor_id: Uuid,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) probes: Arc<ProbeRegistry>,
    pub(crate) evaluator: Arc<Evaluator>,
    pub(crate) adaptive: AdaptiveConfig,
    pub(crate) initial_jitter: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) requests: mpsc::Receiver<CheckRequest>,
}

impl MonitorLoop {
    /// Runs until cancelled or until the monitor is deleted or disabled.
    ///
    /// An in-flight probe is allowed to finish after cancellation; its result
    /// is dropped without being evaluated.
    pub async fn run(mut self) {
        let id = self.monitor_id;
        let mut status = match self.store.get_status(id).await {
            Ok(Some(s)) if s.status != Status::Paused => s,
            Ok(_) => MonitorStatus::pending(id),
            Err(e) => {
                warn!(monitor_id = %id, error = %e, "Failed to load monitor status, starting fresh");
                MonitorStatus::pending(id)
            }
        };
        let mut multiplier = 1.0;
        let mut pending: Option<CheckRequest> = None;

        match self.pause(jitter(self.initial_jitter)).await {
            Wake::Cancelled => return,
            Wake::Elapsed => {}
            Wake::CheckNow(reply) => pending = Some(reply),
        }

        info!(monitor_id = %id, "Monitor loop started");
        loop {
            let monitor = match self.store.get_monitor(id).await {
                Ok(Some(m)) if m.enabled => m,
                Ok(_) => {
                    debug!(monitor_id = %id, "Monitor removed or disabled");
                    break;
                }
                Err(e) => {
                    warn!(monitor_id = %id, error = %e, "Failed to load monitor");
                    match self.pause(self.adaptive.min_interval).await {
                        Wake::Cancelled => break,
                        Wake::Elapsed => {}
                        Wake::CheckNow(reply) => pending = Some(reply),
                    }
                    continue;
                }
            };

            let outcome = self.probes.run(&monitor).await;
            if self.cancel.is_cancelled() {
                debug!(monitor_id = %id, "Discarding probe result after cancellation");
                break;
            }

            let evaluation = self.evaluator.process(&monitor, &mut status, outcome).await;
            let (delay, next) = next_interval(
                &self.adaptive,
                monitor.interval(),
                status.consec_successes,
                status.consec_fails,
                multiplier,
            );
            multiplier = next;
            trace!(
                monitor_id = %id,
                check = %evaluation.check.status,
                status = %status.status,
                next_check_secs = delay.as_secs(),
                "Check evaluated"
            );
            if let Some(reply) = pending.take() {
                let _ = reply.send(evaluation);
            }

            match self.pause(delay).await {
                Wake::Cancelled => break,
                Wake::Elapsed => {}
                Wake::CheckNow(reply) => {
                    debug!(monitor_id = %id, "Manual check requested");
                    pending = Some(reply);
                }
            }
        }
        info!(monitor_id = %id, "Monitor loop stopped");
    }

    /// Sleeps for `duration`, waking early on cancellation or a manual check.
    async fn pause(&mut self, duration: Duration) -> Wake {
        tokio::select! {
            _ = self.cancel.cancelled() => Wake::Cancelled,
            _ = tokio::time::sleep(duration) => Wake::Elapsed,
            Some(reply) = self.requests.recv() => Wake::CheckNow(reply),
        }
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_within_bounds() {
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(jitter(Duration::from_millis(250)) <= Duration::from_millis(250));
        }
    }
}
