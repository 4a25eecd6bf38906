use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::content::ContentChange;
use super::incident::IncidentManager;
use super::maintenance::MaintenanceGuard;
use super::EngineError;
use crate::model::{
    CheckResult, CheckStatus, Incident, IncidentEvent, IncidentEventKind, Monitor, MonitorStatus,
    Status,
};
use crate::notify::{Dispatcher, EventType, Payload};
use crate::probe::ProbeOutcome;
use crate::store::Store;

/// How one check moved the monitor's settled status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Below a threshold, or already in the reported state.
    Unchanged,
    /// Crossed the failure threshold from a non-failing status.
    Failed { from: Status, to: Status },
    /// Crossed the success threshold out of a failing status.
    Recovered { from: Status },
    /// Any other settled change: pending to up, or down to degraded and back.
    Settled { from: Status, to: Status },
}

/// Folds one logical check into the counters and settled status.
pub fn apply_result(monitor: &Monitor, status: &mut MonitorStatus, check: CheckStatus) -> Transition {
    let from = status.status;

    if check.is_pass() {
        status.consec_successes = status.consec_successes.saturating_add(1);
        status.consec_fails = 0;
        if status.consec_successes < monitor.success_threshold() || from == Status::Up {
            return Transition::Unchanged;
        }
        status.status = Status::Up;
        return if from.is_failing() {
            Transition::Recovered { from }
        } else {
            Transition::Settled { from, to: Status::Up }
        };
    }

    status.consec_fails = status.consec_fails.saturating_add(1);
    status.consec_successes = 0;
    if status.consec_fails < monitor.failure_threshold() {
        return Transition::Unchanged;
    }

    let to = check.settled();
    if from == to {
        return Transition::Unchanged;
    }
    status.status = to;
    if from.is_failing() {
        Transition::Settled { from, to }
    } else {
        Transition::Failed { from, to }
    }
}

/// Side effects produced while evaluating one check.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub check: CheckResult,
    pub transition: Transition,
    /// Incident opened, resolved or reminded about during this evaluation.
    pub incident: Option<Incident>,
    pub content_change: Option<ContentChange>,
    pub suppressed: bool,
}

/// Turns probe outcomes into status transitions, incidents and notifications.
///
/// Persistence failures are logged and never undo the in-memory counters.
pub struct Evaluator {
    store: Arc<dyn Store>,
    incidents: Arc<IncidentManager>,
    guard: MaintenanceGuard,
    dispatcher: Arc<Dispatcher>,
}

impl Evaluator {
    pub fn new(
        store: Arc<dyn Store>,
        incidents: Arc<IncidentManager>,
        guard: MaintenanceGuard,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            store,
            incidents,
            guard,
            dispatcher,
        }
    }

    pub async fn process(
        &self,
        monitor: &Monitor,
        status: &mut MonitorStatus,
        outcome: ProbeOutcome,
    ) -> Evaluation {
        let now = Utc::now();
        let logical = if monitor.upside_down {
            outcome.status.inverted()
        } else {
            outcome.status
        };

        let mut check = CheckResult::new(monitor.id, logical, outcome.message.clone())
            .with_latency(outcome.latency_ms);
        check.checked_at = now;
        check.status_code = outcome.status_code;
        check.cert_expires_at = outcome.cert_expires_at;
        check.dns_records = outcome.dns_records.clone();
        if let Err(e) = self.store.append_check(&check).await {
            warn!(monitor_id = %monitor.id, error = %e, "Failed to record check result");
        }

        let transition = apply_result(monitor, status, logical);
        status.last_check_at = Some(now);
        status.last_message = Some(outcome.message.clone());
        status.last_latency_ms = Some(outcome.latency_ms);

        let content_change = if monitor.content_check {
            detect_change(status, &outcome)
        } else {
            None
        };

        let alerting = content_change.is_some()
            || status.status.is_failing()
            || matches!(transition, Transition::Recovered { .. });
        let suppressed = alerting && self.guard.suppressed(monitor.id, now).await;

        let incident = match transition {
            Transition::Failed { to, .. } => {
                info!(monitor_id = %monitor.id, monitor = %monitor.name, status = %to, "Monitor failing");
                self.on_failure(monitor, &check.message, suppressed).await
            }
            Transition::Recovered { from } => {
                info!(monitor_id = %monitor.id, monitor = %monitor.name, from = %from, "Monitor recovered");
                self.on_recovery(monitor, suppressed).await
            }
            _ if status.status.is_failing() => self.remind(monitor, now, suppressed).await,
            _ => None,
        };

        if let Some(change) = &content_change {
            if suppressed {
                debug!(monitor_id = %monitor.id, "Content change notification suppressed");
            } else {
                self.dispatch(Payload::content_changed(monitor, change.clone()))
                    .await;
            }
        }

        if let Err(e) = self.store.save_status(status).await {
            warn!(monitor_id = %monitor.id, error = %e, "Failed to persist monitor status");
        }

        Evaluation {
            check,
            transition,
            incident,
            content_change,
            suppressed,
        }
    }

    async fn on_failure(&self, monitor: &Monitor, cause: &str, suppressed: bool) -> Option<Incident> {
        if suppressed {
            info!(monitor_id = %monitor.id, "Incident suppressed by maintenance window");
            return None;
        }

        let (incident, created) = match self.incidents.open(monitor.id, cause).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(monitor_id = %monitor.id, error = %e, "Failed to open incident");
                return None;
            }
        };
        if created {
            self.timeline(&incident, IncidentEventKind::CheckFailed, cause)
                .await;
            self.dispatch(Payload::incident(EventType::IncidentCreated, monitor, &incident))
                .await;
        }
        Some(incident)
    }

    async fn on_recovery(&self, monitor: &Monitor, suppressed: bool) -> Option<Incident> {
        let open = match self.store.open_incident(monitor.id).await {
            Ok(open) => open?,
            Err(e) => {
                warn!(monitor_id = %monitor.id, error = %e, "Failed to load open incident");
                return None;
            }
        };

        let resolved = match self.incidents.resolve(open.id, "system").await {
            Ok(resolved) => resolved,
            Err(EngineError::InvalidTransition { .. }) => {
                debug!(incident_id = %open.id, "Incident already resolved");
                return None;
            }
            Err(e) => {
                warn!(incident_id = %open.id, error = %e, "Failed to resolve incident");
                return None;
            }
        };
        self.timeline(&resolved, IncidentEventKind::CheckRecovered, "Check passed")
            .await;
        if !suppressed {
            self.dispatch(Payload::incident(EventType::IncidentResolved, monitor, &resolved))
                .await;
        }
        Some(resolved)
    }

    async fn remind(&self, monitor: &Monitor, now: DateTime<Utc>, suppressed: bool) -> Option<Incident> {
        if suppressed || monitor.resend_interval_secs == 0 {
            return None;
        }
        let open = match self.store.open_incident(monitor.id).await {
            Ok(open) => open?,
            Err(e) => {
                warn!(monitor_id = %monitor.id, error = %e, "Failed to load open incident");
                return None;
            }
        };
        if !self.incidents.reminder_due(&open, monitor, now) {
            return None;
        }

        match self.incidents.mark_reminded(open.id, now).await {
            Ok(Some(incident)) => {
                self.dispatch(Payload::incident(EventType::IncidentReminder, monitor, &incident))
                    .await;
                Some(incident)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(incident_id = %open.id, error = %e, "Failed to record reminder");
                None
            }
        }
    }

    async fn timeline(&self, incident: &Incident, kind: IncidentEventKind, message: &str) {
        let event = IncidentEvent::new(incident.id, kind, message);
        if let Err(e) = self.store.append_incident_event(&event).await {
            warn!(incident_id = %incident.id, error = %e, "Failed to append incident event");
        }
    }

    async fn dispatch(&self, payload: Payload) {
        let event = payload.event;
        if let Err(e) = self.dispatcher.notify(payload).await {
            warn!(event = %event, error = %e, "Failed to dispatch notification");
        }
    }
}

/// Compares the outcome's body hash against the last one seen and remembers
/// the new body. The first hash never counts as a change.
fn detect_change(status: &mut MonitorStatus, outcome: &ProbeOutcome) -> Option<ContentChange> {
    let new_hash = outcome.body_hash.clone()?;
    let previous_hash = status.last_body_hash.replace(new_hash.clone());
    let previous_body = std::mem::replace(&mut status.last_body, outcome.body.clone());

    match previous_hash {
        Some(old) if old != new_hash => Some(ContentChange::new(
            old,
            new_hash,
            previous_body.as_deref(),
            outcome.body.as_deref(),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProbeKind;
    use uuid::Uuid;

    fn monitor(fail: u32, success: u32) -> Monitor {
        Monitor::new("api", ProbeKind::Http, "https://example.com").with_thresholds(fail, success)
    }

    fn run(monitor: &Monitor, status: &mut MonitorStatus, checks: &[CheckStatus]) -> Vec<Transition> {
        checks.iter().map(|c| apply_result(monitor, status, *c)).collect()
    }

    #[test]
    fn fails_on_threshold_crossing_only() {
        let m = monitor(3, 1);
        let mut s = MonitorStatus::pending(m.id);
        let t = run(&m, &mut s, &[CheckStatus::Down, CheckStatus::Down, CheckStatus::Down, CheckStatus::Down]);
        assert_eq!(t[0], Transition::Unchanged);
        assert_eq!(t[1], Transition::Unchanged);
        assert_eq!(
            t[2],
            Transition::Failed {
                from: Status::Pending,
                to: Status::Down
            }
        );
        assert_eq!(t[3], Transition::Unchanged);
        assert_eq!(s.consec_fails, 4);
        assert_eq!(s.consec_successes, 0);
    }

    #[test]
    fn recovers_on_success_threshold() {
        let m = monitor(1, 2);
        let mut s = MonitorStatus::pending(m.id);
        run(&m, &mut s, &[CheckStatus::Down]);
        assert_eq!(s.status, Status::Down);

        let t = run(&m, &mut s, &[CheckStatus::Up, CheckStatus::Up]);
        assert_eq!(t[0], Transition::Unchanged);
        assert_eq!(s.status, Status::Up);
        assert_eq!(t[1], Transition::Recovered { from: Status::Down });
        assert_eq!(s.consec_fails, 0);
    }

    #[test]
    fn status_held_between_thresholds() {
        let m = monitor(2, 2);
        let mut s = MonitorStatus::pending(m.id);
        run(&m, &mut s, &[CheckStatus::Up, CheckStatus::Up]);
        assert_eq!(s.status, Status::Up);
        run(&m, &mut s, &[CheckStatus::Down]);
        assert_eq!(s.status, Status::Up);
        run(&m, &mut s, &[CheckStatus::Up, CheckStatus::Down]);
        assert_eq!(s.status, Status::Up);
    }

    #[test]
    fn pending_to_up_is_settled() {
        let m = monitor(1, 1);
        let mut s = MonitorStatus::pending(m.id);
        assert_eq!(
            apply_result(&m, &mut s, CheckStatus::Up),
            Transition::Settled {
                from: Status::Pending,
                to: Status::Up
            }
        );
    }

    #[test]
    fn degraded_and_down_swap_without_new_failure() {
        let m = monitor(1, 1);
        let mut s = MonitorStatus::pending(m.id);
        assert!(matches!(
            apply_result(&m, &mut s, CheckStatus::Degraded),
            Transition::Failed {
                to: Status::Degraded,
                ..
            }
        ));
        assert_eq!(
            apply_result(&m, &mut s, CheckStatus::Down),
            Transition::Settled {
                from: Status::Degraded,
                to: Status::Down
            }
        );
    }

    #[test]
    fn first_hash_is_not_a_change() {
        let mut s = MonitorStatus::pending(Uuid::new_v4());
        let first = ProbeOutcome::up("ok").with_body("h1".into(), "a".into());
        assert!(detect_change(&mut s, &first).is_none());

        let same = ProbeOutcome::up("ok").with_body("h1".into(), "a".into());
        assert!(detect_change(&mut s, &same).is_none());

        let changed = ProbeOutcome::up("ok").with_body("h2".into(), "b".into());
        let change = detect_change(&mut s, &changed).unwrap();
        assert_eq!(change.old_hash, "h1");
        assert_eq!(change.diff, "-a\n+b\n");
        assert_eq!(s.last_body_hash.as_deref(), Some("h2"));
    }
}
