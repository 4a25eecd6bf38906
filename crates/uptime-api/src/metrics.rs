use std::fmt::Write;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use chrono::{Duration, Utc};
use tracing::warn;

use uptime_core::{Status, Store};

use crate::state::AppState;

const STATES: [Status; 5] = [
    Status::Pending,
    Status::Up,
    Status::Down,
    Status::Degraded,
    Status::Paused,
];

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let out = render(&state).await;
    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        out,
    )
}

async fn render(state: &AppState) -> String {
    let mut out = String::with_capacity(4096);
    let store = state.engine.store();

    let monitors = match store.list_monitors().await {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "Failed to list monitors for metrics");
            Vec::new()
        }
    };

    let mut statuses = Vec::with_capacity(monitors.len());
    for m in &monitors {
        let status = state.engine.status(m.id).await.ok();
        statuses.push(status);
    }

    let _ = writeln!(out, "# TYPE uptime_monitor_info info");
    let _ = writeln!(out, "# HELP uptime_monitor_info Configured monitors");
    for m in &monitors {
        let _ = writeln!(
            out,
            "uptime_monitor_info{{monitor_id=\"{}\",name=\"{}\",kind=\"{}\"}} 1",
            m.id,
            escape(&m.name),
            m.kind
        );
    }

    let _ = writeln!(out, "# TYPE uptime_monitor_state stateset");
    let _ = writeln!(out, "# HELP uptime_monitor_state Current status of each monitor");
    for (m, status) in monitors.iter().zip(&statuses) {
        let current = status.as_ref().map(|s| s.status);
        for variant in STATES {
            let _ = writeln!(
                out,
                "uptime_monitor_state{{monitor_id=\"{}\",uptime_monitor_state=\"{}\"}} {}",
                m.id,
                variant,
                u8::from(current == Some(variant))
            );
        }
    }

    let _ = writeln!(out, "# TYPE uptime_monitor_consecutive_failures gauge");
    let _ = writeln!(
        out,
        "# HELP uptime_monitor_consecutive_failures Failed checks in a row"
    );
    for (m, status) in monitors.iter().zip(&statuses) {
        if let Some(s) = status {
            let _ = writeln!(
                out,
                "uptime_monitor_consecutive_failures{{monitor_id=\"{}\"}} {}",
                m.id, s.consec_fails
            );
        }
    }

    let _ = writeln!(out, "# TYPE uptime_monitor_latency_milliseconds gauge");
    let _ = writeln!(
        out,
        "# HELP uptime_monitor_latency_milliseconds Latency of the last check"
    );
    for (m, status) in monitors.iter().zip(&statuses) {
        if let Some(ms) = status.as_ref().and_then(|s| s.last_latency_ms) {
            let _ = writeln!(
                out,
                "uptime_monitor_latency_milliseconds{{monitor_id=\"{}\"}} {}",
                m.id, ms
            );
        }
    }

    let _ = writeln!(out, "# TYPE uptime_monitor_last_check_timestamp_seconds gauge");
    let _ = writeln!(
        out,
        "# HELP uptime_monitor_last_check_timestamp_seconds Unix timestamp of the last check"
    );
    for (m, status) in monitors.iter().zip(&statuses) {
        if let Some(t) = status.as_ref().and_then(|s| s.last_check_at) {
            let secs = t.timestamp() as f64 + (t.timestamp_subsec_millis() as f64 / 1000.0);
            let _ = writeln!(
                out,
                "uptime_monitor_last_check_timestamp_seconds{{monitor_id=\"{}\"}} {:.3}",
                m.id, secs
            );
        }
    }

    let since = Utc::now() - Duration::hours(24);
    let _ = writeln!(out, "# TYPE uptime_monitor_uptime_ratio gauge");
    let _ = writeln!(
        out,
        "# HELP uptime_monitor_uptime_ratio Share of passing checks over the last 24 hours"
    );
    for m in &monitors {
        match store.uptime_ratio(m.id, since).await {
            Ok(Some(ratio)) => {
                let _ = writeln!(
                    out,
                    "uptime_monitor_uptime_ratio{{monitor_id=\"{}\"}} {:.4}",
                    m.id, ratio
                );
            }
            Ok(None) => {}
            Err(e) => warn!(monitor_id = %m.id, error = %e, "Failed to compute uptime"),
        }
    }

    let incidents = store.list_incidents(None).await.unwrap_or_default();
    let open = incidents.iter().filter(|i| !i.is_resolved()).count();
    let _ = writeln!(out, "# TYPE uptime_open_incidents gauge");
    let _ = writeln!(out, "# HELP uptime_open_incidents Incidents not yet resolved");
    let _ = writeln!(out, "uptime_open_incidents {}", open);

    let _ = writeln!(out, "# TYPE uptime_incidents counter");
    let _ = writeln!(out, "# HELP uptime_incidents Incidents opened since start");
    let _ = writeln!(out, "uptime_incidents_total {}", incidents.len());

    let _ = writeln!(out, "# TYPE uptime_monitor_loops gauge");
    let _ = writeln!(out, "# HELP uptime_monitor_loops Running monitor loops");
    let _ = writeln!(out, "uptime_monitor_loops {}", state.engine.running_loops());

    let _ = writeln!(out, "# EOF");
    out
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
