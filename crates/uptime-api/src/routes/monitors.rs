use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use uptime_core::{CheckResult, CheckStatus, Monitor, MonitorStatus, ProbeKind, Store};

use super::{parse_id, MessageResponse};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateMonitorRequest {
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
    #[serde(default)]
    pub channel_ids: Vec<Uuid>,
    /// Heartbeat monitors only.
    pub grace_secs: Option<u64>,
}

impl CreateMonitorRequest {
    fn into_monitor(self) -> Monitor {
        let mut m = Monitor::new(self.name, self.kind, self.target)
            .with_upside_down(self.upside_down)
            .with_content_check(self.content_check)
            .with_channels(self.channel_ids);
        if let Some(v) = self.interval_secs {
            m = m.with_interval(v);
        }
        if let Some(v) = self.timeout_secs {
            m = m.with_timeout(v);
        }
        if let Some(v) = self.failure_threshold {
            m.failure_threshold = v;
        }
        if let Some(v) = self.success_threshold {
            m.success_threshold = v;
        }
        if let Some(v) = self.resend_interval_secs {
            m = m.with_resend_interval(v);
        }
        if let Some(v) = self.degraded_latency_ms {
            m = m.with_degraded_latency(v);
        }
        m
    }
}

#[derive(Serialize)]
pub struct HeartbeatInfo {
    pub token: String,
    pub push_url: String,
    pub grace_secs: u64,
}

#[derive(Serialize)]
pub struct MonitorDetail {
    #[serde(flatten)]
    pub monitor: Monitor,
    pub status: MonitorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<HeartbeatInfo>,
}

#[derive(Serialize)]
pub struct MonitorSummary {
    pub id: Uuid,
    pub name: String,
    pub kind: ProbeKind,
    pub target: String,
    pub enabled: bool,
    pub status: String,
    pub last_check_at: Option<String>,
}

#[derive(Serialize)]
pub struct DeleteMonitorResponse {
    pub message: String,
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ChecksQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct ChecksResponse {
    pub monitor_id: Uuid,
    pub checks: Vec<CheckResult>,
}

#[derive(Debug, Deserialize)]
pub struct UptimeQuery {
    pub hours: Option<i64>,
}

#[derive(Serialize)]
pub struct UptimeResponse {
    pub monitor_id: Uuid,
    pub window_hours: i64,
    pub uptime_ratio: Option<f64>,
    pub total_checks: u64,
    pub down_checks: u64,
    pub p50_latency_ms: Option<u64>,
    pub p95_latency_ms: Option<u64>,
    pub p99_latency_ms: Option<u64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/monitors", post(create_monitor).get(list_monitors))
        .route("/monitors/{id}", get(get_monitor).delete(delete_monitor))
        .route("/monitors/{id}/pause", post(pause_monitor))
        .route("/monitors/{id}/resume", post(resume_monitor))
        .route("/monitors/{id}/check", post(check_monitor))
        .route("/monitors/{id}/checks", get(get_checks))
        .route("/monitors/{id}/uptime", get(get_uptime))
}

fn is_valid_url(s: &str) -> bool {
    url::Url::parse(s)
        .map(|u| u.scheme() == "http" || u.scheme() == "https")
        .unwrap_or(false)
}

async fn detail(state: &AppState, monitor: Monitor) -> Result<MonitorDetail, ApiError> {
    let status = state.engine.status(monitor.id).await?;
    let heartbeat = if monitor.is_heartbeat() {
        state
            .engine
            .store()
            .get_heartbeat(monitor.id)
            .await?
            .map(|hb| HeartbeatInfo {
                push_url: state.push_url(&hb.token),
                token: hb.token,
                grace_secs: hb.grace_secs,
            })
    } else {
        None
    };
    Ok(MonitorDetail {
        monitor,
        status,
        heartbeat,
    })
}

async fn load_monitor(state: &AppState, id: &str) -> Result<Monitor, ApiError> {
    let id = parse_id("monitor", id)?;
    state
        .engine
        .store()
        .get_monitor(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Monitor {id} not found")))
}

/// POST /api/v1/monitors
async fn create_monitor(
    State(state): State<AppState>,
    Json(body): Json<CreateMonitorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.kind == ProbeKind::Http && !is_valid_url(&body.target) {
        return Err(ApiError::BadRequest(format!("Invalid URL: {}", body.target)));
    }
    if body.kind != ProbeKind::Heartbeat && !state.engine.probes().kinds().contains(&body.kind) {
        return Err(ApiError::BadRequest(format!(
            "No probe available for {} monitors",
            body.kind
        )));
    }

    let grace = body.grace_secs;
    let monitor = body.into_monitor();
    let monitor = if monitor.is_heartbeat() {
        let saved = monitor.clone();
        state
            .engine
            .add_heartbeat(monitor, grace.unwrap_or(0))
            .await?;
        saved
    } else {
        state.engine.add_monitor(monitor).await?
    };

    Ok((StatusCode::CREATED, Json(detail(&state, monitor).await?)))
}

/// GET /api/v1/monitors
async fn list_monitors(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let monitors = state
        .engine
        .store()
        .list_monitors()
        .await?;

    let mut summaries = Vec::with_capacity(monitors.len());
    for m in monitors {
        let status = state.engine.status(m.id).await?;
        summaries.push(MonitorSummary {
            id: m.id,
            name: m.name,
            kind: m.kind,
            target: m.target,
            enabled: m.enabled,
            status: status.status.to_string(),
            last_check_at: status.last_check_at.map(|t| t.to_rfc3339()),
        });
    }
    Ok(Json(summaries))
}

/// GET /api/v1/monitors/:id
async fn get_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MonitorDetail>, ApiError> {
    let monitor = load_monitor(&state, &id).await?;
    Ok(Json(detail(&state, monitor).await?))
}

/// DELETE /api/v1/monitors/:id
async fn delete_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteMonitorResponse>, ApiError> {
    let id = parse_id("monitor", &id)?;
    if !state.engine.delete(id).await? {
        return Err(ApiError::NotFound(format!("Monitor {id} not found")));
    }
    Ok(Json(DeleteMonitorResponse {
        message: "Monitor stopped and deleted".into(),
        id,
    }))
}

/// POST /api/v1/monitors/:id/pause
async fn pause_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_id("monitor", &id)?;
    state.engine.pause(id).await?;
    Ok(MessageResponse::new("Monitor paused"))
}

/// POST /api/v1/monitors/:id/resume
async fn resume_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_id("monitor", &id)?;
    state.engine.resume(id).await?;
    Ok(MessageResponse::new("Monitor resumed"))
}

/// POST /api/v1/monitors/:id/check
async fn check_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CheckResult>, ApiError> {
    let monitor = load_monitor(&state, &id).await?;
    if monitor.is_heartbeat() {
        return Err(ApiError::BadRequest(
            "Heartbeat monitors are checked by pings".into(),
        ));
    }
    let evaluation = state.engine.check_now(monitor.id).await?;
    Ok(Json(evaluation.check))
}

/// GET /api/v1/monitors/:id/checks
async fn get_checks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ChecksQuery>,
) -> Result<Json<ChecksResponse>, ApiError> {
    let monitor = load_monitor(&state, &id).await?;
    let limit = query.limit.unwrap_or(100).min(1000);
    let checks = state
        .engine
        .store()
        .recent_checks(monitor.id, limit)
        .await?;
    Ok(Json(ChecksResponse {
        monitor_id: monitor.id,
        checks,
    }))
}

/// GET /api/v1/monitors/:id/uptime
async fn get_uptime(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UptimeQuery>,
) -> Result<Json<UptimeResponse>, ApiError> {
    let monitor = load_monitor(&state, &id).await?;
    let hours = query.hours.unwrap_or(24).clamp(1, 24 * 90);
    let since = Utc::now() - Duration::hours(hours);
    let store = state.engine.store();

    Ok(Json(UptimeResponse {
        monitor_id: monitor.id,
        window_hours: hours,
        uptime_ratio: store.uptime_ratio(monitor.id, since).await?,
        total_checks: store.count_checks(monitor.id, since, None).await?,
        down_checks: store
            .count_checks(monitor.id, since, Some(CheckStatus::Down))
            .await?,
        p50_latency_ms: store
            .latency_percentile(monitor.id, since, 50.0)
            .await?,
        p95_latency_ms: store
            .latency_percentile(monitor.id, since, 95.0)
            .await?,
        p99_latency_ms: store
            .latency_percentile(monitor.id, since, 99.0)
            .await?,
    }))
}
