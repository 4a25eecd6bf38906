use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct PushResponse {
    pub ok: bool,
    pub monitor_id: Uuid,
    pub status: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/push/{token}", get(push).post(push))
}

/// GET|POST /api/v1/push/:token
async fn push(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<PushResponse>, ApiError> {
    let status = state.engine.record_ping(&token).await.map_err(|e| {
        if e.is_not_found() {
            ApiError::NotFound("Unknown push token".into())
        } else {
            ApiError::from(e)
        }
    })?;
    Ok(Json(PushResponse {
        ok: true,
        monitor_id: status.monitor_id,
        status: status.status.to_string(),
    }))
}
