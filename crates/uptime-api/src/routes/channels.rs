use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use uptime_core::{NotificationChannel, Store};

use super::{parse_id, MessageResponse};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TestRequest {
    pub incident_id: Option<Uuid>,
}

/// Channel as listed by the API. Settings are omitted since they may hold secrets.
#[derive(Serialize)]
pub struct ChannelSummary {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub events: Vec<String>,
    pub enabled: bool,
}

impl From<NotificationChannel> for ChannelSummary {
    fn from(c: NotificationChannel) -> Self {
        Self {
            id: c.id,
            name: c.name,
            kind: c.kind,
            events: c.events,
            enabled: c.enabled,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/channels", get(list_channels).post(create_channel))
        .route("/channels/{id}/test", post(test_channel))
}

/// GET /api/v1/channels
async fn list_channels(State(state): State<AppState>) -> Result<Json<Vec<ChannelSummary>>, ApiError> {
    let channels = state.engine.store().list_channels().await?;
    Ok(Json(channels.into_iter().map(ChannelSummary::from).collect()))
}

/// POST /api/v1/channels
async fn create_channel(
    State(state): State<AppState>,
    Json(body): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".into()));
    }
    let senders = state.engine.dispatcher().senders();
    if senders.get(&body.kind).is_none() {
        return Err(ApiError::BadRequest(format!(
            "Unknown channel type {:?}, expected one of: {}",
            body.kind,
            senders.kinds().join(", ")
        )));
    }

    let settings = if body.settings.is_null() {
        serde_json::json!({})
    } else {
        body.settings
    };
    let channel = NotificationChannel::new(body.name, body.kind, settings).with_events(body.events);
    state.engine.store().upsert_channel(&channel).await?;
    tracing::info!(channel_id = %channel.id, channel = %channel.name, "Channel created");

    Ok((StatusCode::CREATED, Json(ChannelSummary::from(channel))))
}

/// POST /api/v1/channels/:id/test
async fn test_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<TestRequest>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_id("channel", &id)?;
    let req = body.map(|Json(b)| b).unwrap_or_default();
    state.engine.send_test(id, req.incident_id).await?;
    Ok(MessageResponse::new("Test notification delivered"))
}
