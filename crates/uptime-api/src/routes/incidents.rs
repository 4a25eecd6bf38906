use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use uptime_core::{Incident, IncidentEvent, Store};

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IncidentsQuery {
    pub monitor_id: Option<Uuid>,
    /// Only incidents that are not resolved.
    #[serde(default)]
    pub open: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActorRequest {
    pub by: Option<String>,
}

impl ActorRequest {
    fn actor(&self) -> &str {
        self.by.as_deref().filter(|s| !s.trim().is_empty()).unwrap_or("api")
    }
}

#[derive(Serialize)]
pub struct EventsResponse {
    pub incident_id: Uuid,
    pub events: Vec<IncidentEvent>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/incidents", get(list_incidents))
        .route("/incidents/{id}", get(get_incident))
        .route("/incidents/{id}/events", get(get_events))
        .route("/incidents/{id}/acknowledge", post(acknowledge))
        .route("/incidents/{id}/resolve", post(resolve))
}

/// GET /api/v1/incidents
async fn list_incidents(
    State(state): State<AppState>,
    Query(query): Query<IncidentsQuery>,
) -> Result<Json<Vec<Incident>>, ApiError> {
    let mut incidents = state.engine.store().list_incidents(query.monitor_id).await?;
    if query.open {
        incidents.retain(|i| !i.is_resolved());
    }
    Ok(Json(incidents))
}

/// GET /api/v1/incidents/:id
async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Incident>, ApiError> {
    let id = parse_id("incident", &id)?;
    Ok(Json(state.engine.incident(id).await?))
}

/// GET /api/v1/incidents/:id/events
async fn get_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EventsResponse>, ApiError> {
    let id = parse_id("incident", &id)?;
    let incident = state.engine.incident(id).await?;
    let events = state.engine.store().incident_events(incident.id).await?;
    Ok(Json(EventsResponse {
        incident_id: incident.id,
        events,
    }))
}

/// POST /api/v1/incidents/:id/acknowledge
async fn acknowledge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ActorRequest>>,
) -> Result<Json<Incident>, ApiError> {
    let id = parse_id("incident", &id)?;
    let req = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(state.engine.acknowledge(id, req.actor()).await?))
}

/// POST /api/v1/incidents/:id/resolve
async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ActorRequest>>,
) -> Result<Json<Incident>, ApiError> {
    let id = parse_id("incident", &id)?;
    let req = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(state.engine.resolve(id, req.actor()).await?))
}
