mod channels;
mod incidents;
mod monitors;
mod push;

use axum::Router;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(monitors::router())
        .merge(incidents::router())
        .merge(channels::router())
        .merge(push::router())
}

pub(crate) fn parse_id(kind: &str, id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest(format!("Invalid {kind} ID: {id}")))
}

#[derive(Debug, serde::Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> axum::Json<Self> {
        axum::Json(Self {
            message: message.into(),
        })
    }
}
