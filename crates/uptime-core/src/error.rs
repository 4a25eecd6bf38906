use thiserror::Error;
use uuid::Uuid;

use crate::model::IncidentState;
use crate::notify::DispatchError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("Incident {incident_id} cannot move from {from} to {to}")]
    InvalidTransition {
        incident_id: Uuid,
        from: IncidentState,
        to: IncidentState,
    },
    #[error("Monitor {0} is not a heartbeat monitor")]
    NotHeartbeat(Uuid),
    #[error("Invalid monitor: {0}")]
    InvalidMonitor(String),
    #[error("Engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::NotFound { .. })
                | Self::Dispatch(DispatchError::ChannelNotFound(_))
                | Self::Dispatch(DispatchError::Store(StoreError::NotFound { .. }))
        )
    }
}
