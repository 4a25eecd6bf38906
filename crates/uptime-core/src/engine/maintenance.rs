use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::store::Store;

/// Answers whether a monitor is inside an active maintenance window.
#[derive(Clone)]
pub struct MaintenanceGuard {
    store: Arc<dyn Store>,
}

impl MaintenanceGuard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// A store failure is logged and treated as not suppressed, so alerts
    /// still go out when windows cannot be read.
    pub async fn suppressed(&self, monitor_id: Uuid, at: DateTime<Utc>) -> bool {
        match self.store.list_maintenance_windows().await {
            Ok(windows) => windows
                .iter()
                .any(|w| w.active && w.applies_to(monitor_id) && w.covers(at)),
            Err(e) => {
                warn!(monitor_id = %monitor_id, error = %e, "Failed to load maintenance windows");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MaintenanceWindow, Schedule};
    use crate::store::MemoryStore;
    use chrono::Duration;

    #[tokio::test]
    async fn scoped_and_inactive_windows() {
        let store = Arc::new(MemoryStore::default());
        let now = Utc::now();
        let covered = Uuid::new_v4();
        let other = Uuid::new_v4();

        let window = MaintenanceWindow::new(
            "db upgrade",
            Schedule::Once {
                start: now - Duration::minutes(5),
                end: now + Duration::minutes(5),
            },
        )
        .for_monitors(vec![covered]);
        store.upsert_maintenance_window(&window).await.unwrap();

        let guard = MaintenanceGuard::new(store.clone());
        assert!(guard.suppressed(covered, now).await);
        assert!(!guard.suppressed(other, now).await);
        assert!(!guard.suppressed(covered, now + Duration::minutes(5)).await);

        let mut inactive = window.clone();
        inactive.active = false;
        store.upsert_maintenance_window(&inactive).await.unwrap();
        assert!(!guard.suppressed(covered, now).await);
    }
}
