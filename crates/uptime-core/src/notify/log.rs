use async_trait::async_trait;
use tracing::info;

use super::{Payload, SendError, Sender};
use crate::model::NotificationChannel;

/// Writes notifications to the log. Useful as a fallback channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSender;

#[async_trait]
impl Sender for LogSender {
    fn kind(&self) -> &'static str {
        "log"
    }

    async fn send(&self, channel: &NotificationChannel, payload: &Payload) -> Result<(), SendError> {
        info!(
            target: "uptime::notify",
            channel = %channel.name,
            event = %payload.event,
            monitor_id = ?payload.monitor_id(),
            "{}",
            payload.summary()
        );
        Ok(())
    }
}
