use async_trait::async_trait;
use reqwest::Client;

use super::{Payload, SendError, Sender};
use crate::model::NotificationChannel;

/// Slack incoming-webhook message using `settings.webhook_url`.
#[derive(Debug, Clone)]
pub struct SlackSender {
    client: Client,
}

impl SlackSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn message_body(channel: &NotificationChannel, payload: &Payload) -> serde_json::Value {
    let mut body = serde_json::json!({ "text": payload.summary() });
    if let Some(target) = channel.setting_str("channel") {
        body["channel"] = serde_json::Value::String(target.to_string());
    }
    body
}

#[async_trait]
impl Sender for SlackSender {
    fn kind(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, channel: &NotificationChannel, payload: &Payload) -> Result<(), SendError> {
        let url = channel.setting_str("webhook_url").ok_or_else(|| {
            SendError::Config(format!("channel {} has no webhook_url", channel.name))
        })?;

        let resp = self
            .client
            .post(url)
            .json(&message_body(channel, payload))
            .send()
            .await
            .map_err(|e| SendError::Request(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(SendError::Http {
                url: url.to_string(),
                status: resp.status().as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::EventType;
    use wiremock::matchers::{body_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_summary_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({
                "text": "[TEST] ping",
                "channel": "#ops",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel = NotificationChannel::new(
            "slack-ops",
            "slack",
            serde_json::json!({ "webhook_url": server.uri(), "channel": "#ops" }),
        );
        SlackSender::new(Client::new())
            .send(&channel, &Payload::new(EventType::Test, "ping"))
            .await
            .unwrap();
    }
}
