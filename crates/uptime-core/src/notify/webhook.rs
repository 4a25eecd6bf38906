use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;

use super::{Payload, SendError, Sender};
use crate::model::NotificationChannel;

pub const SIGNATURE_HEADER: &str = "X-Uptime-Signature-256";

const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// POSTs the JSON payload to `settings.url`. When `settings.secret` is set the
/// body is signed with HMAC-SHA256.
#[derive(Debug, Clone)]
pub struct WebhookSender {
    client: Client,
}

impl WebhookSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Sender for WebhookSender {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, channel: &NotificationChannel, payload: &Payload) -> Result<(), SendError> {
        let url = channel
            .setting_str("url")
            .ok_or_else(|| SendError::Config(format!("channel {} has no url", channel.name)))?;
        url::Url::parse(url).map_err(|e| SendError::Config(format!("invalid url {url:?}: {e}")))?;

        let timeout_ms = channel
            .settings
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        let body = serde_json::to_vec(payload).map_err(|e| SendError::Config(e.to_string()))?;

        let mut req = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .timeout(Duration::from_millis(timeout_ms));

        if let Some(secret) = channel.setting_str("secret") {
            let signature = sign_payload(&body, secret)?;
            req = req.header(SIGNATURE_HEADER, format!("sha256={signature}"));
        }

        let resp = req
            .body(body)
            .send()
            .await
            .map_err(|e| SendError::Request(format!("POST {url}: {e}")))?;

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

pub fn sign_payload(body: &[u8], secret: &str) -> Result<String, SendError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| SendError::Config(format!("invalid signing secret: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::EventType;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel(settings: serde_json::Value) -> NotificationChannel {
        NotificationChannel::new("ops", "webhook", settings)
    }

    #[test]
    fn hmac_signature_is_deterministic() {
        let body = b"test payload";
        let sig1 = sign_payload(body, "my-secret").unwrap();
        let sig2 = sign_payload(body, "my-secret").unwrap();
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);

        let sig3 = sign_payload(body, "other-secret").unwrap();
        assert_ne!(sig1, sig3);
    }

    #[tokio::test]
    async fn posts_signed_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header_exists(SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let ch = channel(serde_json::json!({
            "url": format!("{}/hook", server.uri()),
            "secret": "s3cret",
        }));
        let sender = WebhookSender::new(Client::new());
        sender
            .send(&ch, &Payload::new(EventType::Test, "hello"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn server_error_is_reported_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let ch = channel(serde_json::json!({ "url": server.uri() }));
        let err = WebhookSender::new(Client::new())
            .send(&ch, &Payload::new(EventType::Test, "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Http { status: 502, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_url_is_a_config_error() {
        let err = WebhookSender::new(Client::new())
            .send(&channel(serde_json::json!({})), &Payload::new(EventType::Test, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Config(_)));
    }
}
