use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use sha2::{Digest, Sha256};

use super::{Probe, ProbeError, ProbeOutcome};
use crate::model::{Monitor, ProbeKind};

/// GET probe. Any 2xx is up; slower than the monitor's degraded latency is degraded.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    max_body_bytes: usize,
}

impl HttpProbe {
    pub fn new(client: Client, max_body_bytes: usize) -> Self {
        Self {
            client,
            max_body_bytes,
        }
    }

    /// Client shared by probes and senders. Per-request timeouts come from each monitor.
    pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(20)
            .gzip(true)
            .user_agent(concat!("uptime-monitor/", env!("CARGO_PKG_VERSION")))
            .build()
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Http
    }

    async fn probe(&self, monitor: &Monitor) -> Result<ProbeOutcome, ProbeError> {
        let target = monitor.target.as_str();
        url::Url::parse(target).map_err(|e| ProbeError::InvalidTarget {
            target: target.to_string(),
            reason: e.to_string(),
        })?;

        let started = Instant::now();
        let response = self
            .client
            .get(target)
            .timeout(monitor.timeout())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout(monitor.timeout())
                } else {
                    ProbeError::Request {
                        target: target.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Http {
                target: target.to_string(),
                status: status.as_u16(),
            });
        }

        let body = if monitor.content_check {
            let text = response.text().await.map_err(|e| ProbeError::Request {
                target: target.to_string(),
                reason: e.to_string(),
            })?;
            Some(text)
        } else {
            None
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut outcome = match monitor.degraded_latency_ms {
            Some(limit) if latency_ms > limit => {
                ProbeOutcome::degraded(format!("HTTP {} in {}ms, above {}ms", status.as_u16(), latency_ms, limit))
            }
            _ => ProbeOutcome::up(format!("HTTP {}", status.as_u16())),
        }
        .with_latency(latency_ms)
        .with_status_code(status.as_u16());

        if let Some(body) = body {
            let hash = hex::encode(Sha256::digest(body.as_bytes()));
            outcome = outcome.with_body(hash, excerpt(&body, self.max_body_bytes));
        }

        Ok(outcome)
    }
}

fn excerpt(body: &str, max_bytes: usize) -> String {
    if body.len() <= max_bytes {
        return body.to_string();
    }
    let mut end = max_bytes;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CheckStatus;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn probe() -> HttpProbe {
        HttpProbe::new(HttpProbe::build_client(Duration::from_secs(5)).unwrap(), 1024)
    }

    #[tokio::test]
    async fn returns_up_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let monitor = Monitor::new("api", ProbeKind::Http, format!("{}/health", server.uri()));
        let outcome = probe().probe(&monitor).await.unwrap();
        assert_eq!(outcome.status, CheckStatus::Up);
        assert_eq!(outcome.status_code, Some(200));
        assert!(outcome.body_hash.is_none());
    }

    #[tokio::test]
    async fn returns_http_error_on_503() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let monitor = Monitor::new("api", ProbeKind::Http, format!("{}/health", server.uri()));
        let err = probe().probe(&monitor).await.unwrap_err();
        assert_eq!(err.status_code(), Some(503));
    }

    #[tokio::test]
    async fn hashes_body_when_content_check_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let monitor = Monitor::new("page", ProbeKind::Http, format!("{}/page", server.uri()))
            .with_content_check(true);
        let outcome = probe().probe(&monitor).await.unwrap();
        assert_eq!(
            outcome.body_hash.as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
        assert_eq!(outcome.body.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn slow_response_is_degraded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(150)))
            .mount(&server)
            .await;

        let monitor = Monitor::new("slow", ProbeKind::Http, format!("{}/slow", server.uri()))
            .with_degraded_latency(50);
        let outcome = probe().probe(&monitor).await.unwrap();
        assert_eq!(outcome.status, CheckStatus::Degraded);
    }

    #[tokio::test]
    async fn rejects_unparseable_target() {
        let monitor = Monitor::new("bad", ProbeKind::Http, "not a url");
        let err = probe().probe(&monitor).await.unwrap_err();
        assert!(matches!(err, ProbeError::InvalidTarget { .. }));
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "h");
        assert_eq!(excerpt("abc", 10), "abc");
    }
}
