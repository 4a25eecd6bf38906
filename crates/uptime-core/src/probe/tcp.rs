use std::time::Instant;

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{Probe, ProbeError, ProbeOutcome};
use crate::model::{Monitor, ProbeKind};

/// Connects to `host:port` and reports the connect latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Tcp
    }

    async fn probe(&self, monitor: &Monitor) -> Result<ProbeOutcome, ProbeError> {
        let target = monitor.target.as_str();
        let valid_port = target
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid_port {
            return Err(ProbeError::InvalidTarget {
                target: target.to_string(),
                reason: "expected host:port".into(),
            });
        }

        let started = Instant::now();
        let stream = TcpStream::connect(target)
            .await
            .map_err(|e| ProbeError::Request {
                target: target.to_string(),
                reason: e.to_string(),
            })?;
        let latency_ms = started.elapsed().as_millis() as u64;
        drop(stream);

        Ok(ProbeOutcome::up(format!("Connected to {target}")).with_latency(latency_ms))
    }
}
