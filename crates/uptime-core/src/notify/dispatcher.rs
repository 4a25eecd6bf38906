use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Payload, SendError, SenderRegistry};
use crate::config::DispatchConfig;
use crate::model::{Incident, NotificationChannel};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Channel {0} not found")]
    ChannelNotFound(Uuid),
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Final outcome of delivering one payload to one channel.
#[derive(Debug)]
pub struct DeliveryReport {
    pub channel_id: Uuid,
    pub channel_name: String,
    pub attempts: u32,
    pub result: Result<(), SendError>,
}

impl DeliveryReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Delivery tasks spawned by one [`Dispatcher::notify`] call.
///
/// Dropping the handle detaches the tasks; they keep running.
#[derive(Debug, Default)]
pub struct DispatchHandle {
    tasks: Vec<JoinHandle<DeliveryReport>>,
}

impl DispatchHandle {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub async fn wait(self) -> Vec<DeliveryReport> {
        join_all(self.tasks)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(error = %e, "Delivery task panicked");
                    None
                }
            })
            .collect()
    }
}

/// Fans payloads out to matching channels with bounded concurrency.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    senders: Arc<SenderRegistry>,
    semaphore: Arc<Semaphore>,
    config: DispatchConfig,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, senders: SenderRegistry, config: DispatchConfig) -> Self {
        Self {
            store,
            senders: Arc::new(senders),
            semaphore: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
            tracker: TaskTracker::new(),
        }
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn senders(&self) -> &SenderRegistry {
        &self.senders
    }

    /// Channels that should receive `payload`: enabled, accepting the event
    /// type, and within the monitor's assigned subset when there is one.
    async fn matching_channels(
        &self,
        payload: &Payload,
    ) -> Result<Vec<NotificationChannel>, StoreError> {
        let event = payload.event.as_str();
        let mut channels: Vec<NotificationChannel> = self
            .store
            .list_enabled_channels()
            .await?
            .into_iter()
            .filter(|c| c.accepts(event))
            .collect();

        if let Some(monitor_id) = payload.monitor_id() {
            let assigned = self.store.assigned_channels(monitor_id).await?;
            if !assigned.is_empty() {
                channels.retain(|c| assigned.contains(&c.id));
            }
        }
        Ok(channels)
    }

    /// Spawn one delivery task per matching channel and return immediately.
    pub async fn notify(&self, payload: Payload) -> Result<DispatchHandle, DispatchError> {
        let channels = self.matching_channels(&payload).await?;
        debug!(
            event = %payload.event,
            channels = channels.len(),
            "Dispatching notification"
        );

        let payload = Arc::new(payload);
        let tasks = channels
            .into_iter()
            .map(|channel| {
                let delivery = deliver(
                    channel,
                    payload.clone(),
                    self.senders.clone(),
                    self.semaphore.clone(),
                    self.config.clone(),
                );
                self.tracker.spawn(delivery)
            })
            .collect();

        Ok(DispatchHandle { tasks })
    }

    /// Single attempt to one channel, ignoring filters. The error is returned
    /// to the caller instead of being logged.
    pub async fn send_test(
        &self,
        channel_id: Uuid,
        incident: Option<Incident>,
    ) -> Result<(), DispatchError> {
        let channel = self
            .store
            .get_channel(channel_id)
            .await?
            .ok_or(DispatchError::ChannelNotFound(channel_id))?;
        let sender = self
            .senders
            .get(&channel.kind)
            .ok_or_else(|| SendError::Config(format!("unknown channel type {:?}", channel.kind)))?;

        let payload = Payload::test(incident);
        let timeout = self.config.delivery_timeout;
        tokio::time::timeout(timeout, sender.send(&channel, &payload))
            .await
            .map_err(|_| SendError::Timeout(timeout))??;
        Ok(())
    }
}

async fn deliver(
    channel: NotificationChannel,
    payload: Arc<Payload>,
    senders: Arc<SenderRegistry>,
    semaphore: Arc<Semaphore>,
    config: DispatchConfig,
) -> DeliveryReport {
    let report = |attempts, result| DeliveryReport {
        channel_id: channel.id,
        channel_name: channel.name.clone(),
        attempts,
        result,
    };

    // Held until this task returns, across backoff sleeps.
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return report(0, Err(SendError::Request("dispatcher closed".into()))),
    };

    let Some(sender) = senders.get(&channel.kind) else {
        let err = SendError::Config(format!("unknown channel type {:?}", channel.kind));
        warn!(channel = %channel.name, event = %payload.event, error = %err, "Notification not delivered");
        return report(0, Err(err));
    };

    let mut attempts = 0u32;
    let attempt_loop = async {
        let mut last_error = None;
        for attempt in 0..=config.max_retries {
            if attempt > 0 {
                let backoff = config.base_backoff * 2u32.saturating_pow(attempt - 1);
                debug!(
                    channel = %channel.name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying notification"
                );
                tokio::time::sleep(backoff).await;
            }

            attempts += 1;
            match sender.send(&channel, &payload).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    debug!(channel = %channel.name, attempt, error = %e, "Notification attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SendError::Request("no attempts made".into())))
    };

    let result = match tokio::time::timeout(config.delivery_timeout, attempt_loop).await {
        Ok(result) => result,
        Err(_) => Err(SendError::Timeout(config.delivery_timeout)),
    };

    match &result {
        Ok(()) => debug!(channel = %channel.name, event = %payload.event, attempts, "Notification delivered"),
        Err(e) => warn!(
            channel = %channel.name,
            event = %payload.event,
            attempts,
            error = %e,
            "Notification delivery failed"
        ),
    }

    report(attempts, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Monitor, ProbeKind};
    use crate::notify::{EventType, Sender};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails for channels whose name starts with "bad", counting every call.
    #[derive(Default)]
    struct FlakySender {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Sender for FlakySender {
        fn kind(&self) -> &'static str {
            "flaky"
        }

        async fn send(&self, channel: &NotificationChannel, _payload: &Payload) -> Result<(), SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if channel.name.starts_with("bad") {
                Err(SendError::Request("connection reset".into()))
            } else {
                Ok(())
            }
        }
    }

    /// Tracks how many sends overlap, holding each for one second.
    #[derive(Default)]
    struct SlowSender {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Sender for SlowSender {
        fn kind(&self) -> &'static str {
            "slow"
        }

        async fn send(&self, _channel: &NotificationChannel, _payload: &Payload) -> Result<(), SendError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Never answers.
    struct StuckSender;

    #[async_trait]
    impl Sender for StuckSender {
        fn kind(&self) -> &'static str {
            "stuck"
        }

        async fn send(&self, _channel: &NotificationChannel, _payload: &Payload) -> Result<(), SendError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    async fn dispatcher_with(
        channels: &[NotificationChannel],
        sender: Arc<dyn Sender>,
        config: DispatchConfig,
    ) -> Dispatcher {
        let store = Arc::new(MemoryStore::default());
        for ch in channels {
            store.upsert_channel(ch).await.unwrap();
        }
        let mut registry = SenderRegistry::new();
        registry.register(sender);
        Dispatcher::new(store, registry, config)
    }

    async fn setup(channels: &[NotificationChannel]) -> (Dispatcher, Arc<FlakySender>) {
        let sender = Arc::new(FlakySender::default());
        let dispatcher = dispatcher_with(channels, sender.clone(), DispatchConfig::default()).await;
        (dispatcher, sender)
    }

    fn flaky(name: &str) -> NotificationChannel {
        NotificationChannel::new(name, "flaky", serde_json::json!({}))
    }

    #[tokio::test(start_paused = true)]
    async fn failing_channel_backs_off_exponentially() {
        let (dispatcher, sender) = setup(&[flaky("bad-1")]).await;
        let started = tokio::time::Instant::now();
        let reports = dispatcher
            .notify(Payload::new(EventType::Test, "x"))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].attempts, 4);
        assert!(!reports[0].is_success());
        assert_eq!(sender.calls.load(Ordering::SeqCst), 4);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2 + 4 + 8));
        assert!(elapsed < Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded_across_channels() {
        let channels: Vec<_> = (0..5)
            .map(|i| NotificationChannel::new(format!("slow-{i}"), "slow", serde_json::json!({})))
            .collect();
        let sender = Arc::new(SlowSender::default());
        let config = DispatchConfig {
            max_concurrency: 2,
            ..DispatchConfig::default()
        };
        let dispatcher = dispatcher_with(&channels, sender.clone(), config).await;

        let reports = dispatcher
            .notify(Payload::new(EventType::Test, "x"))
            .await
            .unwrap()
            .wait()
            .await;
        assert_eq!(reports.len(), 5);
        assert!(reports.iter().all(DeliveryReport::is_success));
        let peak = sender.peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak = {peak}");
        assert_eq!(peak, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_sender_times_out_after_one_attempt() {
        let channel = NotificationChannel::new("hung", "stuck", serde_json::json!({}));
        let config = DispatchConfig {
            delivery_timeout: Duration::from_secs(5),
            ..DispatchConfig::default()
        };
        let dispatcher = dispatcher_with(&[channel], Arc::new(StuckSender), config).await;

        let started = tokio::time::Instant::now();
        let reports = dispatcher
            .notify(Payload::new(EventType::Test, "x"))
            .await
            .unwrap()
            .wait()
            .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].attempts, 1);
        assert!(matches!(reports[0].result, Err(SendError::Timeout(_))));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn unknown_kind_fails_without_retry() {
        let (dispatcher, sender) = setup(&[NotificationChannel::new(
            "pager",
            "pagerduty",
            serde_json::json!({}),
        )])
        .await;
        let reports = dispatcher
            .notify(Payload::new(EventType::Test, "x"))
            .await
            .unwrap()
            .wait()
            .await;
        assert_eq!(reports[0].attempts, 0);
        assert!(matches!(reports[0].result, Err(SendError::Config(_))));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn filters_by_event_and_enabled_flag() {
        let mut disabled = flaky("off");
        disabled.enabled = false;
        let resolved_only = flaky("resolved").with_events(vec!["incident.resolved".into()]);
        let (dispatcher, _) = setup(&[flaky("all"), disabled, resolved_only]).await;

        let reports = dispatcher
            .notify(Payload::new(EventType::IncidentCreated, "x"))
            .await
            .unwrap()
            .wait()
            .await;
        let names: Vec<_> = reports.iter().map(|r| r.channel_name.as_str()).collect();
        assert_eq!(names, vec!["all"]);
    }

    #[tokio::test]
    async fn respects_monitor_channel_assignment() {
        let b = flaky("b");
        let (dispatcher, _) = setup(&[flaky("a"), b.clone()]).await;
        let monitor =
            Monitor::new("api", ProbeKind::Http, "https://example.com").with_channels(vec![b.id]);
        dispatcher.store.upsert_monitor(&monitor).await.unwrap();

        let incident = Incident::open(monitor.id, "down", chrono::Utc::now());
        let reports = dispatcher
            .notify(Payload::incident(EventType::IncidentCreated, &monitor, &incident))
            .await
            .unwrap()
            .wait()
            .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].channel_id, b.id);
    }

    #[tokio::test]
    async fn send_test_surfaces_errors() {
        let bad = flaky("bad-test");
        let good = flaky("good-test");
        let (dispatcher, sender) = setup(&[bad.clone(), good.clone()]).await;

        assert!(dispatcher.send_test(good.id, None).await.is_ok());
        let err = dispatcher.send_test(bad.id, None).await.unwrap_err();
        assert!(matches!(err, DispatchError::Send(SendError::Request(_))));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 2);

        let missing = dispatcher.send_test(Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(missing, DispatchError::ChannelNotFound(_)));
    }
}
