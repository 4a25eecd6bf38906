use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for adaptive check intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// When false every monitor is checked at its base interval.
    pub enabled: bool,
    /// Consecutive successes before the interval starts stretching.
    pub stable_threshold: u32,
    /// Factor applied to the multiplier on each stable cycle.
    pub slowdown_step: f64,
    /// Multiplier used right after a slowed-down monitor fails. Must be < 1.0.
    pub speedup_multiplier: f64,
    /// Ceiling for the multiplier.
    pub max_slowdown: f64,
    /// Hard floor on any computed interval.
    pub min_interval: Duration,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stable_threshold: 5,
            slowdown_step: 1.5,
            speedup_multiplier: 0.5,
            max_slowdown: 2.0,
            min_interval: Duration::from_secs(5),
        }
    }
}

/// Notification fan-out limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Deliveries in flight across all channels.
    pub max_concurrency: usize,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry, doubled on each further retry.
    pub base_backoff: Duration,
    /// Upper bound on one delivery including every retry.
    pub delivery_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            max_retries: 3,
            base_backoff: Duration::from_secs(2),
            delivery_timeout: Duration::from_secs(60),
        }
    }
}

/// Configuration for an [`Engine`](crate::engine::Engine) instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub adaptive: AdaptiveConfig,
    pub dispatch: DispatchConfig,
    /// Period of the heartbeat watchdog sweep.
    pub watchdog_interval: Duration,
    /// Upper bound of the random delay before a loop's first probe.
    pub initial_jitter: Duration,
    /// Check results retained per monitor by the in-memory store.
    pub check_history_limit: usize,
    /// Longest body excerpt kept for content diffs.
    pub max_body_bytes: usize,
    /// Time given to in-flight probes and deliveries on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            adaptive: AdaptiveConfig::default(),
            dispatch: DispatchConfig::default(),
            watchdog_interval: Duration::from_secs(30),
            initial_jitter: Duration::from_secs(2),
            check_history_limit: 1000,
            max_body_bytes: 64 * 1024,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    pub fn with_adaptive(mut self, adaptive: AdaptiveConfig) -> Self {
        self.adaptive = adaptive;
        self
    }

    pub fn with_adaptive_enabled(mut self, enabled: bool) -> Self {
        self.adaptive.enabled = enabled;
        self
    }

    pub fn with_min_interval(mut self, secs: u64) -> Self {
        self.adaptive.min_interval = Duration::from_secs(secs);
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.dispatch.max_concurrency = max.max(1);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.dispatch.max_retries = retries;
        self
    }

    pub fn with_base_backoff(mut self, ms: u64) -> Self {
        self.dispatch.base_backoff = Duration::from_millis(ms);
        self
    }

    pub fn with_delivery_timeout(mut self, secs: u64) -> Self {
        self.dispatch.delivery_timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_watchdog_interval(mut self, secs: u64) -> Self {
        self.watchdog_interval = Duration::from_secs(secs.max(1));
        self
    }

    pub fn with_initial_jitter(mut self, ms: u64) -> Self {
        self.initial_jitter = Duration::from_millis(ms);
        self
    }

    pub fn with_check_history_limit(mut self, limit: usize) -> Self {
        self.check_history_limit = limit;
        self
    }

    pub fn with_shutdown_grace(mut self, secs: u64) -> Self {
        self.shutdown_grace = Duration::from_secs(secs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_schedule_fits_delivery_timeout() {
        let d = DispatchConfig::default();
        let total_backoff: Duration = (0..d.max_retries).map(|i| d.base_backoff * 2u32.pow(i)).sum();
        assert_eq!(total_backoff, Duration::from_secs(14));
        assert!(total_backoff < d.delivery_timeout);
    }

    #[test]
    fn adaptive_defaults_are_ordered() {
        let a = AdaptiveConfig::default();
        assert!(a.speedup_multiplier < 1.0);
        assert!(a.slowdown_step > 1.0);
        assert!(a.max_slowdown >= 1.0);
    }

    #[test]
    fn builders_clamp_degenerate_values() {
        let c = EngineConfig::default()
            .with_max_concurrency(0)
            .with_watchdog_interval(0);
        assert_eq!(c.dispatch.max_concurrency, 1);
        assert_eq!(c.watchdog_interval, Duration::from_secs(1));
    }
}
