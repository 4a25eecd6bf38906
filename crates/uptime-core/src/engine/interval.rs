use std::time::Duration;

use crate::config::AdaptiveConfig;

/// Next check delay and the multiplier to carry into the following cycle.
///
/// Failures snap a slowed-down monitor back to the speedup multiplier, a
/// stable streak stretches the interval step by step up to `max_slowdown`,
/// and anything else runs at the base interval. The result never drops
/// below `min_interval`.
pub fn next_interval(
    config: &AdaptiveConfig,
    base: Duration,
    consec_successes: u32,
    consec_fails: u32,
    prev_multiplier: f64,
) -> (Duration, f64) {
    if !config.enabled {
        return (base.max(config.min_interval), 1.0);
    }

    let prev = if prev_multiplier.is_finite() && prev_multiplier > 0.0 {
        prev_multiplier
    } else {
        1.0
    };

    let multiplier = if consec_fails > 0 {
        if prev > 1.0 {
            config.speedup_multiplier
        } else {
            1.0
        }
    } else if consec_successes >= config.stable_threshold {
        (prev.max(1.0) * config.slowdown_step).min(config.max_slowdown.max(1.0))
    } else {
        1.0
    };

    let secs = (base.as_secs_f64() * multiplier).round();
    let interval = Duration::from_secs_f64(secs.max(0.0)).max(config.min_interval);
    (interval, multiplier)
}
