//! Engine configuration.

use crate::interval::Interval;
use std::time::Duration;

/// Policy for ticks whose bucket is older than the newest candle.
///
/// The live path normally only touches the tail bucket, but a
/// network-delayed tick can map to a bucket deep in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LateTickPolicy {
    /// Apply the tick to whatever bucket its timestamp maps to, however old.
    #[default]
    Accept,
    /// Accept only ticks whose bucket is at most this many seconds behind
    /// the newest bucket.
    Window(u64),
    /// Drop any tick mapping to a bucket older than the newest one.
    Reject,
}

/// Tunables for one aggregation session.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-symbol tick history capacity.
    pub max_ticks: usize,
    /// Per-symbol candle series capacity.
    pub max_candles: usize,
    /// Initial chart interval for newly subscribed symbols.
    pub interval: Interval,
    /// Batcher flush period.
    pub flush_interval: Duration,
    /// How long a price flash stays lit before its scheduled clear.
    pub flash_duration: Duration,
    /// Lateness policy applied before the incremental append.
    pub late_policy: LateTickPolicy,
    /// Capacity of the batcher-to-engine channel.
    pub batch_capacity: usize,
    /// Capacity of the engine-to-consumer update channel.
    pub update_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_ticks: 30_000,
            max_candles: 5_000,
            interval: Interval::M1,
            flush_interval: Duration::from_millis(100),
            flash_duration: Duration::from_millis(1_500),
            late_policy: LateTickPolicy::Accept,
            batch_capacity: 256,
            update_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Set the tick history capacity.
    pub fn with_max_ticks(mut self, max_ticks: usize) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Set the candle series capacity.
    pub fn with_max_candles(mut self, max_candles: usize) -> Self {
        self.max_candles = max_candles;
        self
    }

    /// Set the initial chart interval.
    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    /// Set the batcher flush period.
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Set the lateness policy.
    pub fn with_late_policy(mut self, late_policy: LateTickPolicy) -> Self {
        self.late_policy = late_policy;
        self
    }

    /// Set the flash duration.
    pub fn with_flash_duration(mut self, flash_duration: Duration) -> Self {
        self.flash_duration = flash_duration;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::default()
            .with_max_ticks(1_000)
            .with_max_candles(100)
            .with_interval(Interval::M5)
            .with_flush_interval(Duration::from_millis(50))
            .with_late_policy(LateTickPolicy::Reject);

        assert_eq!(config.max_ticks, 1_000);
        assert_eq!(config.max_candles, 100);
        assert_eq!(config.interval, Interval::M5);
        assert_eq!(config.flush_interval, Duration::from_millis(50));
        assert_eq!(config.late_policy, LateTickPolicy::Reject);
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_ticks, 30_000);
        assert_eq!(config.max_candles, 5_000);
        assert_eq!(config.interval, Interval::M1);
        assert_eq!(config.flush_interval, Duration::from_millis(100));
        assert_eq!(config.late_policy, LateTickPolicy::Accept);
    }
}
