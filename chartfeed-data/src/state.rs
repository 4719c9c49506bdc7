//! Per-symbol aggregation state.
//!
//! One instance per subscribed symbol, owned by the aggregation worker and
//! mutated from nowhere else. The tick history and the candle series move
//! together: a symbol switch clears both and reloads history, an interval
//! switch re-buckets the retained ticks without refetching.

use crate::{
    aggregate::CandleSeries,
    batch::{TickBatch, TickSummary},
    candle::Candle,
    config::{EngineConfig, LateTickPolicy},
    history::TickHistory,
    interval::Interval,
    tick::NormalizedTick,
};
use smol_str::SmolStr;

/// Counts from applying one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Ticks folded into the history and the candle series.
    pub applied: usize,
    /// Ticks dropped by the lateness policy.
    pub late_dropped: usize,
}

/// Bounded tick window, candle series, and current-value summary for one
/// symbol.
#[derive(Debug)]
pub struct SymbolState {
    code: SmolStr,
    interval: Interval,
    ticks: TickHistory,
    candles: CandleSeries,
    latest: Option<TickSummary>,
    late_policy: LateTickPolicy,
}

impl SymbolState {
    pub fn new(code: SmolStr, config: &EngineConfig) -> Self {
        Self {
            code,
            interval: config.interval,
            ticks: TickHistory::new(config.max_ticks),
            candles: CandleSeries::new(config.max_candles),
            latest: None,
            late_policy: config.late_policy,
        }
    }

    pub fn code(&self) -> &SmolStr {
        &self.code
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn candles(&self) -> &[Candle] {
        self.candles.as_slice()
    }

    /// Owned candle snapshot for the consumer channel.
    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.snapshot()
    }

    pub fn latest(&self) -> Option<&TickSummary> {
        self.latest.as_ref()
    }

    pub fn tick_count(&self) -> usize {
        self.ticks.len()
    }

    /// Replace the tick window with a fetched history (oldest first) and run
    /// one full rebuild. The window is truncated to capacity before the
    /// rebuild, so the rebuild already operates on a bounded window.
    pub fn load_history(&mut self, ticks: Vec<NormalizedTick>) {
        self.ticks.load(ticks);
        self.rebuild();
    }

    /// Fold one flush window into the state: each tick is appended
    /// individually, in the batch's time order, so intra-window high/low
    /// fidelity survives; the summary is latest-wins by tick time.
    pub fn apply_batch(&mut self, batch: &TickBatch) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        for tick in &batch.ticks {
            if !self.accepts(tick) {
                outcome.late_dropped += 1;
                continue;
            }
            self.ticks.push(*tick);
            self.candles.append(tick, self.interval);
            outcome.applied += 1;
        }

        let newer = self
            .latest
            .as_ref()
            .is_none_or(|current| batch.summary.time >= current.time);
        if newer {
            self.latest = Some(batch.summary.clone());
        }

        outcome
    }

    fn accepts(&self, tick: &NormalizedTick) -> bool {
        let Some(newest) = self.candles.latest() else {
            return true;
        };
        let bucket = self.interval.bucket_start(tick.time);
        match self.late_policy {
            LateTickPolicy::Accept => true,
            LateTickPolicy::Reject => bucket >= newest.time,
            LateTickPolicy::Window(secs) => bucket + secs as i64 >= newest.time,
        }
    }

    /// Switch the chart interval, re-bucketing the retained tick window.
    /// Returns false when the interval is unchanged.
    pub fn set_interval(&mut self, interval: Interval) -> bool {
        if interval == self.interval {
            return false;
        }
        self.interval = interval;
        self.rebuild();
        true
    }

    fn rebuild(&mut self) {
        self.candles.rebuild(self.ticks.iter(), self.interval);
    }

    /// Wipe everything; used when the view switches symbols.
    pub fn clear(&mut self) {
        self.ticks.clear();
        self.candles.clear();
        self.latest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(time: i64, price: f64, volume: f64) -> NormalizedTick {
        NormalizedTick::new(time, price, volume)
    }

    fn batch(code: &str, ticks: Vec<NormalizedTick>) -> TickBatch {
        let last = *ticks.last().unwrap();
        TickBatch {
            code: SmolStr::new(code),
            ticks,
            summary: TickSummary {
                code: SmolStr::new(code),
                time: last.time,
                price: last.price,
                volume: last.volume,
                change_rate: Some(1.0),
            },
        }
    }

    fn state() -> SymbolState {
        SymbolState::new(SmolStr::new("005930"), &EngineConfig::default())
    }

    #[test]
    fn test_batch_of_500_fully_reflected_in_candles() {
        let mut state = state();
        let ticks: Vec<NormalizedTick> =
            (0..500).map(|i| tick(i / 10, 100.0 + (i % 7) as f64, 1.0)).collect();
        let outcome = state.apply_batch(&batch("005930", ticks));

        assert_eq!(outcome.applied, 500);
        assert_eq!(state.tick_count(), 500);

        // Every tick contributed, all inside one bucket.
        let candles = state.candles();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].volume, 500.0);
        assert_eq!(candles[0].high, 106.0);
        assert_eq!(candles[0].low, 100.0);
        assert_eq!(state.latest().unwrap().time, 49);
    }

    #[test]
    fn test_interval_change_rebuilds_and_retains_ticks() {
        let mut state = state();
        let ticks: Vec<NormalizedTick> = (0..600).map(|i| tick(i * 10, 100.0, 1.0)).collect();
        state.load_history(ticks);

        let fine_count = state.candles().len();
        assert_eq!(state.tick_count(), 600);

        assert!(state.set_interval(Interval::M5));
        assert_eq!(state.tick_count(), 600, "interval switch keeps the tick window");
        assert!(state.candles().len() <= fine_count);
        for candle in state.candles() {
            assert_eq!(candle.time % Interval::M5.seconds(), 0);
        }

        // Same interval again is a no-op.
        assert!(!state.set_interval(Interval::M5));
    }

    #[test]
    fn test_history_load_is_bounded_before_rebuild() {
        let config = EngineConfig::default();
        let mut state = SymbolState::new(SmolStr::new("005930"), &config);

        let ticks: Vec<NormalizedTick> = (0..40_000).map(|i| tick(i, 100.0, 1.0)).collect();
        state.load_history(ticks);

        assert_eq!(state.tick_count(), 30_000);
        // The rebuild saw only the newest 30,000 ticks: the first bucket is
        // the one tick 10,000 maps to.
        assert_eq!(state.candles()[0].time, Interval::M1.bucket_start(10_000));
    }

    #[test]
    fn test_late_policy_reject() {
        let config = EngineConfig::default().with_late_policy(LateTickPolicy::Reject);
        let mut state = SymbolState::new(SmolStr::new("X"), &config);

        state.apply_batch(&batch("X", vec![tick(600, 100.0, 1.0)]));
        let outcome = state.apply_batch(&batch("X", vec![tick(30, 99.0, 1.0)]));

        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.late_dropped, 1);
        assert_eq!(state.candles().len(), 1);
        assert_eq!(state.tick_count(), 1, "rejected ticks stay out of the history too");
    }

    #[test]
    fn test_late_policy_window() {
        let config = EngineConfig::default().with_late_policy(LateTickPolicy::Window(120));
        let mut state = SymbolState::new(SmolStr::new("X"), &config);

        state.apply_batch(&batch("X", vec![tick(600, 100.0, 1.0)]));

        // 480s bucket is exactly 120s behind the newest: accepted.
        let inside = state.apply_batch(&batch("X", vec![tick(485, 99.0, 1.0)]));
        assert_eq!(inside.applied, 1);

        // 300s bucket is 300s behind: dropped.
        let outside = state.apply_batch(&batch("X", vec![tick(305, 98.0, 1.0)]));
        assert_eq!(outside.late_dropped, 1);
    }

    #[test]
    fn test_late_policy_accept_mutates_history() {
        let mut state = state();
        state.apply_batch(&batch("X", vec![tick(600, 100.0, 1.0)]));
        let outcome = state.apply_batch(&batch("X", vec![tick(30, 99.0, 2.0)]));

        assert_eq!(outcome.applied, 1);
        assert_eq!(state.candles()[0].time, 0);
        assert_eq!(state.candles()[0].volume, 2.0);
    }

    #[test]
    fn test_summary_is_latest_wins_by_time() {
        let mut state = state();
        state.apply_batch(&batch("X", vec![tick(600, 100.0, 1.0)]));
        // A purely historical batch must not roll the summary backwards.
        state.apply_batch(&batch("X", vec![tick(30, 99.0, 1.0)]));

        assert_eq!(state.latest().unwrap().time, 600);
        assert_eq!(state.latest().unwrap().price, 100.0);
    }

    #[test]
    fn test_clear_wipes_everything() {
        let mut state = state();
        state.load_history((0..100).map(|i| tick(i, 100.0, 1.0)).collect());
        state.apply_batch(&batch("X", vec![tick(200, 100.0, 1.0)]));

        state.clear();
        assert_eq!(state.tick_count(), 0);
        assert!(state.candles().is_empty());
        assert!(state.latest().is_none());
    }
}
