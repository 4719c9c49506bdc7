//! Tick-to-candle aggregation.
//!
//! Buckets are keyed by the tick's own timestamp, not arrival order, so a
//! network-delayed tick still lands in the bucket its trade time maps to.
//! The series stays strictly ascending by bucket start and bounded at
//! `max_candles`, oldest buckets evicted first.

use crate::candle::Candle;
use crate::interval::Interval;
use crate::tick::NormalizedTick;
use itertools::Itertools;
use std::collections::BTreeMap;

/// Bounded, sorted candle series for one symbol.
///
/// Two ways in: [`rebuild`](Self::rebuild) re-buckets a whole tick window
/// (cold start, interval change), [`append`](Self::append) folds a single
/// live tick into the series. Applying the same ordered ticks one at a time
/// from empty produces the same series as one bulk rebuild.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    candles: Vec<Candle>,
    max_candles: usize,
}

impl CandleSeries {
    /// Create an empty series with the given capacity.
    pub fn new(max_candles: usize) -> Self {
        Self {
            candles: Vec::new(),
            max_candles,
        }
    }

    /// Re-bucket a tick window from scratch.
    ///
    /// Ticks are folded in time order regardless of iteration order: the
    /// first tick of a bucket seeds open, the last sets close. The result is
    /// ascending by bucket start and trimmed to the most recent
    /// `max_candles`. An empty window yields an empty series.
    pub fn rebuild<'a, I>(&mut self, ticks: I, interval: Interval)
    where
        I: IntoIterator<Item = &'a NormalizedTick>,
    {
        let mut buckets: BTreeMap<i64, Candle> = BTreeMap::new();

        for tick in ticks.into_iter().sorted_by_key(|tick| tick.time) {
            let start = interval.bucket_start(tick.time);
            buckets
                .entry(start)
                .and_modify(|candle| candle.apply(tick))
                .or_insert_with(|| Candle::from_tick(start, tick));
        }

        self.candles = buckets.into_values().collect();
        self.trim();
    }

    /// Fold one live tick into the series.
    ///
    /// A hit on an existing bucket updates it in place; whether a tick older
    /// than the newest bucket is allowed to reach this point is the caller's
    /// lateness policy. A miss inserts a new single-tick candle at its sorted
    /// position, which in the live path is the tail.
    pub fn append(&mut self, tick: &NormalizedTick, interval: Interval) {
        let start = interval.bucket_start(tick.time);

        match self.candles.binary_search_by_key(&start, |candle| candle.time) {
            Ok(found) => self.candles[found].apply(tick),
            Err(insert_at) => {
                self.candles.insert(insert_at, Candle::from_tick(start, tick));
                self.trim();
            }
        }
    }

    fn trim(&mut self) {
        if self.candles.len() > self.max_candles {
            let excess = self.candles.len() - self.max_candles;
            self.candles.drain(..excess);
        }
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    /// Owned copy for handing across the consumer channel.
    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.clone()
    }

    /// Newest bucket, if any.
    pub fn latest(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_candles
    }

    pub fn clear(&mut self) {
        self.candles.clear();
    }
}
