//! OHLCV candle record.

use crate::tick::NormalizedTick;
use serde::{Deserialize, Serialize};

/// One OHLCV bucket, keyed by its start time.
///
/// This is the exact representation the chart consumes: `time` is the bucket
/// start in unix seconds, aligned to the active interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, unix seconds, a multiple of the interval width.
    pub time: i64,
    /// Price of the chronologically first tick in the bucket.
    pub open: f64,
    /// Highest tick price in the bucket.
    pub high: f64,
    /// Lowest tick price in the bucket.
    pub low: f64,
    /// Price of the chronologically last tick in the bucket.
    pub close: f64,
    /// Sum of tick volumes assigned to the bucket.
    pub volume: f64,
}

impl Candle {
    /// Seed a bucket from its first tick.
    #[must_use]
    pub const fn from_tick(bucket_start: i64, tick: &NormalizedTick) -> Self {
        Self {
            time: bucket_start,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume,
        }
    }

    /// Fold a subsequent tick of the same bucket into the candle.
    pub fn apply(&mut self, tick: &NormalizedTick) {
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.close = tick.price;
        self.volume += tick.volume;
    }

    /// Price range covered by the bucket.
    #[must_use]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// True when the bucket closed above its open.
    #[must_use]
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}
