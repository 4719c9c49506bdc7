//! Bounded tick history.

use crate::tick::NormalizedTick;
use std::collections::VecDeque;

/// Ring buffer holding the N most recent ticks for one symbol.
///
/// Eviction is strict FIFO: the oldest tick is dropped first, the newest is
/// always retained. A bulk load larger than the capacity is truncated from
/// the oldest end before it is stored, so consumers only ever see a bounded
/// window.
#[derive(Debug, Clone)]
pub struct TickHistory {
    ticks: VecDeque<NormalizedTick>,
    max_ticks: usize,
}

impl TickHistory {
    /// Create an empty history with the given capacity.
    pub fn new(max_ticks: usize) -> Self {
        Self {
            ticks: VecDeque::with_capacity(max_ticks.min(4096)),
            max_ticks,
        }
    }

    /// Append one tick, evicting the oldest entry at capacity.
    pub fn push(&mut self, tick: NormalizedTick) {
        if self.ticks.len() >= self.max_ticks {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
    }

    /// Replace the contents with a freshly fetched window, oldest first.
    ///
    /// Excess beyond capacity is dropped from the oldest end immediately, so
    /// the first rebuild already runs on a bounded window.
    pub fn load(&mut self, mut ticks: Vec<NormalizedTick>) {
        if ticks.len() > self.max_ticks {
            let excess = ticks.len() - self.max_ticks;
            ticks.drain(..excess);
        }
        self.ticks = ticks.into();
    }

    pub fn iter(&self) -> impl Iterator<Item = &NormalizedTick> {
        self.ticks.iter()
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_ticks
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
    }

    /// Most recent tick, if any.
    pub fn latest(&self) -> Option<&NormalizedTick> {
        self.ticks.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(time: i64) -> NormalizedTick {
        NormalizedTick::new(time, 100.0 + time as f64, 1.0)
    }

    #[test]
    fn test_fifo_eviction() {
        let mut history = TickHistory::new(3);
        for t in 0..5 {
            history.push(tick(t));
        }

        assert_eq!(history.len(), 3);
        let times: Vec<i64> = history.iter().map(|t| t.time).collect();
        assert_eq!(times, vec![2, 3, 4]);
        assert_eq!(history.latest().unwrap().time, 4);
    }

    #[test]
    fn test_load_truncates_oldest_excess() {
        let mut history = TickHistory::new(30_000);
        let ticks: Vec<NormalizedTick> = (0..40_000).map(tick).collect();
        history.load(ticks);

        assert_eq!(history.len(), 30_000);
        // The newest 30,000 survive, the oldest 10,000 are gone.
        assert_eq!(history.iter().next().unwrap().time, 10_000);
        assert_eq!(history.latest().unwrap().time, 39_999);
    }

    #[test]
    fn test_load_replaces_previous_contents() {
        let mut history = TickHistory::new(10);
        history.push(tick(1));
        history.load(vec![tick(5), tick(6)]);

        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().next().unwrap().time, 5);
    }
}
