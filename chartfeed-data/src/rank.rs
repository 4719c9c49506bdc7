//! Rank and price-flash signals for the current-value table.
//!
//! Derived from consecutive summary snapshots, not from individual ticks.
//! Flash clears are generation-guarded: every flash carries a sequence
//! number, and a scheduled clear only lands if no newer flash superseded it.

use crate::batch::TickSummary;
use derive_more::Display;
use fnv::FnvHashMap;
use smol_str::SmolStr;
use std::cmp::Ordering;

/// Direction a symbol moved between two consecutive ranked snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RankDelta {
    #[display("up")]
    Up,
    #[display("down")]
    Down,
    #[display("flat")]
    Flat,
}

/// One row of the ranked table.
#[derive(Debug, Clone, PartialEq)]
pub struct RankRow {
    pub summary: TickSummary,
    /// 1-based position in the ranked view.
    pub rank: usize,
    pub delta: RankDelta,
    /// True while the symbol's price flash is lit.
    pub flash: bool,
}

/// Result of folding a snapshot into the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct RankUpdate {
    pub rows: Vec<RankRow>,
    /// Flashes triggered by this snapshot; schedule a clear for each.
    pub new_flashes: Vec<(SmolStr, u64)>,
}

#[derive(Debug, Clone, Copy, Default)]
struct FlashState {
    seq: u64,
    active: bool,
}

/// Tracks rank movement and flash state across snapshots.
#[derive(Debug, Default)]
pub struct RankTracker {
    previous_rank: FnvHashMap<SmolStr, usize>,
    previous_rate: FnvHashMap<SmolStr, f64>,
    flash: FnvHashMap<SmolStr, FlashState>,
}

impl RankTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rank a snapshot by change rate (descending, code as tie-break) and
    /// derive per-symbol movement and flash signals against the previous
    /// snapshot.
    pub fn update(&mut self, mut summaries: Vec<TickSummary>) -> RankUpdate {
        summaries.sort_by(|a, b| {
            let rate_a = a.change_rate.unwrap_or(f64::NEG_INFINITY);
            let rate_b = b.change_rate.unwrap_or(f64::NEG_INFINITY);
            rate_b
                .partial_cmp(&rate_a)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.code.cmp(&b.code))
        });

        let mut rows = Vec::with_capacity(summaries.len());
        let mut new_flashes = Vec::new();

        for (index, summary) in summaries.into_iter().enumerate() {
            let rank = index + 1;

            let delta = match self.previous_rank.get(&summary.code) {
                Some(&previous) if previous > rank => RankDelta::Up,
                Some(&previous) if previous < rank => RankDelta::Down,
                _ => RankDelta::Flat,
            };
            self.previous_rank.insert(summary.code.clone(), rank);

            if let Some(rate) = summary.change_rate {
                let changed = self
                    .previous_rate
                    .insert(summary.code.clone(), rate)
                    .is_some_and(|previous| previous != rate);
                if changed {
                    let state = self.flash.entry(summary.code.clone()).or_default();
                    state.seq += 1;
                    state.active = true;
                    new_flashes.push((summary.code.clone(), state.seq));
                }
            }

            let flash = self
                .flash
                .get(&summary.code)
                .is_some_and(|state| state.active);

            rows.push(RankRow {
                summary,
                rank,
                delta,
                flash,
            });
        }

        RankUpdate { rows, new_flashes }
    }

    /// Clear a flash, but only if `seq` is still the current generation.
    /// Returns true when the flash was actually cleared.
    pub fn clear_flash(&mut self, code: &SmolStr, seq: u64) -> bool {
        match self.flash.get_mut(code) {
            Some(state) if state.seq == seq && state.active => {
                state.active = false;
                true
            }
            _ => false,
        }
    }

    /// Forget a symbol entirely.
    pub fn remove(&mut self, code: &SmolStr) {
        self.previous_rank.remove(code);
        self.previous_rate.remove(code);
        self.flash.remove(code);
    }
}
