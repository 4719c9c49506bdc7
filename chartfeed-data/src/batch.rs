//! Ingestion batching between the feed and the aggregation worker.
//!
//! The feed context calls [`Batcher::submit`] for every tick; a fixed-period
//! flush drains the per-symbol pending buffers and hands one [`TickBatch`]
//! per symbol to the aggregation worker over a bounded channel. Consumer
//! work is therefore bounded to one update per symbol per flush period no
//! matter how fast ticks arrive, while every tick still reaches the candle
//! series.

use crate::tick::NormalizedTick;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde::Serialize;
use smol_str::SmolStr;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, warn};

/// Latest-wins view of one symbol within a flush window, for consumers that
/// only need current-value semantics (the ranking table).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickSummary {
    pub code: SmolStr,
    /// Time of the chronologically last tick in the window.
    pub time: i64,
    pub price: f64,
    pub volume: f64,
    pub change_rate: Option<f64>,
}

/// One symbol's ticks for one flush window, ascending by tick time.
#[derive(Debug, Clone, PartialEq)]
pub struct TickBatch {
    pub code: SmolStr,
    pub ticks: Vec<NormalizedTick>,
    pub summary: TickSummary,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingTick {
    tick: NormalizedTick,
    change_rate: Option<f64>,
}

/// Per-symbol pending buffers with a non-blocking submit path.
///
/// Cloning shares the buffers, so the feed task and the flush task can hold
/// the same batcher.
#[derive(Debug, Clone, Default)]
pub struct Batcher {
    pending: Arc<Mutex<FnvHashMap<SmolStr, Vec<PendingTick>>>>,
}

impl Batcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a tick. Never blocks beyond the brief pending-map lock.
    pub fn submit(&self, code: SmolStr, tick: NormalizedTick, change_rate: Option<f64>) {
        let mut pending = self.pending.lock();
        pending
            .entry(code)
            .or_default()
            .push(PendingTick { tick, change_rate });
    }

    /// Total ticks currently buffered across all symbols.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().values().map(Vec::len).sum()
    }

    /// Drain every symbol's pending buffer and deliver one batch per symbol.
    ///
    /// A buffer is consumed only when its batch is accepted by the channel;
    /// on a full or closed channel the drained ticks are put back in front of
    /// anything that arrived meanwhile, so no tick is lost to a failed
    /// handoff. Returns the number of batches delivered.
    pub fn flush_once(&self, tx: &mpsc::Sender<TickBatch>) -> usize {
        let drained: Vec<(SmolStr, Vec<PendingTick>)> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };

        let mut delivered = 0;
        for (code, mut ticks) in drained {
            // Stable sort: equal timestamps keep arrival order, so close
            // stays the latest arrival.
            ticks.sort_by_key(|pending| pending.tick.time);

            let Some(batch) = build_batch(&code, &ticks) else {
                continue;
            };

            match tx.try_send(batch) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(%code, "batch channel full, retaining ticks for next flush");
                    self.restore(code, ticks);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%code, "batch receiver closed, retaining ticks");
                    self.restore(code, ticks);
                }
            }
        }
        delivered
    }

    fn restore(&self, code: SmolStr, mut ticks: Vec<PendingTick>) {
        let mut pending = self.pending.lock();
        let entry = pending.entry(code).or_default();
        ticks.extend(entry.drain(..));
        *entry = ticks;
    }

    /// Run the fixed-period flush until the receiver goes away.
    pub fn spawn_flush(&self, period: Duration, tx: mpsc::Sender<TickBatch>) -> JoinHandle<()> {
        let batcher = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    debug!("batch receiver dropped, stopping flush task");
                    break;
                }
                batcher.flush_once(&tx);
            }
        })
    }
}

fn build_batch(code: &SmolStr, ticks: &[PendingTick]) -> Option<TickBatch> {
    let last = ticks.last()?;
    let change_rate = ticks.iter().rev().find_map(|pending| pending.change_rate);
    Some(TickBatch {
        code: code.clone(),
        ticks: ticks.iter().map(|pending| pending.tick).collect(),
        summary: TickSummary {
            code: code.clone(),
            time: last.tick.time,
            price: last.tick.price,
            volume: last.tick.volume,
            change_rate,
        },
    })
}
