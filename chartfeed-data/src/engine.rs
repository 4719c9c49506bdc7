//! Aggregation worker.
//!
//! One task owns every per-symbol state and is the sole writer: batches come
//! in from the batcher channel, commands from the session, and chart/table
//! updates go out over a bounded channel. The render path never touches the
//! aggregation structures directly.

use crate::{
    batch::{TickBatch, TickSummary},
    candle::Candle,
    client::ApiClient,
    config::EngineConfig,
    diag::Diagnostics,
    error::FeedError,
    interval::Interval,
    rank::{RankRow, RankTracker},
    state::SymbolState,
    tick::NormalizedTick,
};
use chrono::Utc;
use fnv::FnvHashMap;
use smol_str::SmolStr;
use std::sync::Arc;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Commands accepted by the worker.
#[derive(Debug)]
pub enum EngineCommand {
    /// Create (or reset) the aggregation state for a symbol and fetch its
    /// history window.
    Subscribe { code: SmolStr },
    /// Tear down a symbol's aggregation state.
    Unsubscribe { code: SmolStr },
    /// Switch a symbol's chart interval, re-bucketing retained ticks.
    SetInterval { code: SmolStr, interval: Interval },
    /// Result of a history fetch; ignored unless `epoch` is still current.
    LoadHistory {
        code: SmolStr,
        epoch: u64,
        result: Result<Vec<NormalizedTick>, FeedError>,
    },
    /// Scheduled flash clear; ignored unless `seq` is still current.
    ClearFlash { code: SmolStr, seq: u64 },
    /// Stop the worker.
    Shutdown,
}

/// Updates emitted to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineUpdate {
    /// Full candle snapshot for a subscribed symbol, ascending by time.
    Candles { code: SmolStr, candles: Vec<Candle> },
    /// Ranked current-value table across every symbol seen on the feed.
    Table { rows: Vec<RankRow> },
    /// History fetch failed; the chart keeps its current, possibly empty,
    /// state until the next subscribe retriggers the fetch.
    HistoryUnavailable { code: SmolStr },
}

/// Handle over a running [`AggregationEngine`].
#[derive(Debug)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    pub async fn subscribe(&self, code: impl Into<SmolStr>) {
        let _ = self
            .cmd_tx
            .send(EngineCommand::Subscribe { code: code.into() })
            .await;
    }

    pub async fn unsubscribe(&self, code: impl Into<SmolStr>) {
        let _ = self
            .cmd_tx
            .send(EngineCommand::Unsubscribe { code: code.into() })
            .await;
    }

    pub async fn set_interval(&self, code: impl Into<SmolStr>, interval: Interval) {
        let _ = self
            .cmd_tx
            .send(EngineCommand::SetInterval {
                code: code.into(),
                interval,
            })
            .await;
    }

    /// Stop the worker and wait for it to finish.
    pub async fn close(self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

/// The worker itself. Construct with [`AggregationEngine::spawn`].
pub struct AggregationEngine {
    config: EngineConfig,
    client: Option<ApiClient>,
    diag: Arc<Diagnostics>,
    states: FnvHashMap<SmolStr, SymbolState>,
    summaries: FnvHashMap<SmolStr, TickSummary>,
    tracker: RankTracker,
    last_rows: Vec<RankRow>,
    epochs: FnvHashMap<SmolStr, u64>,
    fetches: FnvHashMap<SmolStr, JoinHandle<()>>,
    cmd_tx: mpsc::Sender<EngineCommand>,
    update_tx: mpsc::Sender<EngineUpdate>,
}

impl AggregationEngine {
    /// Start the worker. `client` is optional: without one, subscriptions
    /// start from an empty window and fill up from live ticks only.
    pub fn spawn(
        config: EngineConfig,
        client: Option<ApiClient>,
        batch_rx: mpsc::Receiver<TickBatch>,
        diag: Arc<Diagnostics>,
    ) -> (EngineHandle, mpsc::Receiver<EngineUpdate>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (update_tx, update_rx) = mpsc::channel(config.update_capacity);

        let engine = Self {
            config,
            client,
            diag,
            states: FnvHashMap::default(),
            summaries: FnvHashMap::default(),
            tracker: RankTracker::new(),
            last_rows: Vec::new(),
            epochs: FnvHashMap::default(),
            fetches: FnvHashMap::default(),
            cmd_tx: cmd_tx.clone(),
            update_tx,
        };

        let task = tokio::spawn(engine.run(cmd_rx, batch_rx));

        (EngineHandle { cmd_tx, task }, update_rx)
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<EngineCommand>,
        mut batch_rx: mpsc::Receiver<TickBatch>,
    ) {
        info!("aggregation worker started");

        loop {
            tokio::select! {
                Some(batch) = batch_rx.recv() => {
                    let mut touched = Vec::new();
                    self.apply(batch, &mut touched);
                    // The flush delivers one batch per symbol back to back;
                    // drain them all before publishing once.
                    while let Ok(batch) = batch_rx.try_recv() {
                        self.apply(batch, &mut touched);
                    }
                    self.publish(touched);
                }
                Some(command) = cmd_rx.recv() => {
                    if matches!(command, EngineCommand::Shutdown) {
                        break;
                    }
                    self.on_command(command);
                }
                else => break,
            }
        }

        for (_, fetch) in self.fetches.drain() {
            fetch.abort();
        }
        info!("aggregation worker stopped");
    }

    fn apply(&mut self, batch: TickBatch, touched: &mut Vec<SmolStr>) {
        self.summaries.insert(batch.code.clone(), batch.summary.clone());

        if let Some(state) = self.states.get_mut(&batch.code) {
            let outcome = state.apply_batch(&batch);
            if outcome.late_dropped > 0 {
                self.diag.record_late_dropped(outcome.late_dropped as u64);
            }
            self.diag.record_batch_applied();
            if outcome.applied > 0 && !touched.contains(&batch.code) {
                touched.push(batch.code);
            }
        }
    }

    fn publish(&mut self, touched: Vec<SmolStr>) {
        for code in touched {
            if let Some(state) = self.states.get(&code) {
                let candles = state.snapshot();
                self.send_update(EngineUpdate::Candles { code, candles });
            }
        }
        self.publish_table();
    }

    fn publish_table(&mut self) {
        if self.summaries.is_empty() {
            return;
        }

        let snapshot: Vec<TickSummary> = self.summaries.values().cloned().collect();
        let update = self.tracker.update(snapshot);
        self.last_rows = update.rows.clone();

        for (code, seq) in update.new_flashes {
            self.schedule_flash_clear(code, seq);
        }
        self.send_update(EngineUpdate::Table { rows: update.rows });
    }

    fn schedule_flash_clear(&self, code: SmolStr, seq: u64) {
        let cmd_tx = self.cmd_tx.clone();
        let delay = self.config.flash_duration;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = cmd_tx.send(EngineCommand::ClearFlash { code, seq }).await;
        });
    }

    fn on_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Subscribe { code } => {
                info!(%code, "subscribing");
                self.states
                    .insert(code.clone(), SymbolState::new(code.clone(), &self.config));
                // The chart clears immediately; history fills it back in.
                self.send_update(EngineUpdate::Candles {
                    code: code.clone(),
                    candles: Vec::new(),
                });
                self.start_history_fetch(code);
            }
            EngineCommand::Unsubscribe { code } => {
                info!(%code, "unsubscribing");
                self.states.remove(&code);
                *self.epochs.entry(code.clone()).or_insert(0) += 1;
                if let Some(fetch) = self.fetches.remove(&code) {
                    fetch.abort();
                }
            }
            EngineCommand::SetInterval { code, interval } => {
                // A history fetch launched for the previous timeframe is
                // stale; the rebuild below works from retained ticks.
                *self.epochs.entry(code.clone()).or_insert(0) += 1;
                if let Some(fetch) = self.fetches.remove(&code) {
                    fetch.abort();
                }
                if let Some(state) = self.states.get_mut(&code) {
                    if state.set_interval(interval) {
                        debug!(%code, %interval, "interval switched, series rebuilt");
                        let candles = state.snapshot();
                        self.send_update(EngineUpdate::Candles { code, candles });
                    }
                }
            }
            EngineCommand::LoadHistory {
                code,
                epoch,
                result,
            } => self.on_history(code, epoch, result),
            EngineCommand::ClearFlash { code, seq } => {
                if self.tracker.clear_flash(&code, seq) {
                    for row in &mut self.last_rows {
                        if row.summary.code == code {
                            row.flash = false;
                        }
                    }
                    let rows = self.last_rows.clone();
                    self.send_update(EngineUpdate::Table { rows });
                }
            }
            EngineCommand::Shutdown => {}
        }
    }

    fn on_history(
        &mut self,
        code: SmolStr,
        epoch: u64,
        result: Result<Vec<NormalizedTick>, FeedError>,
    ) {
        if self.epochs.get(&code).copied().unwrap_or(0) != epoch {
            debug!(%code, epoch, "stale history fetch discarded");
            return;
        }
        self.fetches.remove(&code);

        match result {
            Ok(ticks) => {
                if let Some(state) = self.states.get_mut(&code) {
                    info!(%code, ticks = ticks.len(), "history loaded, rebuilding");
                    state.load_history(ticks);
                    let candles = state.snapshot();
                    self.send_update(EngineUpdate::Candles { code, candles });
                }
            }
            Err(fetch_error) => {
                warn!(%code, %fetch_error, "history fetch failed, keeping current state");
                self.send_update(EngineUpdate::HistoryUnavailable { code });
            }
        }
    }

    /// Kick off a history fetch for the current epoch, aborting any fetch
    /// still in flight for this symbol.
    fn start_history_fetch(&mut self, code: SmolStr) {
        let epoch = {
            let entry = self.epochs.entry(code.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        if let Some(previous) = self.fetches.remove(&code) {
            previous.abort();
        }

        let Some(client) = self.client.clone() else {
            debug!(%code, "no api client configured, starting from an empty window");
            return;
        };

        let cmd_tx = self.cmd_tx.clone();
        let diag = Arc::clone(&self.diag);
        let limit = self.config.max_ticks;
        let fetch_code = code.clone();

        let handle = tokio::spawn(async move {
            let result = client.history(&fetch_code, limit).await.map(|raw_ticks| {
                let fetched_at = Utc::now().timestamp();
                raw_ticks
                    .iter()
                    .filter_map(|raw| {
                        let tick = raw.normalize(fetched_at);
                        if tick.is_none() {
                            diag.record_dropped();
                        }
                        tick
                    })
                    .collect::<Vec<_>>()
            });
            let _ = cmd_tx
                .send(EngineCommand::LoadHistory {
                    code: fetch_code,
                    epoch,
                    result,
                })
                .await;
        });
        self.fetches.insert(code, handle);
    }

    fn send_update(&self, update: EngineUpdate) {
        if let Err(TrySendError::Full(_)) = self.update_tx.try_send(update) {
            // The renderer fell behind; the next flush re-snapshots anyway.
            debug!("update receiver lagging, dropping snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn tick(time: i64, price: f64, volume: f64) -> NormalizedTick {
        NormalizedTick::new(time, price, volume)
    }

    fn batch(code: &str, ticks: Vec<NormalizedTick>, change_rate: f64) -> TickBatch {
        let last = *ticks.last().unwrap();
        TickBatch {
            code: SmolStr::new(code),
            ticks,
            summary: TickSummary {
                code: SmolStr::new(code),
                time: last.time,
                price: last.price,
                volume: last.volume,
                change_rate: Some(change_rate),
            },
        }
    }

    async fn recv(
        rx: &mut mpsc::Receiver<EngineUpdate>,
    ) -> EngineUpdate {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("update within deadline")
            .expect("engine alive")
    }

    #[tokio::test]
    async fn test_batch_produces_candles_then_table() {
        let (batch_tx, batch_rx) = mpsc::channel(8);
        let (handle, mut updates) = AggregationEngine::spawn(
            EngineConfig::default(),
            None,
            batch_rx,
            Arc::new(Diagnostics::default()),
        );

        handle.subscribe("005930").await;
        // Subscribe acknowledges with a cleared chart.
        let cleared = recv(&mut updates).await;
        assert_eq!(
            cleared,
            EngineUpdate::Candles {
                code: SmolStr::new("005930"),
                candles: Vec::new()
            }
        );

        batch_tx
            .send(batch(
                "005930",
                vec![tick(0, 100.0, 1.0), tick(30, 101.0, 2.0), tick(61, 99.0, 1.0)],
                0.8,
            ))
            .await
            .unwrap();

        let first = recv(&mut updates).await;
        let EngineUpdate::Candles { code, candles } = first else {
            panic!("expected candle snapshot, got {first:?}");
        };
        assert_eq!(code, "005930");
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 101.0);
        assert_eq!(candles[1].time, 60);

        let second = recv(&mut updates).await;
        let EngineUpdate::Table { rows } = second else {
            panic!("expected table, got {second:?}");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].summary.price, 99.0);
        assert_eq!(rows[0].rank, 1);

        handle.close().await;
    }

    #[tokio::test]
    async fn test_unsubscribed_symbols_only_feed_the_table() {
        let (batch_tx, batch_rx) = mpsc::channel(8);
        let (handle, mut updates) = AggregationEngine::spawn(
            EngineConfig::default(),
            None,
            batch_rx,
            Arc::new(Diagnostics::default()),
        );

        batch_tx
            .send(batch("000660", vec![tick(0, 50.0, 1.0)], 1.2))
            .await
            .unwrap();

        let update = recv(&mut updates).await;
        let EngineUpdate::Table { rows } = update else {
            panic!("expected table only, got {update:?}");
        };
        assert_eq!(rows[0].summary.code, "000660");

        handle.close().await;
    }

    #[tokio::test]
    async fn test_stale_history_epoch_is_discarded() {
        let (_batch_tx, batch_rx) = mpsc::channel::<TickBatch>(8);
        let (handle, mut updates) = AggregationEngine::spawn(
            EngineConfig::default(),
            None,
            batch_rx,
            Arc::new(Diagnostics::default()),
        );

        // Two subscribes: the second bumps the epoch to 2.
        handle.subscribe("005930").await;
        handle.subscribe("005930").await;
        let _ = recv(&mut updates).await;
        let _ = recv(&mut updates).await;

        // A result from the first fetch arrives late and must be dropped.
        handle
            .cmd_tx
            .send(EngineCommand::LoadHistory {
                code: SmolStr::new("005930"),
                epoch: 1,
                result: Ok(vec![tick(0, 100.0, 1.0)]),
            })
            .await
            .unwrap();

        // The current epoch's result lands.
        handle
            .cmd_tx
            .send(EngineCommand::LoadHistory {
                code: SmolStr::new("005930"),
                epoch: 2,
                result: Ok(vec![tick(60, 200.0, 1.0)]),
            })
            .await
            .unwrap();

        let update = recv(&mut updates).await;
        let EngineUpdate::Candles { candles, .. } = update else {
            panic!("expected candles, got {update:?}");
        };
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].open, 200.0, "stale fetch must not have landed");

        handle.close().await;
    }

    #[tokio::test]
    async fn test_failed_history_surfaces_degraded_state() {
        let (_batch_tx, batch_rx) = mpsc::channel::<TickBatch>(8);
        let (handle, mut updates) = AggregationEngine::spawn(
            EngineConfig::default(),
            None,
            batch_rx,
            Arc::new(Diagnostics::default()),
        );

        handle.subscribe("005930").await;
        let _ = recv(&mut updates).await;
        handle
            .cmd_tx
            .send(EngineCommand::LoadHistory {
                code: SmolStr::new("005930"),
                epoch: 1,
                result: Err(FeedError::Api("boom".to_string())),
            })
            .await
            .unwrap();

        let update = recv(&mut updates).await;
        assert_eq!(
            update,
            EngineUpdate::HistoryUnavailable {
                code: SmolStr::new("005930")
            }
        );

        handle.close().await;
    }

    #[tokio::test]
    async fn test_set_interval_rebuilds_snapshot() {
        let (batch_tx, batch_rx) = mpsc::channel(8);
        let (handle, mut updates) = AggregationEngine::spawn(
            EngineConfig::default(),
            None,
            batch_rx,
            Arc::new(Diagnostics::default()),
        );

        handle.subscribe("005930").await;
        let _ = recv(&mut updates).await;
        let ticks: Vec<NormalizedTick> = (0..10).map(|i| tick(i * 60, 100.0, 1.0)).collect();
        batch_tx.send(batch("005930", ticks, 0.1)).await.unwrap();

        // Candles at 1m, then the table.
        let EngineUpdate::Candles { candles, .. } = recv(&mut updates).await else {
            panic!("expected candles");
        };
        assert_eq!(candles.len(), 10);
        let _ = recv(&mut updates).await;

        handle.set_interval("005930", Interval::M5).await;
        let EngineUpdate::Candles { candles, .. } = recv(&mut updates).await else {
            panic!("expected rebuilt candles");
        };
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].volume, 5.0);

        handle.close().await;
    }
}
