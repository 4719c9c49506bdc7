//! Console consumer for the chartfeed aggregation engine.
//!
//! Wires the REST client, the live feed, the batcher, and the aggregation
//! worker together, subscribes to a handful of symbols, and logs candle and
//! table updates. Symbols come from the command line, or from the stock list
//! endpoint when none are given.

use chartfeed_data::{
    AggregationEngine, ApiClient, ApiConfig, Batcher, Diagnostics, EngineConfig, EngineUpdate,
    FeedConfig, Interval, spawn_feed,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Fallback symbol when no arguments are given and the stock list is
/// unreachable.
const DEFAULT_CODE: &str = "005930";

#[tokio::main]
async fn main() {
    init_logging();

    let interval = std::env::var("CHARTFEED_INTERVAL")
        .map(|raw| Interval::parse_lenient(&raw))
        .unwrap_or_default();
    let config = EngineConfig::default().with_interval(interval);

    info!(%interval, "starting chartfeed monitor");

    let api = match ApiClient::new(ApiConfig::from_env()) {
        Ok(api) => api,
        Err(api_error) => {
            error!(%api_error, "failed to build api client");
            return;
        }
    };

    let codes = resolve_codes(&api).await;
    info!(?codes, "subscribing to symbols");

    // One-shot snapshot of where each symbol stands before the live feed.
    let started_at = unix_now();
    for code in &codes {
        match api.latest(code).await {
            Ok(raw) => {
                if let Some(tick) = raw.normalize(started_at) {
                    info!(%code, price = tick.price, change_rate = ?raw.change_rate(), "latest");
                }
            }
            Err(latest_error) => warn!(%code, %latest_error, "latest unavailable"),
        }
    }

    let diag = Arc::new(Diagnostics::default());
    let batcher = Batcher::new();

    let (batch_tx, batch_rx) = mpsc::channel(config.batch_capacity);
    let flush_task = batcher.spawn_flush(config.flush_interval, batch_tx);

    let (engine, mut updates) =
        AggregationEngine::spawn(config, Some(api), batch_rx, Arc::clone(&diag));

    let feed = match spawn_feed(FeedConfig::from_env(), batcher.clone(), Arc::clone(&diag)) {
        Ok(feed) => feed,
        Err(feed_error) => {
            error!(%feed_error, "failed to start feed");
            return;
        }
    };

    // Log connection transitions alongside the data stream.
    let mut status_rx = feed.status();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            info!(status = %*status_rx.borrow(), "feed status");
        }
    });

    for code in &codes {
        engine.subscribe(code.as_str()).await;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            update = updates.recv() => match update {
                Some(update) => log_update(update),
                None => {
                    warn!("engine update stream ended");
                    break;
                }
            }
        }
    }

    feed.close().await;
    engine.close().await;
    flush_task.abort();

    let totals = diag.snapshot();
    info!(
        ingested = totals.ticks_ingested,
        dropped = totals.ticks_dropped,
        malformed = totals.frames_malformed,
        late_dropped = totals.late_ticks_dropped,
        batches = totals.batches_applied,
        "session totals"
    );
}

/// Symbols from the command line, or the first few listed by the backend.
async fn resolve_codes(api: &ApiClient) -> Vec<String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return args;
    }

    match api.stocks().await {
        Ok(stocks) => stocks
            .into_iter()
            .take(3)
            .map(|stock| stock.code.to_string())
            .collect(),
        Err(list_error) => {
            warn!(%list_error, "stock list unavailable, using default symbol");
            vec![DEFAULT_CODE.to_string()]
        }
    }
}

fn log_update(update: EngineUpdate) {
    match update {
        EngineUpdate::Candles { code, candles } => {
            let tail = candles
                .last()
                .and_then(|candle| serde_json::to_string(candle).ok())
                .unwrap_or_else(|| "none".to_string());
            info!(%code, count = candles.len(), latest = %tail, "candles");
        }
        EngineUpdate::Table { rows } => {
            for row in rows.iter().take(5) {
                info!(
                    rank = row.rank,
                    code = %row.summary.code,
                    price = row.summary.price,
                    change_rate = ?row.summary.change_rate,
                    delta = %row.delta,
                    flash = row.flash,
                    "table"
                );
            }
        }
        EngineUpdate::HistoryUnavailable { code } => {
            warn!(%code, "history unavailable, chart degraded until next subscribe");
        }
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

/// Initialize logging.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
