//! Real-time tick ingestion and bounded OHLCV candle aggregation.
//!
//! `chartfeed-data` turns a live stream of trade ticks into the candle
//! series a chart consumes, at a user-selectable interval, with bounded
//! memory and a fixed update cadence:
//!
//! - [`feed`]: the WebSocket subscriber owning the one connection per
//!   session. It demultiplexes `MODE` control frames from `TICK` data
//!   frames, normalizes ticks, and enqueues them. Auto-reconnects with a
//!   configurable delay.
//! - [`tick`]: the normalizer. Canonical and vendor field-code payloads both
//!   collapse into one [`NormalizedTick`](tick::NormalizedTick); unusable
//!   ticks are dropped and counted, never thrown.
//! - [`batch`]: the ingestion batcher. Tick bursts are coalesced per symbol
//!   over a fixed flush period, so consumers see at most one update per
//!   symbol per period while the candle series still reflects every tick.
//! - [`aggregate`] / [`candle`] / [`interval`]: the bucketing core. Full
//!   rebuild for cold starts and interval switches, an O(1)-amortized
//!   append for live ticks.
//! - [`history`] / [`state`]: bounded per-symbol buffers and the state
//!   object that owns them, written to by exactly one worker.
//! - [`engine`]: the aggregation worker task wiring batches, commands, and
//!   update fan-out together.
//! - [`client`]: the REST client for the stock list and the bounded
//!   cold-start history window.
//! - [`rank`]: rank movement and self-clearing price flashes for the
//!   current-value table.
//!
//! # Example
//!
//! ```no_run
//! use chartfeed_data::{
//!     batch::Batcher,
//!     config::EngineConfig,
//!     diag::Diagnostics,
//!     engine::AggregationEngine,
//!     feed::{spawn_feed, FeedConfig},
//! };
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> Result<(), chartfeed_data::error::FeedError> {
//! let config = EngineConfig::default();
//! let diag = Arc::new(Diagnostics::default());
//! let batcher = Batcher::new();
//!
//! let (batch_tx, batch_rx) = mpsc::channel(config.batch_capacity);
//! let _flush = batcher.spawn_flush(config.flush_interval, batch_tx);
//!
//! let (engine, mut updates) = AggregationEngine::spawn(config, None, batch_rx, diag.clone());
//! let feed = spawn_feed(FeedConfig::from_env(), batcher.clone(), diag)?;
//!
//! engine.subscribe("005930").await;
//! while let Some(update) = updates.recv().await {
//!     println!("{update:?}");
//! }
//!
//! feed.close().await;
//! engine.close().await;
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod batch;
pub mod candle;
pub mod client;
pub mod config;
pub mod diag;
pub mod engine;
pub mod error;
pub mod feed;
pub mod history;
pub mod interval;
pub mod rank;
pub mod state;
pub mod tick;

pub use aggregate::CandleSeries;
pub use batch::{Batcher, TickBatch, TickSummary};
pub use candle::Candle;
pub use client::{ApiClient, ApiConfig, StockInfo};
pub use config::{EngineConfig, LateTickPolicy};
pub use diag::Diagnostics;
pub use engine::{AggregationEngine, EngineHandle, EngineUpdate};
pub use error::FeedError;
pub use feed::{ConnectionStatus, FeedConfig, FeedHandle, FeedMode, spawn_feed};
pub use history::TickHistory;
pub use interval::Interval;
pub use rank::{RankDelta, RankRow, RankTracker};
pub use state::SymbolState;
pub use tick::{NormalizedTick, RawTick};
