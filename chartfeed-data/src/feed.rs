//! Live feed subscriber.
//!
//! Owns the one WebSocket connection per session, demultiplexes control
//! frames (`MODE`) from data frames (`TICK`), and drives the batcher. The
//! read loop only parses, normalizes, and enqueues; all aggregation work
//! happens behind the batcher on the worker side.

use crate::{batch::Batcher, diag::Diagnostics, error::FeedError, tick::RawTick};
use chrono::Utc;
use derive_more::Display;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use smol_str::SmolStr;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

/// Connection lifecycle as observed by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionStatus {
    #[display("idle")]
    Idle,
    #[display("connecting")]
    Connecting,
    #[display("connected")]
    Connected,
    #[display("disconnected")]
    Disconnected,
}

/// Session-wide replay/live flag, driven by `MODE` control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display)]
pub enum FeedMode {
    #[default]
    #[serde(rename = "LIVE")]
    #[display("live")]
    Live,
    #[serde(rename = "REPLAY")]
    #[display("replay")]
    Replay,
}

/// Wire frames, dispatched on the `type` tag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
enum FeedMessage {
    #[serde(rename = "MODE")]
    Mode { mode: FeedMode },
    #[serde(rename = "TICK")]
    Tick { data: TickEnvelope },
}

/// Payload of a `TICK` frame: the symbol code plus the raw tick record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct TickEnvelope {
    code: SmolStr,
    data: RawTick,
}

/// Feed subscriber configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// WebSocket server URL.
    pub url: String,
    /// Ping interval to keep the connection alive.
    pub ping_interval: Duration,
    /// Delay before re-establishing a dropped connection.
    pub reconnect_delay: Duration,
    /// Whether to reconnect at all; disable for one-shot sessions.
    pub reconnect: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9001/ws".to_string(),
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            reconnect: true,
        }
    }
}

impl FeedConfig {
    /// Create a configuration with a custom URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Read the URL from `CHARTFEED_WS_URL`, keeping defaults otherwise.
    pub fn from_env() -> Self {
        match std::env::var("CHARTFEED_WS_URL") {
            Ok(url) => Self::new(url),
            Err(_) => Self::default(),
        }
    }

    /// Set the ping interval.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Enable or disable reconnection.
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Handle over a running feed task.
///
/// [`close`](Self::close) tears the session down deterministically and
/// waits for the read loop to exit. Dropping the handle closes the shutdown
/// channel, which ends the loop at its next await point.
#[derive(Debug)]
pub struct FeedHandle {
    task: JoinHandle<()>,
    shutdown_tx: mpsc::Sender<()>,
    status_rx: watch::Receiver<ConnectionStatus>,
    mode_rx: watch::Receiver<FeedMode>,
}

impl FeedHandle {
    /// Watch connection status transitions.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Watch the session-wide live/replay flag.
    pub fn mode(&self) -> watch::Receiver<FeedMode> {
        self.mode_rx.clone()
    }

    /// Close the transport and wait for the read loop to finish. After this
    /// returns, no late frame can reach the batcher.
    pub async fn close(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

/// Start the feed task for one session.
///
/// Validates the URL up front; transport failures after that surface as
/// status transitions, never as panics.
pub fn spawn_feed(
    config: FeedConfig,
    batcher: Batcher,
    diag: Arc<Diagnostics>,
) -> Result<FeedHandle, FeedError> {
    Url::parse(&config.url)?;

    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Idle);
    let (mode_tx, mode_rx) = watch::channel(FeedMode::default());
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    let task = tokio::spawn(run_feed_loop(
        config,
        batcher,
        diag,
        status_tx,
        mode_tx,
        shutdown_rx,
    ));

    Ok(FeedHandle {
        task,
        shutdown_tx,
        status_rx,
        mode_rx,
    })
}

async fn run_feed_loop(
    config: FeedConfig,
    batcher: Batcher,
    diag: Arc<Diagnostics>,
    status_tx: watch::Sender<ConnectionStatus>,
    mode_tx: watch::Sender<FeedMode>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    info!(url = %config.url, "starting feed subscriber");

    loop {
        status_tx.send_replace(ConnectionStatus::Connecting);

        // Teardown during the handshake must not wait for the handshake.
        let connect_result = tokio::select! {
            _ = shutdown_rx.recv() => {
                status_tx.send_replace(ConnectionStatus::Idle);
                info!("feed subscriber closed");
                return;
            }
            result = connect_async(&config.url) => result,
        };

        match connect_result {
            Ok((ws_stream, _)) => {
                info!(url = %config.url, "feed connected");
                status_tx.send_replace(ConnectionStatus::Connected);

                let (mut write, mut read) = ws_stream.split();
                let mut ping_timer = tokio::time::interval(config.ping_interval);
                // The first tick of a fresh interval fires immediately.
                ping_timer.tick().await;

                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            let _ = write.send(Message::Close(None)).await;
                            status_tx.send_replace(ConnectionStatus::Idle);
                            info!("feed subscriber closed");
                            return;
                        }
                        _ = ping_timer.tick() => {
                            if write.send(Message::Ping(vec![].into())).await.is_err() {
                                debug!("ping failed, connection likely dead");
                                break;
                            }
                        }
                        frame = read.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                handle_frame(&text, &batcher, &mode_tx, &diag);
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!("server closed connection");
                                break;
                            }
                            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                                // Heartbeat, handled by the transport.
                            }
                            Some(Ok(_)) => {}
                            Some(Err(ws_error)) => {
                                let feed_error = FeedError::from(ws_error);
                                if feed_error.is_terminal() {
                                    error!(%feed_error, "terminal transport error");
                                    break;
                                }
                                warn!(%feed_error, "transport error, continuing");
                            }
                            None => {
                                debug!("feed stream ended");
                                break;
                            }
                        }
                    }
                }

                status_tx.send_replace(ConnectionStatus::Disconnected);
            }
            Err(connect_error) => {
                error!(url = %config.url, %connect_error, "feed connection failed");
                status_tx.send_replace(ConnectionStatus::Disconnected);
            }
        }

        if !config.reconnect {
            return;
        }

        debug!(delay = ?config.reconnect_delay, "waiting before reconnecting");
        tokio::select! {
            _ = shutdown_rx.recv() => {
                status_tx.send_replace(ConnectionStatus::Idle);
                return;
            }
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }
}

/// Parse one text frame and route it. A bad frame is counted and skipped; it
/// never takes the read loop down.
fn handle_frame(
    text: &str,
    batcher: &Batcher,
    mode_tx: &watch::Sender<FeedMode>,
    diag: &Diagnostics,
) {
    match serde_json::from_str::<FeedMessage>(text) {
        Ok(FeedMessage::Mode { mode }) => {
            mode_tx.send_replace(mode);
            debug!(%mode, "feed mode switched");
        }
        Ok(FeedMessage::Tick { data }) => {
            let ingested_at = Utc::now().timestamp();
            match data.data.normalize(ingested_at) {
                Some(tick) => {
                    batcher.submit(data.code, tick, data.data.change_rate());
                    diag.record_ingested();
                }
                None => {
                    diag.record_dropped();
                    debug!(code = %data.code, "tick rejected by normalizer");
                }
            }
        }
        Err(parse_error) => {
            diag.record_malformed_frame();
            debug!(%parse_error, "failed to parse feed frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod de {
        use super::*;
        use crate::tick::NormalizedTick;

        #[test]
        fn test_feed_message_dispatch() {
            struct TestCase {
                input: &'static str,
                expected: Result<FeedMessage, ()>,
            }

            let tests = vec![
                // TC0: MODE frame, live
                TestCase {
                    input: r#"{"type": "MODE", "mode": "LIVE"}"#,
                    expected: Ok(FeedMessage::Mode {
                        mode: FeedMode::Live,
                    }),
                },
                // TC1: MODE frame, replay
                TestCase {
                    input: r#"{"type": "MODE", "mode": "REPLAY"}"#,
                    expected: Ok(FeedMessage::Mode {
                        mode: FeedMode::Replay,
                    }),
                },
                // TC2: unknown type tag is an error, not a crash
                TestCase {
                    input: r#"{"type": "NOISE"}"#,
                    expected: Err(()),
                },
                // TC3: missing tag is an error
                TestCase {
                    input: r#"{"mode": "LIVE"}"#,
                    expected: Err(()),
                },
            ];

            for (index, test) in tests.into_iter().enumerate() {
                let actual = serde_json::from_str::<FeedMessage>(test.input);
                match (actual, test.expected) {
                    (Ok(actual), Ok(expected)) => {
                        assert_eq!(actual, expected, "TC{} failed", index)
                    }
                    (Err(_), Err(())) => {}
                    (actual, expected) => {
                        panic!(
                            "TC{index} failed because actual != expected. \nActual: {actual:?}\nExpected: {expected:?}\n"
                        );
                    }
                }
            }
        }

        #[test]
        fn test_tick_frame_reaches_batcher() {
            let input = r#"
                {
                    "type": "TICK",
                    "data": {
                        "code": "005930",
                        "data": {
                            "price": "70300",
                            "volume": 12,
                            "change_rate": -0.42,
                            "timestamp": 1700000000
                        }
                    }
                }
            "#;

            let batcher = Batcher::new();
            let diag = Diagnostics::default();
            let (mode_tx, _mode_rx) = watch::channel(FeedMode::default());

            handle_frame(input, &batcher, &mode_tx, &diag);

            assert_eq!(batcher.pending_len(), 1);
            assert_eq!(diag.snapshot().ticks_ingested, 1);

            let (tx, mut rx) = mpsc::channel(1);
            batcher.flush_once(&tx);
            let batch = rx.try_recv().unwrap();
            assert_eq!(batch.code, "005930");
            assert_eq!(
                batch.ticks,
                vec![NormalizedTick::new(1_700_000_000, 70_300.0, 12.0)]
            );
            assert_eq!(batch.summary.change_rate, Some(-0.42));
        }

        #[test]
        fn test_rejected_tick_counts_a_drop() {
            let input = r#"{"type": "TICK", "data": {"code": "005930", "data": {"price": "0"}}}"#;

            let batcher = Batcher::new();
            let diag = Diagnostics::default();
            let (mode_tx, _mode_rx) = watch::channel(FeedMode::default());

            handle_frame(input, &batcher, &mode_tx, &diag);

            assert_eq!(batcher.pending_len(), 0);
            assert_eq!(diag.snapshot().ticks_dropped, 1);
        }

        #[test]
        fn test_malformed_frame_counts_and_continues() {
            let batcher = Batcher::new();
            let diag = Diagnostics::default();
            let (mode_tx, _mode_rx) = watch::channel(FeedMode::default());

            handle_frame("not json at all", &batcher, &mode_tx, &diag);
            handle_frame(r#"{"type": "TICK", "data": 42}"#, &batcher, &mode_tx, &diag);

            assert_eq!(diag.snapshot().frames_malformed, 2);
            assert_eq!(batcher.pending_len(), 0);
        }

        #[test]
        fn test_mode_frame_updates_watch() {
            let batcher = Batcher::new();
            let diag = Diagnostics::default();
            let (mode_tx, mode_rx) = watch::channel(FeedMode::default());

            handle_frame(
                r#"{"type": "MODE", "mode": "REPLAY"}"#,
                &batcher,
                &mode_tx,
                &diag,
            );
            assert_eq!(*mode_rx.borrow(), FeedMode::Replay);
        }
    }

    #[test]
    fn test_config_builder() {
        let config = FeedConfig::new("ws://localhost:9001/ws")
            .with_ping_interval(Duration::from_secs(15))
            .with_reconnect_delay(Duration::from_secs(5))
            .with_reconnect(false);

        assert_eq!(config.url, "ws://localhost:9001/ws");
        assert_eq!(config.ping_interval, Duration::from_secs(15));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert!(!config.reconnect);
    }

    #[test]
    fn test_spawn_feed_rejects_bad_url() {
        tokio_test::block_on(async {
            let result = spawn_feed(
                FeedConfig::new("not a url"),
                Batcher::new(),
                Arc::new(Diagnostics::default()),
            );
            assert!(matches!(result, Err(FeedError::Url(_))));
        });
    }
}
