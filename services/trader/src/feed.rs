//! Market data feed
//!
//! Connects to a Binance-style kline WebSocket stream and publishes a
//! `CandleClosed` event for every completed candle. The connection runs in
//! a background task owned by the processor; it reconnects with exponential
//! backoff and drops malformed messages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bus::{Event, EventBus, EventKind, Processor};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use types::payloads::CandleClosed;

use crate::config::FeedConfig;

/// One kline stream message, Binance wire format.
#[derive(Debug, Deserialize)]
struct KlineMessage {
    #[serde(rename = "k")]
    kline: Kline,
}

#[derive(Debug, Deserialize)]
struct Kline {
    /// Candle open time, epoch milliseconds
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    /// True when this update closes the candle
    #[serde(rename = "x")]
    is_closed: bool,
}

/// Parse a raw stream message into a payload, closed candles only.
fn parse_closed_candle(symbol: &str, text: &str) -> Option<CandleClosed> {
    let message: KlineMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(err) => {
            debug!(error = %err, "ignoring non-kline message");
            return None;
        }
    };
    let k = message.kline;
    if !k.is_closed {
        return None;
    }
    let timestamp = DateTime::<Utc>::from_timestamp_millis(k.open_time)?;
    let parse = |s: &str, field: &str| -> Option<f64> {
        s.parse().map_err(|_| warn!(field, value = s, "unparseable kline field")).ok()
    };
    Some(CandleClosed {
        symbol: symbol.to_string(),
        interval: k.interval,
        open: parse(&k.open, "open")?,
        high: parse(&k.high, "high")?,
        low: parse(&k.low, "low")?,
        close: parse(&k.close, "close")?,
        volume: parse(&k.volume, "volume")?,
        timestamp,
    })
}

/// Streams closed candles from the exchange onto the bus.
///
/// Has no subscriptions of its own; its whole job happens in `on_start` /
/// `on_stop`.
pub struct MarketFeed {
    bus: Arc<EventBus>,
    config: FeedConfig,
    symbol: String,
    interval: String,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MarketFeed {
    pub fn new(
        bus: Arc<EventBus>,
        config: FeedConfig,
        symbol: impl Into<String>,
        interval: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            config,
            symbol: symbol.into(),
            interval: interval.into(),
            task: Mutex::new(None),
        }
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/{}@kline_{}",
            self.config.ws_url,
            self.symbol.to_lowercase(),
            self.interval
        )
    }

    async fn run(bus: Arc<EventBus>, config: FeedConfig, symbol: String, url: String) {
        let mut delay = Duration::from_millis(config.reconnect_delay_ms);
        let max_delay = Duration::from_millis(config.max_reconnect_delay_ms);
        let mut failed_connects = 0u32;
        loop {
            info!(url = %url, "connecting to kline stream");
            match connect_async(url.as_str()).await {
                Ok((stream, _)) => {
                    info!(symbol = %symbol, "kline stream connected");
                    delay = Duration::from_millis(config.reconnect_delay_ms);
                    failed_connects = 0;
                    let (_, mut read) = stream.split();
                    while let Some(message) = read.next().await {
                        match message {
                            Ok(Message::Text(text)) => {
                                let Some(payload) = parse_closed_candle(&symbol, &text) else {
                                    continue;
                                };
                                match Event::with_payload(EventKind::CandleClosed, &payload, "feed")
                                {
                                    Ok(event) => {
                                        if bus.publish(event).is_err() {
                                            info!("bus stopped, feed exiting");
                                            return;
                                        }
                                    }
                                    Err(err) => {
                                        warn!(error = %err, "candle payload did not serialize")
                                    }
                                }
                            }
                            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                            Ok(Message::Close(frame)) => {
                                warn!(?frame, "stream closed by server");
                                break;
                            }
                            Ok(_) => {}
                            Err(err) => {
                                warn!(error = %err, "stream read error");
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    failed_connects += 1;
                    warn!(
                        error = %err,
                        attempt = failed_connects,
                        "kline stream connect failed"
                    );
                    if config.max_reconnect_attempts > 0
                        && failed_connects >= config.max_reconnect_attempts
                    {
                        error!(
                            attempts = failed_connects,
                            "reconnect attempts exhausted, feed giving up"
                        );
                        return;
                    }
                }
            }
            warn!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(max_delay);
        }
    }
}

#[async_trait]
impl Processor for MarketFeed {
    fn name(&self) -> &str {
        "feed"
    }

    fn register_handlers(&self) {}
    fn unregister_handlers(&self) {}

    async fn on_start(&self) -> anyhow::Result<()> {
        let url = self.stream_url();
        url::Url::parse(&url).map_err(|err| anyhow::anyhow!("bad stream url {url}: {err}"))?;
        let task = tokio::spawn(Self::run(
            Arc::clone(&self.bus),
            self.config.clone(),
            self.symbol.clone(),
            url,
        ));
        *self.task.lock() = Some(task);
        Ok(())
    }

    async fn on_stop(&self) -> anyhow::Result<()> {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        Ok(())
    }
}
