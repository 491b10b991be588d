//! Pattern detection processor

use std::sync::Arc;

use async_trait::async_trait;
use bus::{Event, EventBus, EventKind, Handler, HandlerId, Processor};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use types::payloads::{CandleClosed, FvgDetected, OrderBlockDetected};
use types::{Fvg, OrderBlock};

use crate::config::PatternConfig;
use crate::patterns::{detect_fvg, detect_order_block};
use crate::state::StateStore;

/// Consumes `CandleClosed`, maintains candle history, and republishes any
/// pattern it detects as `OrderBlockDetected` / `FvgDetected`.
pub struct PatternProcessor {
    inner: Arc<Inner>,
    subscriptions: Mutex<Vec<(EventKind, HandlerId)>>,
}

struct Inner {
    bus: Arc<EventBus>,
    store: Arc<RwLock<StateStore>>,
    config: PatternConfig,
}

impl PatternProcessor {
    pub fn new(bus: Arc<EventBus>, store: Arc<RwLock<StateStore>>, config: PatternConfig) -> Self {
        Self {
            inner: Arc::new(Inner { bus, store, config }),
            subscriptions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Processor for PatternProcessor {
    fn name(&self) -> &str {
        "pattern"
    }

    fn register_handlers(&self) {
        let inner = Arc::clone(&self.inner);
        let id = self.inner.bus.subscribe(
            EventKind::CandleClosed,
            "pattern",
            Handler::sync(move |event| inner.on_candle(&event)),
        );
        self.subscriptions.lock().push((EventKind::CandleClosed, id));
    }

    fn unregister_handlers(&self) {
        for (kind, id) in self.subscriptions.lock().drain(..) {
            self.inner.bus.unsubscribe(kind, id);
        }
    }
}

impl Inner {
    fn on_candle(&self, event: &Event) {
        let payload: CandleClosed = match event.parse_payload() {
            Ok(p) => p,
            Err(err) => {
                warn!(error = %err, "dropping malformed candle event");
                return;
            }
        };
        let candle = match payload.to_candle() {
            Ok(c) => c,
            Err(err) => {
                warn!(symbol = %payload.symbol, error = %err, "dropping invalid candle");
                return;
            }
        };

        let mut detected_ob: Option<OrderBlock> = None;
        let mut detected_fvg: Option<Fvg> = None;
        {
            let mut store = self.store.write();
            store.add_candle(candle);
            let window = store.recent_candles(3);
            if let [.., prev, last] = window.as_slice() {
                detected_ob = detect_order_block(prev, last, &self.config);
            }
            if let [c1, c2, c3] = window.as_slice() {
                detected_fvg = detect_fvg(c1, c2, c3, &self.config);
            }
            if let Some(ob) = &detected_ob {
                store.add_order_block(ob.clone());
            }
            if let Some(fvg) = &detected_fvg {
                store.add_fvg(fvg.clone());
            }
            store.cleanup(self.config.max_age_candles);
        }

        if let Some(order_block) = detected_ob {
            info!(
                symbol = %payload.symbol,
                direction = %order_block.direction,
                top = order_block.top,
                bottom = order_block.bottom,
                "order block detected"
            );
            self.republish(
                EventKind::OrderBlockDetected,
                &OrderBlockDetected {
                    symbol: payload.symbol.clone(),
                    order_block,
                },
            );
        }
        if let Some(fvg) = detected_fvg {
            info!(
                symbol = %payload.symbol,
                direction = %fvg.direction,
                top = fvg.top,
                bottom = fvg.bottom,
                "fair value gap detected"
            );
            self.republish(
                EventKind::FvgDetected,
                &FvgDetected {
                    symbol: payload.symbol,
                    fvg,
                },
            );
        }
    }

    fn republish<T: serde::Serialize>(&self, kind: EventKind, payload: &T) {
        match Event::with_payload(kind, payload, "pattern") {
            Ok(event) => {
                if let Err(err) = self.bus.publish(event) {
                    debug!(kind = %kind, error = %err, "pattern event not published");
                }
            }
            Err(err) => warn!(kind = %kind, error = %err, "pattern payload did not serialize"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::BusConfig;
    use chrono::{TimeZone, Utc};
    use types::Direction;

    fn candle_event(minute: i64, open: f64, high: f64, low: f64, close: f64) -> Event {
        let payload = CandleClosed {
            symbol: "BTCUSDT".into(),
            interval: "1m".into(),
            open,
            high,
            low,
            close,
            volume: 1.0,
            timestamp: Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap(),
        };
        Event::with_payload(EventKind::CandleClosed, &payload, "test").unwrap()
    }

    fn setup() -> (Arc<EventBus>, Arc<RwLock<StateStore>>, PatternProcessor) {
        let bus = EventBus::new(BusConfig::default());
        let store = Arc::new(RwLock::new(StateStore::new(500)));
        let processor = PatternProcessor::new(
            Arc::clone(&bus),
            Arc::clone(&store),
            PatternConfig::default(),
        );
        (bus, store, processor)
    }

    #[tokio::test]
    async fn reversal_candles_store_an_order_block() {
        let (bus, store, processor) = setup();
        processor.register_handlers();
        bus.emit(candle_event(0, 100.0, 105.0, 95.0, 96.0)).await.unwrap();
        bus.emit(candle_event(1, 96.0, 110.0, 95.0, 108.0)).await.unwrap();

        let state = store.read();
        assert_eq!(state.candle_count(), 2);
        let blocks = state.valid_order_blocks(Some(Direction::Bullish));
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].top, 105.0);
        assert_eq!(blocks[0].bottom, 95.0);
    }

    #[tokio::test]
    async fn invalid_candle_is_dropped() {
        let (bus, store, processor) = setup();
        processor.register_handlers();
        // high below low
        bus.emit(candle_event(0, 100.0, 95.0, 99.0, 96.0)).await.unwrap();
        assert_eq!(store.read().candle_count(), 0);
    }

    #[tokio::test]
    async fn unregister_stops_processing() {
        let (bus, store, processor) = setup();
        processor.register_handlers();
        processor.unregister_handlers();
        bus.emit(candle_event(0, 100.0, 105.0, 95.0, 96.0)).await.unwrap();
        assert_eq!(store.read().candle_count(), 0);
    }
}
