//! Entry signal generation

use std::sync::Arc;

use async_trait::async_trait;
use bus::{Event, EventBus, EventKind, Handler, HandlerId, Processor};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use types::payloads::{CandleClosed, EntrySignal};
use types::{Direction, Side};

use crate::state::StateStore;

/// Stop offset applied beyond the order block edge, as a fraction of it.
const STOP_OFFSET: f64 = 0.002;
/// Take-profit distance from the entry price, as a fraction of it.
const TARGET_OFFSET: f64 = 0.01;

/// Scans the state store on every candle close and emits an `EntrySignal`
/// when the close lands inside a valid order block zone.
///
/// Must observe the store after the pattern processor has updated it for
/// the same candle, so it registers later in the pipeline.
pub struct SignalProcessor {
    inner: Arc<Inner>,
    subscriptions: Mutex<Vec<(EventKind, HandlerId)>>,
}

struct Inner {
    bus: Arc<EventBus>,
    store: Arc<RwLock<StateStore>>,
}

impl SignalProcessor {
    pub fn new(bus: Arc<EventBus>, store: Arc<RwLock<StateStore>>) -> Self {
        Self {
            inner: Arc::new(Inner { bus, store }),
            subscriptions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Processor for SignalProcessor {
    fn name(&self) -> &str {
        "signal"
    }

    fn register_handlers(&self) {
        let inner = Arc::clone(&self.inner);
        let id = self.inner.bus.subscribe(
            EventKind::CandleClosed,
            "signal",
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
        let price = payload.close;

        let signal = {
            let mut store = self.store.write();
            if store.has_position() {
                debug!(symbol = %payload.symbol, "position open, not scanning for entries");
                return;
            }
            self.scan(&store, &payload.symbol, price).map(|mut signal| {
                if let Some(touches) = store.record_touch(&signal.order_block) {
                    signal.order_block.touches = touches;
                }
                signal
            })
        };
        let Some(signal) = signal else { return };

        info!(
            symbol = %signal.symbol,
            side = %signal.side,
            price = signal.price,
            stop_loss = signal.stop_loss,
            take_profit = signal.take_profit,
            confluence = signal.confluence,
            "entry signal"
        );
        match Event::with_payload(EventKind::EntrySignal, &signal, "signal") {
            Ok(event) => {
                if let Err(err) = self.bus.publish(event) {
                    debug!(error = %err, "entry signal not published");
                }
            }
            Err(err) => warn!(error = %err, "entry signal did not serialize"),
        }
    }

    /// First valid zone containing the price wins, bullish zones checked
    /// before bearish, oldest surviving zone first within each direction.
    fn scan(&self, store: &StateStore, symbol: &str, price: f64) -> Option<EntrySignal> {
        for direction in [Direction::Bullish, Direction::Bearish] {
            let Some(ob) = store
                .valid_order_blocks(Some(direction))
                .into_iter()
                .find(|ob| ob.contains(price))
            else {
                continue;
            };
            let confluence = store
                .valid_fvgs(Some(direction))
                .iter()
                .any(|fvg| fvg.contains(price));
            let (side, stop_loss, take_profit) = match direction {
                Direction::Bullish => (
                    Side::Long,
                    ob.bottom * (1.0 - STOP_OFFSET),
                    price * (1.0 + TARGET_OFFSET),
                ),
                Direction::Bearish => (
                    Side::Short,
                    ob.top * (1.0 + STOP_OFFSET),
                    price * (1.0 - TARGET_OFFSET),
                ),
            };
            return Some(EntrySignal {
                symbol: symbol.to_string(),
                side,
                price,
                stop_loss,
                take_profit,
                confluence,
                order_block: ob,
            });
        }
        None
    }
}
