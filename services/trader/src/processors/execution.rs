//! Order execution state machine

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bus::{Event, EventBus, EventKind, Handler, HandlerId, Processor};
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};
use types::payloads::{CandleClosed, EntrySignal, ErrorEvent, OrderFilled, OrderPlaced, PositionClosed};
use types::{Position, Side};

use crate::broker::{Broker, OrderRequest, OrderType};
use crate::config::ExecutionConfig;
use crate::risk::RiskManager;
use crate::state::StateStore;

/// Execution lifecycle. Transitions happen only under the state mutex, so
/// concurrent signals and candle closes cannot double-enter or double-exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecState {
    Idle,
    Entering,
    Open { protected: bool },
    Exiting,
}

/// Turns entry signals into broker orders and manages the open position
/// until it exits on a stop-loss or take-profit touch.
pub struct ExecutionProcessor {
    inner: Arc<Inner>,
    subscriptions: parking_lot::Mutex<Vec<(EventKind, HandlerId)>>,
}

struct Inner {
    bus: Arc<EventBus>,
    store: Arc<RwLock<StateStore>>,
    broker: Arc<dyn Broker>,
    risk: Arc<RiskManager>,
    config: ExecutionConfig,
    // tokio mutex: held across broker calls
    state: tokio::sync::Mutex<ExecState>,
}

impl ExecutionProcessor {
    pub fn new(
        bus: Arc<EventBus>,
        store: Arc<RwLock<StateStore>>,
        broker: Arc<dyn Broker>,
        risk: Arc<RiskManager>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                store,
                broker,
                risk,
                config,
                state: tokio::sync::Mutex::new(ExecState::Idle),
            }),
            subscriptions: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Processor for ExecutionProcessor {
    fn name(&self) -> &str {
        "execution"
    }

    fn register_handlers(&self) {
        let mut subs = self.subscriptions.lock();

        // Entry and exit sequences call the broker and must run to
        // completion even when retries outlast the per-handler dispatch
        // budget, so each event is handed to its own task. The state mutex
        // serializes the transitions.
        let inner = Arc::clone(&self.inner);
        let id = self.inner.bus.subscribe(
            EventKind::EntrySignal,
            "execution",
            Handler::async_fn(move |event| {
                let inner = Arc::clone(&inner);
                async move {
                    tokio::spawn(async move { inner.on_signal(event).await });
                }
            }),
        );
        subs.push((EventKind::EntrySignal, id));

        let inner = Arc::clone(&self.inner);
        let id = self.inner.bus.subscribe(
            EventKind::CandleClosed,
            "execution",
            Handler::async_fn(move |event| {
                let inner = Arc::clone(&inner);
                async move {
                    tokio::spawn(async move { inner.on_candle(event).await });
                }
            }),
        );
        subs.push((EventKind::CandleClosed, id));
    }

    fn unregister_handlers(&self) {
        for (kind, id) in self.subscriptions.lock().drain(..) {
            self.inner.bus.unsubscribe(kind, id);
        }
    }
}

impl Inner {
    async fn on_signal(&self, event: Event) {
        let signal: EntrySignal = match event.parse_payload() {
            Ok(s) => s,
            Err(err) => {
                warn!(error = %err, "dropping malformed entry signal");
                return;
            }
        };

        let mut state = self.state.lock().await;
        if *state != ExecState::Idle {
            debug!(state = ?*state, "signal ignored, machine not idle");
            return;
        }
        if !self.risk.can_trade() {
            info!(symbol = %signal.symbol, "signal rejected by daily limits");
            return;
        }
        let size = match self.risk.position_size(signal.price, signal.stop_loss).await {
            Ok(size) => size,
            Err(err) => {
                self.report_error("position sizing", &err.to_string()).await;
                return;
            }
        };
        if size <= 0.0 {
            info!(symbol = %signal.symbol, "sized to zero, not trading");
            return;
        }

        *state = ExecState::Entering;
        let request = OrderRequest::market(&signal.symbol, signal.side, size, signal.price);
        let ack = match self.broker.create_order(request).await {
            Ok(ack) => ack,
            Err(err) => {
                *state = ExecState::Idle;
                self.report_error("entry order", &err.to_string()).await;
                return;
            }
        };
        let fill_price = ack.fill_price.unwrap_or(signal.price);
        let position = match Position::new(
            &signal.symbol,
            signal.side,
            fill_price,
            ack.filled_quantity,
            signal.stop_loss,
            signal.take_profit,
            Utc::now(),
        ) {
            Ok(p) => p,
            Err(err) => {
                // Filled but the risk levels no longer bracket the fill.
                // Treat as unprotected open so the exit path still runs.
                *state = ExecState::Open { protected: false };
                self.report_error("position bookkeeping", &err.to_string()).await;
                return;
            }
        };
        self.store.write().set_position(position.clone());
        info!(
            symbol = %position.symbol,
            side = %position.side,
            entry = position.entry_price,
            size = position.size,
            order_id = %ack.order_id,
            "entered position"
        );

        self.publish(
            EventKind::OrderPlaced,
            &OrderPlaced {
                order_id: ack.order_id.clone(),
                symbol: position.symbol.clone(),
                side: position.side,
                order_type: OrderType::Market.as_str().to_string(),
                quantity: position.size,
                price: fill_price,
            },
        )
        .await;
        self.publish(
            EventKind::OrderFilled,
            &OrderFilled {
                order_id: ack.order_id,
                symbol: position.symbol.clone(),
                side: position.side,
                fill_price,
                filled_size: position.size,
                timestamp: Utc::now(),
            },
        )
        .await;

        let protected = self.place_protection(&position).await;
        *state = ExecState::Open { protected };
        if !protected {
            self.report_error(
                "protective orders",
                &format!(
                    "{} {} position of {} is open without protective orders",
                    position.symbol, position.side, position.size
                ),
            )
            .await;
        }
    }

    /// Place the stop-loss and take-profit orders, each with a bounded
    /// retry budget. Returns false when either order could not be placed.
    async fn place_protection(&self, position: &Position) -> bool {
        let close_side = position.side.opposite();
        let orders = [
            (OrderType::StopMarket, position.stop_loss),
            (OrderType::TakeProfitMarket, position.take_profit),
        ];
        for (order_type, trigger) in orders {
            let mut placed = false;
            for attempt in 1..=self.config.protection_attempts {
                let request = OrderRequest::protective(
                    &position.symbol,
                    close_side,
                    order_type,
                    position.size,
                    trigger,
                );
                match self.broker.create_order(request).await {
                    Ok(ack) => {
                        debug!(
                            order_id = %ack.order_id,
                            order_type = order_type.as_str(),
                            trigger,
                            "protective order placed"
                        );
                        placed = true;
                        break;
                    }
                    Err(err) => {
                        warn!(
                            order_type = order_type.as_str(),
                            attempt,
                            attempts = self.config.protection_attempts,
                            error = %err,
                            "protective order attempt failed"
                        );
                        tokio::time::sleep(Duration::from_millis(
                            self.config.protection_retry_delay_ms,
                        ))
                        .await;
                    }
                }
            }
            if !placed {
                return false;
            }
        }
        true
    }

    async fn on_candle(&self, event: Event) {
        let payload: CandleClosed = match event.parse_payload() {
            Ok(p) => p,
            Err(err) => {
                warn!(error = %err, "dropping malformed candle event");
                return;
            }
        };

        let mut state = self.state.lock().await;
        let ExecState::Open { protected } = *state else {
            return;
        };
        let Some(position) = self.store.read().position().cloned() else {
            warn!("open state without a stored position, resetting");
            *state = ExecState::Idle;
            return;
        };

        let exit = match position.side {
            Side::Long if payload.low <= position.stop_loss => {
                Some((position.stop_loss, "stop_loss"))
            }
            Side::Long if payload.high >= position.take_profit => {
                Some((position.take_profit, "take_profit"))
            }
            Side::Short if payload.high >= position.stop_loss => {
                Some((position.stop_loss, "stop_loss"))
            }
            Side::Short if payload.low <= position.take_profit => {
                Some((position.take_profit, "take_profit"))
            }
            _ => None,
        };
        let Some((exit_price, reason)) = exit else {
            return;
        };

        *state = ExecState::Exiting;
        let request = OrderRequest::market_close(
            &position.symbol,
            position.side.opposite(),
            position.size,
            exit_price,
        );
        let ack = match self.broker.create_order(request).await {
            Ok(ack) => ack,
            Err(err) => {
                // The broker still holds the position; stay open and retry
                // on the next candle.
                *state = ExecState::Open { protected };
                self.report_error("exit order", &err.to_string()).await;
                return;
            }
        };

        let fill_price = ack.fill_price.unwrap_or(exit_price);
        let pnl = position.realized_pnl(fill_price);
        self.store.write().take_position();
        self.risk.record_result(pnl);
        if let Err(err) = self.broker.settle_pnl(pnl).await {
            warn!(error = %err, "pnl settlement failed");
        }
        info!(
            symbol = %position.symbol,
            side = %position.side,
            exit = fill_price,
            pnl,
            reason,
            "position closed"
        );
        self.publish(
            EventKind::PositionClosed,
            &PositionClosed {
                symbol: position.symbol.clone(),
                side: position.side,
                entry_price: position.entry_price,
                exit_price: fill_price,
                size: position.size,
                realized_pnl: pnl,
                close_reason: reason.to_string(),
                timestamp: Utc::now(),
            },
        )
        .await;
        *state = ExecState::Idle;
    }

    async fn report_error(&self, context: &str, message: &str) {
        error!(context, message, "execution error");
        self.publish(
            EventKind::Error,
            &ErrorEvent {
                component: "execution".to_string(),
                context: context.to_string(),
                message: message.to_string(),
            },
        )
        .await;
    }

    async fn publish<T: serde::Serialize>(&self, kind: EventKind, payload: &T) {
        match Event::with_payload(kind, payload, "execution") {
            Ok(event) => {
                if let Err(err) = self.bus.publish(event) {
                    debug!(kind = %kind, error = %err, "execution event not published");
                }
            }
            Err(err) => warn!(kind = %kind, error = %err, "execution payload did not serialize"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerError, OrderAck, PaperBroker};
    use crate::config::RiskConfig;
    use bus::BusConfig;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Delegates to a paper broker but can fail specific order types.
    struct FlakyBroker {
        paper: PaperBroker,
        fail_protective: AtomicBool,
        fail_market: AtomicBool,
        orders: Mutex<Vec<OrderRequest>>,
        attempts: AtomicU32,
    }

    impl FlakyBroker {
        fn new() -> Self {
            Self {
                paper: PaperBroker::new(10_000.0),
                fail_protective: AtomicBool::new(false),
                fail_market: AtomicBool::new(false),
                orders: Mutex::new(Vec::new()),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Broker for FlakyBroker {
        async fn create_order(&self, request: OrderRequest) -> Result<OrderAck, BrokerError> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            let protective = request.order_type != OrderType::Market;
            if protective && self.fail_protective.load(Ordering::Relaxed) {
                return Err(BrokerError::Transport("protective down".into()));
            }
            if !protective && self.fail_market.load(Ordering::Relaxed) {
                return Err(BrokerError::Rejected("market down".into()));
            }
            self.orders.lock().push(request.clone());
            self.paper.create_order(request).await
        }

        async fn account_balance(&self, asset: &str) -> Result<f64, BrokerError> {
            self.paper.account_balance(asset).await
        }

        async fn settle_pnl(&self, pnl: f64) -> Result<(), BrokerError> {
            self.paper.settle_pnl(pnl).await
        }
    }

    struct Rig {
        bus: Arc<EventBus>,
        store: Arc<RwLock<StateStore>>,
        broker: Arc<FlakyBroker>,
        inner: Arc<Inner>,
        events: Arc<Mutex<Vec<(EventKind, serde_json::Map<String, serde_json::Value>)>>>,
    }

    fn rig() -> Rig {
        let bus = EventBus::new(BusConfig::default());
        let store = Arc::new(RwLock::new(StateStore::new(500)));
        let broker = Arc::new(FlakyBroker::new());
        let risk = Arc::new(RiskManager::new(
            RiskConfig::default(),
            Arc::clone(&broker) as Arc<dyn Broker>,
            10_000.0,
        ));
        let processor = ExecutionProcessor::new(
            Arc::clone(&bus),
            Arc::clone(&store),
            Arc::clone(&broker) as Arc<dyn Broker>,
            risk,
            ExecutionConfig {
                protection_attempts: 3,
                protection_retry_delay_ms: 1,
            },
        );
        let inner = Arc::clone(&processor.inner);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        for kind in [
            EventKind::OrderPlaced,
            EventKind::OrderFilled,
            EventKind::PositionClosed,
            EventKind::Error,
        ] {
            let sink = Arc::clone(&sink);
            bus.subscribe(
                kind,
                "capture",
                Handler::sync(move |event| {
                    sink.lock().push((event.kind(), event.payload().clone()));
                }),
            );
        }
        bus.start();
        Rig {
            bus,
            store,
            broker,
            inner,
            events,
        }
    }

    fn signal() -> Event {
        let payload = EntrySignal {
            symbol: "BTCUSDT".into(),
            side: Side::Long,
            price: 45_000.0,
            stop_loss: 44_500.0,
            take_profit: 45_450.0,
            confluence: false,
            order_block: types::OrderBlock::new(
                types::Direction::Bullish,
                45_100.0,
                44_600.0,
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )
            .unwrap(),
        };
        Event::with_payload(EventKind::EntrySignal, &payload, "test").unwrap()
    }

    fn candle(high: f64, low: f64) -> Event {
        let payload = CandleClosed {
            symbol: "BTCUSDT".into(),
            interval: "1m".into(),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 1.0,
            timestamp: Utc.timestamp_opt(1_700_000_060, 0).unwrap(),
        };
        Event::with_payload(EventKind::CandleClosed, &payload, "test").unwrap()
    }

    async fn settle(rig: &Rig) {
        for _ in 0..100 {
            if rig.bus.queue_len() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn entry_signal_opens_a_protected_position() {
        let rig = rig();
        rig.inner.on_signal(signal()).await;
        settle(&rig).await;

        assert_eq!(*rig.inner.state.lock().await, ExecState::Open { protected: true });
        let position = rig.store.read().position().cloned().unwrap();
        assert_eq!(position.size, 0.022);
        assert_eq!(position.entry_price, 45_000.0);

        let orders = rig.broker.orders.lock();
        assert_eq!(orders.len(), 3); // entry + stop + take-profit
        assert!(orders[1].reduce_only && orders[2].reduce_only);
        assert_eq!(orders[1].stop_price, Some(44_500.0));
        assert_eq!(orders[2].stop_price, Some(45_450.0));

        let kinds: Vec<_> = rig.events.lock().iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![EventKind::OrderPlaced, EventKind::OrderFilled]);
    }

    #[tokio::test]
    async fn rejected_entry_returns_to_idle() {
        let rig = rig();
        rig.broker.fail_market.store(true, Ordering::Relaxed);
        rig.inner.on_signal(signal()).await;
        settle(&rig).await;

        assert_eq!(*rig.inner.state.lock().await, ExecState::Idle);
        assert!(!rig.store.read().has_position());
        let events = rig.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, EventKind::Error);
    }

    #[tokio::test]
    async fn protection_failure_alerts_and_holds() {
        let rig = rig();
        rig.broker.fail_protective.store(true, Ordering::Relaxed);
        rig.inner.on_signal(signal()).await;
        settle(&rig).await;

        assert_eq!(
            *rig.inner.state.lock().await,
            ExecState::Open { protected: false }
        );
        assert!(rig.store.read().has_position());
        // 1 market + 3 stop attempts, take-profit never tried.
        assert_eq!(rig.broker.attempts.load(Ordering::Relaxed), 4);
        let events = rig.events.lock();
        assert_eq!(events.last().unwrap().0, EventKind::Error);
    }

    #[tokio::test]
    async fn bus_delivered_protection_failure_still_reaches_unprotected_open() {
        // Default bus and execution timings: three protective attempts with
        // 500 ms between them take well over the 1 s handler budget, and the
        // machine must still land in unprotected-open with an error event.
        let bus = EventBus::new(BusConfig::default());
        let store = Arc::new(RwLock::new(StateStore::new(500)));
        let broker = Arc::new(FlakyBroker::new());
        broker.fail_protective.store(true, Ordering::Relaxed);
        let risk = Arc::new(RiskManager::new(
            RiskConfig::default(),
            Arc::clone(&broker) as Arc<dyn Broker>,
            10_000.0,
        ));
        let processor = ExecutionProcessor::new(
            Arc::clone(&bus),
            Arc::clone(&store),
            Arc::clone(&broker) as Arc<dyn Broker>,
            risk,
            ExecutionConfig::default(),
        );
        processor.register_handlers();
        let inner = Arc::clone(&processor.inner);

        let errors = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&errors);
        bus.subscribe(
            EventKind::Error,
            "capture",
            Handler::sync(move |_| *sink.lock() += 1),
        );

        bus.start();
        bus.publish(signal()).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let settled = *inner.state.lock().await == (ExecState::Open { protected: false })
                && *errors.lock() > 0;
            if settled {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "machine never reached unprotected-open"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(store.read().has_position());
        bus.stop().await;
    }

    #[tokio::test]
    async fn take_profit_touch_closes_the_position() {
        let rig = rig();
        rig.inner.on_signal(signal()).await;
        rig.inner.on_candle(candle(45_500.0, 44_900.0)).await;
        settle(&rig).await;

        assert_eq!(*rig.inner.state.lock().await, ExecState::Idle);
        assert!(!rig.store.read().has_position());
        let events = rig.events.lock();
        let (kind, payload) = events.last().unwrap();
        assert_eq!(*kind, EventKind::PositionClosed);
        assert_eq!(payload["close_reason"], "take_profit");
        // 0.022 size over a 450 move.
        let pnl = payload["realized_pnl"].as_f64().unwrap();
        assert!((pnl - 9.9).abs() < 1e-9);
        // Paper balance settled the win.
        let balance = rig.broker.account_balance("USDT").await.unwrap();
        assert!((balance - 10_009.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn stop_touch_wins_over_target_in_the_same_candle() {
        let rig = rig();
        rig.inner.on_signal(signal()).await;
        rig.inner.on_candle(candle(45_500.0, 44_400.0)).await;
        settle(&rig).await;

        let events = rig.events.lock();
        let (kind, payload) = events.last().unwrap();
        assert_eq!(*kind, EventKind::PositionClosed);
        assert_eq!(payload["close_reason"], "stop_loss");
    }

    #[tokio::test]
    async fn failed_exit_keeps_the_position_open() {
        let rig = rig();
        rig.inner.on_signal(signal()).await;
        rig.broker.fail_market.store(true, Ordering::Relaxed);
        rig.inner.on_candle(candle(45_500.0, 44_900.0)).await;
        settle(&rig).await;

        assert_eq!(
            *rig.inner.state.lock().await,
            ExecState::Open { protected: true }
        );
        assert!(rig.store.read().has_position());
        let events = rig.events.lock();
        assert_eq!(events.last().unwrap().0, EventKind::Error);
    }

    #[tokio::test]
    async fn second_signal_is_ignored_while_open() {
        let rig = rig();
        rig.inner.on_signal(signal()).await;
        rig.inner.on_signal(signal()).await;
        settle(&rig).await;

        // Only one entry went to the broker.
        let markets = rig
            .broker
            .orders
            .lock()
            .iter()
            .filter(|o| o.order_type == OrderType::Market)
            .count();
        assert_eq!(markets, 1);
    }

    #[tokio::test]
    async fn candle_without_touch_leaves_position_open() {
        let rig = rig();
        rig.inner.on_signal(signal()).await;
        rig.inner.on_candle(candle(45_100.0, 44_900.0)).await;
        settle(&rig).await;

        assert_eq!(
            *rig.inner.state.lock().await,
            ExecState::Open { protected: true }
        );
        assert!(rig.store.read().has_position());
    }
}
