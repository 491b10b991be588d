//! Queue-backed publish/subscribe bus with a single dispatch task

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::{BusError, Event, EventKind};

/// Bus tuning knobs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-handler delivery budget in milliseconds. A handler that overruns
    /// it is skipped for that event and dispatch moves on.
    pub handler_timeout_ms: u64,
    /// How long `stop` waits for queued events to drain before giving up.
    pub shutdown_grace_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 1_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl BusConfig {
    fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Opaque subscription handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type SyncFn = dyn Fn(Event) + Send + Sync;
type AsyncFn = dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync;

/// An event handler. Sync handlers run on the blocking thread pool so they
/// never stall the dispatch task; async handlers run as spawned tasks.
#[derive(Clone)]
pub enum Handler {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl Handler {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        Handler::Sync(Arc::new(f))
    }

    pub fn async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        Handler::Async(Arc::new(move |event| Box::pin(f(event))))
    }
}

#[derive(Clone)]
struct Subscriber {
    id: HandlerId,
    name: String,
    handler: Handler,
}

/// Asynchronous publish/subscribe event bus.
///
/// All published events flow through one unbounded FIFO queue consumed by a
/// single dispatch task, so delivery order equals publish order across all
/// publishers. For each event, handlers run in subscription order; each gets
/// its own timeout and its own panic boundary.
pub struct EventBus {
    config: BusConfig,
    subscribers: RwLock<HashMap<EventKind, Vec<Subscriber>>>,
    tx: mpsc::UnboundedSender<Event>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    stopped: AtomicBool,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            subscribers: RwLock::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            dispatch_task: Mutex::new(None),
            pending: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            stopped: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register a handler for one event kind. Returns an id usable with
    /// [`unsubscribe`](Self::unsubscribe). Subscribing is allowed at any
    /// time, including while the bus is running.
    pub fn subscribe(
        &self,
        kind: EventKind,
        name: impl Into<String>,
        handler: Handler,
    ) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        debug!(kind = %kind, handler = %name, "subscribed");
        self.subscribers.write().entry(kind).or_default().push(Subscriber {
            id,
            name,
            handler,
        });
        id
    }

    /// Remove a previously registered handler. Returns false when the id is
    /// unknown for that kind; removing twice is harmless.
    pub fn unsubscribe(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut subs = self.subscribers.write();
        match subs.get_mut(&kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|s| s.id != id);
                before != list.len()
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Events accepted but not yet dispatched.
    pub fn queue_len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Enqueue an event for delivery. Never blocks and never waits on
    /// handlers. Fails only after [`stop`](Self::stop).
    pub fn publish(&self, event: Event) -> Result<(), BusError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(BusError::Stopped);
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(event).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(BusError::Stopped);
        }
        Ok(())
    }

    /// Dispatch an event to its handlers immediately, bypassing the queue.
    /// The call resolves only after every handler has finished or timed out.
    pub async fn emit(&self, event: Event) -> Result<(), BusError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(BusError::Stopped);
        }
        self.dispatch(event).await;
        Ok(())
    }

    /// Start the dispatch task. Calling start on a bus that is already
    /// running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(mut rx) = self.rx.lock().take() else {
            // A stopped bus cannot be restarted; its receiver is gone.
            self.running.store(false, Ordering::Release);
            return;
        };
        let bus = Arc::clone(self);
        let task = tokio::spawn(async move {
            info!("event bus dispatch loop started");
            loop {
                match timeout(Duration::from_millis(100), rx.recv()).await {
                    Ok(Some(event)) => {
                        bus.dispatch(event).await;
                        bus.pending.fetch_sub(1, Ordering::AcqRel);
                    }
                    Ok(None) => break,
                    Err(_) => {
                        if !bus.running.load(Ordering::Acquire)
                            && bus.pending.load(Ordering::Acquire) == 0
                        {
                            break;
                        }
                    }
                }
            }
            info!("event bus dispatch loop exited");
        });
        *self.dispatch_task.lock() = Some(task);
    }

    /// Stop the bus: reject new publishes, give queued events up to the
    /// configured grace period to drain, then shut the dispatch task down.
    /// Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace();
        while self.pending.load(Ordering::Acquire) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.pending.load(Ordering::Acquire),
                    "shutdown grace elapsed with events still queued"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.running.store(false, Ordering::Release);
        let task = self.dispatch_task.lock().take();
        if let Some(mut task) = task {
            // The loop notices the flag within one poll interval.
            if timeout(Duration::from_millis(500), &mut task).await.is_err() {
                task.abort();
            }
        }
        info!("event bus stopped");
    }

    async fn dispatch(&self, event: Event) {
        let subs: Vec<Subscriber> = self
            .subscribers
            .read()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        if subs.is_empty() {
            debug!(kind = %event.kind(), "no subscribers for event");
            return;
        }
        for sub in subs {
            self.invoke(&sub, event.clone()).await;
        }
    }

    /// Run one handler with a timeout and a panic boundary. Failures are
    /// logged and swallowed so one bad handler cannot poison the loop.
    async fn invoke(&self, sub: &Subscriber, event: Event) {
        let kind = event.kind();
        let budget = self.config.handler_timeout();
        match &sub.handler {
            Handler::Async(f) => {
                let mut task = tokio::spawn(f(event));
                match timeout(budget, &mut task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(join_err)) if join_err.is_panic() => {
                        error!(kind = %kind, handler = %sub.name, "handler panicked");
                    }
                    Ok(Err(_)) => {}
                    Err(_) => {
                        task.abort();
                        warn!(
                            kind = %kind,
                            handler = %sub.name,
                            timeout_ms = self.config.handler_timeout_ms,
                            "handler timed out, cancelled"
                        );
                    }
                }
            }
            Handler::Sync(f) => {
                let f = Arc::clone(f);
                let mut task = tokio::task::spawn_blocking(move || f(event));
                match timeout(budget, &mut task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(join_err)) if join_err.is_panic() => {
                        error!(kind = %kind, handler = %sub.name, "handler panicked");
                    }
                    Ok(Err(_)) => {}
                    Err(_) => {
                        // Blocking work cannot be cancelled; leave it to
                        // finish on the blocking pool and move on.
                        warn!(
                            kind = %kind,
                            handler = %sub.name,
                            timeout_ms = self.config.handler_timeout_ms,
                            "handler timed out, detached"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn event(kind: EventKind, seq: u64) -> Event {
        let mut payload = Map::new();
        payload.insert("seq".into(), seq.into());
        Event::new(kind, payload, "test")
    }

    fn seq_of(event: &Event) -> u64 {
        event.payload().get("seq").and_then(|v| v.as_u64()).unwrap()
    }

    async fn drain(bus: &EventBus) {
        for _ in 0..200 {
            if bus.queue_len() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue did not drain");
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let bus = EventBus::new(BusConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            EventKind::CandleClosed,
            "recorder",
            Handler::sync(move |e| sink.lock().push(seq_of(&e))),
        );
        bus.start();
        for seq in 0..20 {
            bus.publish(event(EventKind::CandleClosed, seq)).unwrap();
        }
        drain(&bus).await;
        // Sync handlers run to completion before the next dispatch, so the
        // recorded order is exactly the publish order.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
        bus.stop().await;
    }

    #[tokio::test]
    async fn handlers_run_in_subscription_order() {
        let bus = EventBus::new(BusConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let sink = Arc::clone(&seen);
            bus.subscribe(
                EventKind::EntrySignal,
                tag,
                Handler::sync(move |_| sink.lock().push(tag)),
            );
        }
        bus.emit(event(EventKind::EntrySignal, 0)).await.unwrap();
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_break_delivery() {
        let bus = EventBus::new(BusConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(
            EventKind::Error,
            "bomb",
            Handler::sync(|_| panic!("boom")),
        );
        let sink = Arc::clone(&seen);
        bus.subscribe(
            EventKind::Error,
            "survivor",
            Handler::sync(move |e| sink.lock().push(seq_of(&e))),
        );
        bus.start();
        bus.publish(event(EventKind::Error, 1)).unwrap();
        bus.publish(event(EventKind::Error, 2)).unwrap();
        drain(&bus).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock(), vec![1, 2]);
        bus.stop().await;
    }

    #[tokio::test]
    async fn slow_handler_is_skipped_not_fatal() {
        let bus = EventBus::new(BusConfig {
            handler_timeout_ms: 50,
            ..BusConfig::default()
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(
            EventKind::OrderFilled,
            "sleeper",
            Handler::async_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }),
        );
        let sink = Arc::clone(&seen);
        bus.subscribe(
            EventKind::OrderFilled,
            "recorder",
            Handler::sync(move |e| sink.lock().push(seq_of(&e))),
        );
        bus.start();
        bus.publish(event(EventKind::OrderFilled, 9)).unwrap();
        drain(&bus).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock(), vec![9]);
        bus.stop().await;
    }

    #[tokio::test]
    async fn unsubscribe_removes_handler() {
        let bus = EventBus::new(BusConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = bus.subscribe(
            EventKind::FvgDetected,
            "once",
            Handler::sync(move |e| sink.lock().push(seq_of(&e))),
        );
        assert_eq!(bus.subscriber_count(EventKind::FvgDetected), 1);
        assert!(bus.unsubscribe(EventKind::FvgDetected, id));
        assert!(!bus.unsubscribe(EventKind::FvgDetected, id));
        bus.emit(event(EventKind::FvgDetected, 3)).await.unwrap();
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn publish_after_stop_is_rejected() {
        let bus = EventBus::new(BusConfig::default());
        bus.start();
        bus.publish(event(EventKind::CandleClosed, 0)).unwrap();
        bus.stop().await;
        bus.stop().await; // idempotent
        let err = bus.publish(event(EventKind::CandleClosed, 1)).unwrap_err();
        assert!(matches!(err, BusError::Stopped));
    }

    #[tokio::test]
    async fn stop_drains_queued_events() {
        let bus = EventBus::new(BusConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            EventKind::CandleClosed,
            "recorder",
            Handler::sync(move |e| sink.lock().push(seq_of(&e))),
        );
        bus.start();
        for seq in 0..5 {
            bus.publish(event(EventKind::CandleClosed, seq)).unwrap();
        }
        bus.stop().await;
        assert_eq!(seen.lock().len(), 5);
    }
}
