//! Webhook notifications for trade and error events

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bus::{Event, EventBus, EventKind, Handler, HandlerId, Processor};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::NotifierConfig;

/// Forwards fills, closes, and errors to a webhook endpoint.
///
/// Delivery happens from detached tasks so a slow endpoint never holds up
/// event dispatch; failures are logged and forgotten. When no webhook URL
/// is configured the processor subscribes to nothing.
pub struct NotifierProcessor {
    inner: Arc<Inner>,
    subscriptions: Mutex<Vec<(EventKind, HandlerId)>>,
}

struct Inner {
    bus: Arc<EventBus>,
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl NotifierProcessor {
    pub fn new(bus: Arc<EventBus>, config: NotifierConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            inner: Arc::new(Inner {
                bus,
                client,
                webhook_url: config.webhook_url,
            }),
            subscriptions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Processor for NotifierProcessor {
    fn name(&self) -> &str {
        "notifier"
    }

    fn register_handlers(&self) {
        if self.inner.webhook_url.is_none() {
            info!("no webhook configured, notifier idle");
            return;
        }
        let mut subs = self.subscriptions.lock();
        for kind in [
            EventKind::OrderFilled,
            EventKind::PositionClosed,
            EventKind::Error,
        ] {
            let inner = Arc::clone(&self.inner);
            let id = self.inner.bus.subscribe(
                kind,
                "notifier",
                Handler::sync(move |event| inner.notify(&event)),
            );
            subs.push((kind, id));
        }
    }

    fn unregister_handlers(&self) {
        for (kind, id) in self.subscriptions.lock().drain(..) {
            self.inner.bus.unsubscribe(kind, id);
        }
    }
}

impl Inner {
    fn notify(&self, event: &Event) {
        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        let body = json!({
            "event": event.kind().as_str(),
            "source": event.source(),
            "timestamp": event.timestamp().to_rfc3339(),
            "payload": event.payload(),
        });
        let client = self.client.clone();
        let kind = event.kind();
        tokio::spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(kind = %kind, "notification delivered");
                }
                Ok(response) => {
                    warn!(kind = %kind, status = %response.status(), "webhook rejected notification");
                }
                Err(err) => {
                    warn!(kind = %kind, error = %err, "notification delivery failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::BusConfig;

    #[test]
    fn without_webhook_nothing_is_subscribed() {
        let bus = EventBus::new(BusConfig::default());
        let notifier = NotifierProcessor::new(Arc::clone(&bus), NotifierConfig::default());
        notifier.register_handlers();
        assert_eq!(bus.subscriber_count(EventKind::OrderFilled), 0);
        assert_eq!(bus.subscriber_count(EventKind::Error), 0);
    }

    #[test]
    fn with_webhook_all_three_kinds_are_subscribed() {
        let bus = EventBus::new(BusConfig::default());
        let config = NotifierConfig {
            webhook_url: Some("http://127.0.0.1:9/hook".into()),
            ..NotifierConfig::default()
        };
        let notifier = NotifierProcessor::new(Arc::clone(&bus), config);
        notifier.register_handlers();
        for kind in [
            EventKind::OrderFilled,
            EventKind::PositionClosed,
            EventKind::Error,
        ] {
            assert_eq!(bus.subscriber_count(kind), 1);
        }
        notifier.unregister_handlers();
        assert_eq!(bus.subscriber_count(EventKind::Error), 0);
    }
}
