//! Bulk lifecycle management for registered processors

use std::time::Duration;

use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::{ManagedProcessor, Processor};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Starts processors in registration order and stops them in reverse.
///
/// Registration order encodes the pipeline's data flow, so reverse-order
/// shutdown stops consumers before the producers feeding them.
#[derive(Default)]
pub struct Orchestrator {
    processors: Vec<ManagedProcessor>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Box<dyn Processor>) {
        info!(processor = processor.name(), "registered processor");
        self.processors.push(ManagedProcessor::new(processor));
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Start every processor in registration order. Individual failures are
    /// logged and skipped; the pipeline runs degraded rather than not at
    /// all. Errors only when no processor could be started.
    pub async fn start_all(&mut self) -> anyhow::Result<()> {
        if self.processors.is_empty() {
            return Ok(());
        }
        let mut started = 0usize;
        for processor in &mut self.processors {
            match processor.start().await {
                Ok(()) => started += 1,
                Err(err) => {
                    error!(processor = processor.name(), error = %err, "processor failed to start");
                }
            }
        }
        if started == 0 {
            anyhow::bail!("no processors could be started");
        }
        info!(started, total = self.processors.len(), "processors started");
        Ok(())
    }

    /// Stop every processor in reverse registration order. A hung or
    /// failing stop is bounded by a timeout and never blocks the rest of
    /// the shutdown.
    pub async fn stop_all(&mut self) {
        for processor in self.processors.iter_mut().rev() {
            match timeout(STOP_TIMEOUT, processor.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(processor = processor.name(), error = %err, "processor stop failed");
                }
                Err(_) => {
                    warn!(processor = processor.name(), "processor stop timed out");
                }
            }
        }
        info!("processors stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Traced {
        name: &'static str,
        fail_start: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Processor for Traced {
        fn name(&self) -> &str {
            self.name
        }

        fn register_handlers(&self) {}
        fn unregister_handlers(&self) {}

        async fn on_start(&self) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("nope");
            }
            self.log.lock().push(format!("start:{}", self.name));
            Ok(())
        }

        async fn on_stop(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("stop:{}", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn starts_in_order_stops_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut orch = Orchestrator::new();
        for name in ["feed", "pattern", "signal"] {
            orch.register(Box::new(Traced {
                name,
                fail_start: false,
                log: Arc::clone(&log),
            }));
        }
        orch.start_all().await.unwrap();
        orch.stop_all().await;
        assert_eq!(
            *log.lock(),
            vec![
                "start:feed",
                "start:pattern",
                "start:signal",
                "stop:signal",
                "stop:pattern",
                "stop:feed",
            ]
        );
    }

    #[tokio::test]
    async fn one_failed_start_does_not_abort_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut orch = Orchestrator::new();
        orch.register(Box::new(Traced {
            name: "broken",
            fail_start: true,
            log: Arc::clone(&log),
        }));
        orch.register(Box::new(Traced {
            name: "healthy",
            fail_start: false,
            log: Arc::clone(&log),
        }));
        orch.start_all().await.unwrap();
        assert_eq!(*log.lock(), vec!["start:healthy"]);
        // The failed processor never started, so it is skipped on stop.
        orch.stop_all().await;
        assert_eq!(*log.lock(), vec!["start:healthy", "stop:healthy"]);
    }

    #[tokio::test]
    async fn all_failed_starts_is_an_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut orch = Orchestrator::new();
        orch.register(Box::new(Traced {
            name: "broken",
            fail_start: true,
            log: Arc::clone(&log),
        }));
        assert!(orch.start_all().await.is_err());
    }

    #[tokio::test]
    async fn empty_orchestrator_starts_cleanly() {
        let mut orch = Orchestrator::new();
        assert!(orch.is_empty());
        orch.start_all().await.unwrap();
        orch.stop_all().await;
    }
}
