//! Standardized lifecycle contract for bus-attached components

use async_trait::async_trait;
use tracing::{info, warn};

/// A component that subscribes to the bus and reacts to events.
///
/// Implementors provide their subscriptions and optional startup/shutdown
/// hooks; idempotence of start/stop is handled by [`ManagedProcessor`] so
/// individual processors never track their own lifecycle flags.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Stable component name used in logs and error events.
    fn name(&self) -> &str;

    /// Register this processor's event handlers with the bus.
    fn register_handlers(&self);

    /// Remove this processor's event handlers from the bus.
    fn unregister_handlers(&self);

    /// Hook that runs before handlers are registered. Resource acquisition
    /// (network connections, warm-up) goes here.
    async fn on_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Hook that runs before handlers are removed during shutdown.
    async fn on_stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Wraps a [`Processor`] with idempotent start/stop semantics.
pub struct ManagedProcessor {
    inner: Box<dyn Processor>,
    started: bool,
}

impl ManagedProcessor {
    pub fn new(inner: Box<dyn Processor>) -> Self {
        Self {
            inner,
            started: false,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Run the startup hook, then register handlers. A second start while
    /// running is a no-op. When the hook fails no handlers are registered
    /// and the processor stays stopped.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.started {
            return Ok(());
        }
        if let Err(err) = self.inner.on_start().await {
            return Err(err.context(format!("failed to start {}", self.inner.name())));
        }
        self.inner.register_handlers();
        self.started = true;
        info!(processor = self.inner.name(), "processor started");
        Ok(())
    }

    /// Unregister handlers, then run the shutdown hook. The processor is
    /// marked stopped even when the hook errors, so stop never wedges
    /// shutdown. A second stop is a no-op.
    pub async fn stop(&mut self) -> anyhow::Result<()> {
        if !self.started {
            return Ok(());
        }
        self.started = false;
        self.inner.unregister_handlers();
        let hook = self.inner.on_stop().await;
        match hook {
            Ok(()) => {
                info!(processor = self.inner.name(), "processor stopped");
                Ok(())
            }
            Err(err) => {
                warn!(
                    processor = self.inner.name(),
                    error = %err,
                    "processor stop hook failed"
                );
                Err(err.context(format!("failed to stop {}", self.inner.name())))
            }
        }
    }
}
