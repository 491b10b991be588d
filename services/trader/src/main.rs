//! Service entrypoint: wire the pipeline together and run until ctrl-c.

use std::sync::Arc;

use anyhow::Context;
use bus::{EventBus, Orchestrator};
use parking_lot::RwLock;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ict_trader::broker::{Broker, PaperBroker};
use ict_trader::config::TraderConfig;
use ict_trader::feed::MarketFeed;
use ict_trader::notifier::NotifierProcessor;
use ict_trader::processors::{ExecutionProcessor, PatternProcessor, SignalProcessor};
use ict_trader::risk::RiskManager;
use ict_trader::state::StateStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => TraderConfig::from_file(&path)?,
        None => TraderConfig::default(),
    }
    .apply_env();
    config.validate().context("invalid configuration")?;
    info!(
        symbol = %config.trading.symbol,
        interval = %config.trading.interval,
        "starting ict-trader"
    );

    let bus = EventBus::new(config.bus.clone());
    let store = Arc::new(RwLock::new(StateStore::new(config.state.candle_capacity)));
    let broker: Arc<dyn Broker> = Arc::new(PaperBroker::new(config.trading.paper_balance));
    let risk = Arc::new(RiskManager::new(
        config.risk.clone(),
        Arc::clone(&broker),
        config.trading.paper_balance,
    ));

    // Registration order is data-flow order; CandleClosed handlers run in
    // this order, and shutdown reverses it.
    let mut orchestrator = Orchestrator::new();
    orchestrator.register(Box::new(MarketFeed::new(
        Arc::clone(&bus),
        config.feed.clone(),
        config.trading.symbol.clone(),
        config.trading.interval.clone(),
    )));
    orchestrator.register(Box::new(PatternProcessor::new(
        Arc::clone(&bus),
        Arc::clone(&store),
        config.pattern.clone(),
    )));
    orchestrator.register(Box::new(SignalProcessor::new(
        Arc::clone(&bus),
        Arc::clone(&store),
    )));
    orchestrator.register(Box::new(ExecutionProcessor::new(
        Arc::clone(&bus),
        Arc::clone(&store),
        Arc::clone(&broker),
        risk,
        config.execution.clone(),
    )));
    orchestrator.register(Box::new(NotifierProcessor::new(
        Arc::clone(&bus),
        config.notifier.clone(),
    )));

    bus.start();
    orchestrator.start_all().await?;
    info!("pipeline running, ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("signal handler failed")?;
    info!("shutdown requested");

    orchestrator.stop_all().await;
    bus.stop().await;
    info!("shutdown complete");
    Ok(())
}
