//! Service configuration
//!
//! Defaults cover paper trading out of the box. A JSON config file can
//! override any section, and a handful of environment variables override
//! the file for deploy-time tweaks.

use std::env;
use std::path::Path;

use anyhow::Context;
use bus::BusConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration for the trading service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraderConfig {
    pub trading: TradingConfig,
    pub bus: BusConfig,
    pub state: StateConfig,
    pub pattern: PatternConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub feed: FeedConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Instrument symbol, uppercase (e.g. BTCUSDT)
    pub symbol: String,
    /// Candle interval understood by the exchange stream (e.g. 1m, 5m)
    pub interval: String,
    /// Starting balance for the paper broker, in quote currency
    pub paper_balance: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: "1m".to_string(),
            paper_balance: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Candles of history retained per symbol
    pub candle_capacity: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            candle_capacity: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Body-to-range ratio above which a candle counts as displacement
    pub min_body_ratio: f64,
    /// Minimum FVG gap as a percentage of the gap midpoint price
    pub min_gap_percent: f64,
    /// Patterns older than this many candles are purged
    pub max_age_candles: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_body_ratio: 0.7,
            min_gap_percent: 0.1,
            max_age_candles: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of balance risked per trade, as a percentage
    pub risk_per_trade_percent: f64,
    /// Cap on position notional as a percentage of balance
    pub max_position_percent: f64,
    /// Trades allowed per UTC day
    pub max_daily_trades: u32,
    /// Daily loss, as a percentage of balance, that halts trading
    pub max_daily_loss_percent: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade_percent: 1.0,
            max_position_percent: 10.0,
            max_daily_trades: 5,
            max_daily_loss_percent: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Attempts to place protective orders before alerting and holding
    pub protection_attempts: u32,
    /// Delay between protection attempts in milliseconds
    pub protection_retry_delay_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            protection_attempts: 3,
            protection_retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Exchange WebSocket base endpoint
    pub ws_url: String,
    /// Initial reconnection delay in milliseconds
    pub reconnect_delay_ms: u64,
    /// Reconnection delay ceiling in milliseconds
    pub max_reconnect_delay_ms: u64,
    /// Consecutive failed connects before the feed gives up; 0 retries
    /// forever
    pub max_reconnect_attempts: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://stream.binance.com:9443/ws".to_string(),
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 60_000,
            max_reconnect_attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Webhook endpoint for trade notifications; disabled when unset
    pub webhook_url: Option<String>,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_ms: 5_000,
        }
    }
}

impl TraderConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of the current values.
    pub fn apply_env(mut self) -> Self {
        if let Ok(symbol) = env::var("TRADER_SYMBOL") {
            self.trading.symbol = symbol;
        }
        if let Ok(interval) = env::var("TRADER_INTERVAL") {
            self.trading.interval = interval;
        }
        if let Some(balance) = parse_env("TRADER_PAPER_BALANCE") {
            self.trading.paper_balance = balance;
        }
        if let Ok(url) = env::var("TRADER_WS_URL") {
            self.feed.ws_url = url;
        }
        if let Ok(url) = env::var("TRADER_WEBHOOK_URL") {
            self.notifier.webhook_url = Some(url);
        }
        if let Some(pct) = parse_env("TRADER_RISK_PERCENT") {
            self.risk.risk_per_trade_percent = pct;
        }
        if let Some(n) = parse_env("TRADER_MAX_DAILY_TRADES") {
            self.risk.max_daily_trades = n;
        }
        self
    }

    /// Validate cross-field constraints. Call once at startup.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.trading.symbol.is_empty()
            || !self
                .trading
                .symbol
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            anyhow::bail!("trading.symbol must be uppercase alphanumeric");
        }
        if self.trading.interval.is_empty() {
            anyhow::bail!("trading.interval must not be empty");
        }
        if self.trading.paper_balance <= 0.0 {
            anyhow::bail!("trading.paper_balance must be positive");
        }
        if self.state.candle_capacity == 0 {
            anyhow::bail!("state.candle_capacity must be at least 1");
        }
        if !(0.0 < self.pattern.min_body_ratio && self.pattern.min_body_ratio <= 1.0) {
            anyhow::bail!("pattern.min_body_ratio must be in (0, 1]");
        }
        if self.pattern.min_gap_percent <= 0.0 {
            anyhow::bail!("pattern.min_gap_percent must be positive");
        }
        if self.pattern.max_age_candles == 0 {
            anyhow::bail!("pattern.max_age_candles must be at least 1");
        }
        for (name, pct) in [
            ("risk.risk_per_trade_percent", self.risk.risk_per_trade_percent),
            ("risk.max_position_percent", self.risk.max_position_percent),
            ("risk.max_daily_loss_percent", self.risk.max_daily_loss_percent),
        ] {
            if !(0.0 < pct && pct <= 100.0) {
                anyhow::bail!("{name} must be in (0, 100]");
            }
        }
        if self.risk.max_daily_trades == 0 {
            anyhow::bail!("risk.max_daily_trades must be at least 1");
        }
        if self.execution.protection_attempts == 0 {
            anyhow::bail!("execution.protection_attempts must be at least 1");
        }
        if !self.feed.ws_url.starts_with("ws://") && !self.feed.ws_url.starts_with("wss://") {
            anyhow::bail!("feed.ws_url must start with ws:// or wss://");
        }
        if let Some(url) = &self.notifier.webhook_url {
            url::Url::parse(url).context("notifier.webhook_url is not a valid URL")?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}
