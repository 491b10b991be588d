//! Position sizing and daily trading limits

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::broker::{Broker, BrokerError};
use crate::config::RiskConfig;

struct DailyCounters {
    date: NaiveDate,
    trades: u32,
    /// Accumulated losses for the day, stored as a positive number
    loss: f64,
    /// Last balance fetched from the broker, used for the loss limit
    equity: f64,
}

/// Enforces per-trade sizing and daily circuit breakers.
///
/// Counters roll over automatically when the UTC date changes, so a
/// long-running service needs no external scheduler to reset them.
pub struct RiskManager {
    config: RiskConfig,
    broker: Arc<dyn Broker>,
    counters: Mutex<DailyCounters>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, broker: Arc<dyn Broker>, starting_equity: f64) -> Self {
        Self {
            config,
            broker,
            counters: Mutex::new(DailyCounters {
                date: Utc::now().date_naive(),
                trades: 0,
                loss: 0.0,
                equity: starting_equity,
            }),
        }
    }

    /// Whether a new trade is currently allowed.
    pub fn can_trade(&self) -> bool {
        let mut counters = self.counters.lock();
        Self::roll_date(&mut counters);
        if counters.trades >= self.config.max_daily_trades {
            warn!(
                trades = counters.trades,
                limit = self.config.max_daily_trades,
                "daily trade limit reached"
            );
            return false;
        }
        let loss_limit = counters.equity * self.config.max_daily_loss_percent / 100.0;
        if counters.loss >= loss_limit {
            warn!(
                loss = counters.loss,
                limit = loss_limit,
                "daily loss limit reached"
            );
            return false;
        }
        true
    }

    /// Compute the position size for an entry/stop pair.
    ///
    /// Risk-based size is capped by the notional limit and rounded to 3
    /// decimals to match exchange lot precision. Returns 0 when the stop
    /// distance is degenerate; a zero size means do not trade.
    pub async fn position_size(&self, entry: f64, stop: f64) -> Result<f64, BrokerError> {
        let stop_distance = (entry - stop).abs();
        if stop_distance == 0.0 || entry <= 0.0 {
            return Ok(0.0);
        }
        let balance = self.broker.account_balance("USDT").await?;
        self.counters.lock().equity = balance;

        let risk_amount = balance * self.config.risk_per_trade_percent / 100.0;
        let risk_size = risk_amount / stop_distance;
        let max_notional = balance * self.config.max_position_percent / 100.0;
        let cap_size = max_notional / entry;
        let size = risk_size.min(cap_size);
        Ok((size * 1_000.0).round() / 1_000.0)
    }

    /// Record a completed trade. Only losses accumulate toward the daily
    /// loss limit; wins still consume a trade slot.
    pub fn record_result(&self, pnl: f64) {
        let mut counters = self.counters.lock();
        Self::roll_date(&mut counters);
        counters.trades += 1;
        if pnl < 0.0 {
            counters.loss += -pnl;
        }
        info!(
            pnl,
            trades_today = counters.trades,
            loss_today = counters.loss,
            "trade result recorded"
        );
    }

    /// Reset the daily counters immediately.
    pub fn reset_daily(&self) {
        let mut counters = self.counters.lock();
        counters.date = Utc::now().date_naive();
        counters.trades = 0;
        counters.loss = 0.0;
    }

    fn roll_date(counters: &mut DailyCounters) {
        let today = Utc::now().date_naive();
        if counters.date != today {
            info!(from = %counters.date, to = %today, "daily risk counters rolled over");
            counters.date = today;
            counters.trades = 0;
            counters.loss = 0.0;
        }
    }
}
