//! Broker boundary: order submission and account queries
//!
//! The rest of the service only sees the [`Broker`] trait, so live exchange
//! connectivity can replace the paper simulation without touching the
//! pipeline.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::info;
use types::Side;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: f64, available: f64 },
    #[error("broker transport error: {0}")]
    Transport(String),
}

/// What kind of order to submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    StopMarket,
    TakeProfitMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::StopMarket => "stop_market",
            OrderType::TakeProfitMarket => "take_profit_market",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    /// Reference price for market orders; simulated fills use it
    pub price: Option<f64>,
    /// Trigger price for stop and take-profit orders
    pub stop_price: Option<f64>,
    /// True for orders that only ever reduce an open position
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: Side, quantity: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: Some(price),
            stop_price: None,
            reduce_only: false,
        }
    }

    pub fn market_close(symbol: impl Into<String>, side: Side, quantity: f64, price: f64) -> Self {
        Self {
            reduce_only: true,
            ..Self::market(symbol, side, quantity, price)
        }
    }

    pub fn protective(
        symbol: impl Into<String>,
        side: Side,
        order_type: OrderType,
        quantity: f64,
        trigger: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type,
            quantity,
            price: None,
            stop_price: Some(trigger),
            reduce_only: true,
        }
    }
}

/// Broker acknowledgement of an accepted order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    /// Fill price when the order executed immediately, e.g. market orders
    pub fill_price: Option<f64>,
    pub filled_quantity: f64,
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn create_order(&self, request: OrderRequest) -> Result<OrderAck, BrokerError>;

    /// Free balance of the given asset in the trading account.
    async fn account_balance(&self, asset: &str) -> Result<f64, BrokerError>;

    /// Book realized profit or loss after a position closes. Live brokers
    /// settle on their side, so the default is a no-op.
    async fn settle_pnl(&self, _pnl: f64) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Simulated broker with immediate fills at the request's reference price.
///
/// Protective orders are accepted and acknowledged without tracking
/// triggers, which matches how the pipeline exits on candle touches rather
/// than broker callbacks.
pub struct PaperBroker {
    balance: Mutex<f64>,
    next_order_id: AtomicU64,
}

impl PaperBroker {
    pub fn new(starting_balance: f64) -> Self {
        Self {
            balance: Mutex::new(starting_balance),
            next_order_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn create_order(&self, request: OrderRequest) -> Result<OrderAck, BrokerError> {
        if request.quantity <= 0.0 {
            return Err(BrokerError::Rejected("quantity must be positive".into()));
        }
        let order_id = format!(
            "paper-{}-{}",
            Utc::now().timestamp_millis(),
            self.next_order_id.fetch_add(1, Ordering::Relaxed)
        );
        let fill_price = match request.order_type {
            OrderType::Market => match request.price {
                Some(price) if price > 0.0 => Some(price),
                _ => return Err(BrokerError::Rejected("market order needs a reference price".into())),
            },
            // Accepted but resting; the exit path fills them by candle touch.
            OrderType::StopMarket | OrderType::TakeProfitMarket => None,
        };
        info!(
            order_id = %order_id,
            symbol = %request.symbol,
            side = %request.side,
            order_type = request.order_type.as_str(),
            quantity = request.quantity,
            "paper order accepted"
        );
        Ok(OrderAck {
            order_id,
            fill_price,
            filled_quantity: request.quantity,
        })
    }

    async fn account_balance(&self, _asset: &str) -> Result<f64, BrokerError> {
        Ok(*self.balance.lock())
    }

    async fn settle_pnl(&self, pnl: f64) -> Result<(), BrokerError> {
        let mut balance = self.balance.lock();
        *balance += pnl;
        info!(balance = *balance, pnl, "paper broker settled trade");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn market_order_fills_at_reference_price() {
        let broker = PaperBroker::new(10_000.0);
        let ack = broker
            .create_order(OrderRequest::market("BTCUSDT", Side::Long, 0.022, 45_000.0))
            .await
            .unwrap();
        assert_eq!(ack.fill_price, Some(45_000.0));
        assert_eq!(ack.filled_quantity, 0.022);
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected() {
        let broker = PaperBroker::new(10_000.0);
        let err = broker
            .create_order(OrderRequest::market("BTCUSDT", Side::Long, 0.0, 45_000.0))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Rejected(_)));
    }

    #[tokio::test]
    async fn protective_orders_rest_unfilled() {
        let broker = PaperBroker::new(10_000.0);
        let ack = broker
            .create_order(OrderRequest::protective(
                "BTCUSDT",
                Side::Short,
                OrderType::StopMarket,
                0.022,
                44_410.4,
            ))
            .await
            .unwrap();
        assert!(ack.fill_price.is_none());
    }

    #[tokio::test]
    async fn settle_moves_the_balance() {
        let broker = PaperBroker::new(10_000.0);
        broker.settle_pnl(-120.5).await.unwrap();
        assert_eq!(broker.account_balance("USDT").await.unwrap(), 9_879.5);
    }
}
