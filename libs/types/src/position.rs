//! Trading position type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// The side that closes a position opened on this side.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open trading position.
///
/// The only mutable trading entity: trailing-stop updates may move
/// `stop_loss` after construction. Risk parameters are validated against the
/// side at build time: longs require `stop_loss < entry_price < take_profit`,
/// shorts the reverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        entry_price: f64,
        size: f64,
        stop_loss: f64,
        take_profit: f64,
        opened_at: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        let symbol = symbol.into();
        if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
            return Err(ModelError::InvalidSymbol(symbol));
        }
        for (field, value) in [
            ("entry", entry_price),
            ("stop_loss", stop_loss),
            ("take_profit", take_profit),
        ] {
            if value <= 0.0 {
                return Err(ModelError::NonPositivePrice { field, value });
            }
        }
        if size <= 0.0 {
            return Err(ModelError::NonPositiveSize(size));
        }
        match side {
            Side::Long => {
                if stop_loss >= entry_price {
                    return Err(ModelError::StopLossSide {
                        side: "long",
                        stop_loss,
                        entry: entry_price,
                    });
                }
                if take_profit <= entry_price {
                    return Err(ModelError::TakeProfitSide {
                        side: "long",
                        take_profit,
                        entry: entry_price,
                    });
                }
            }
            Side::Short => {
                if stop_loss <= entry_price {
                    return Err(ModelError::StopLossSide {
                        side: "short",
                        stop_loss,
                        entry: entry_price,
                    });
                }
                if take_profit >= entry_price {
                    return Err(ModelError::TakeProfitSide {
                        side: "short",
                        take_profit,
                        entry: entry_price,
                    });
                }
            }
        }
        Ok(Self {
            symbol,
            side,
            entry_price,
            size,
            stop_loss,
            take_profit,
            opened_at,
        })
    }

    /// Reward-to-risk ratio; 0 when risk is zero.
    pub fn risk_reward_ratio(&self) -> f64 {
        let risk = (self.entry_price - self.stop_loss).abs();
        let reward = (self.take_profit - self.entry_price).abs();
        if risk > 0.0 {
            reward / risk
        } else {
            0.0
        }
    }

    /// Realized PnL for an exit at `exit_price`.
    pub fn realized_pnl(&self, exit_price: f64) -> f64 {
        match self.side {
            Side::Long => (exit_price - self.entry_price) * self.size,
            Side::Short => (self.entry_price - exit_price) * self.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).unwrap()
    }

    fn long() -> Position {
        Position::new("BTCUSDT", Side::Long, 45000.0, 0.1, 44500.0, 46000.0, at(0)).unwrap()
    }

    #[test]
    fn long_risk_reward() {
        assert!((long().risk_reward_ratio() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn long_rejects_stop_above_entry() {
        let err =
            Position::new("BTCUSDT", Side::Long, 45000.0, 0.1, 45100.0, 46000.0, at(0)).unwrap_err();
        assert!(matches!(err, ModelError::StopLossSide { side: "long", .. }));
    }

    #[test]
    fn short_rejects_take_profit_above_entry() {
        let err =
            Position::new("BTCUSDT", Side::Short, 45000.0, 0.1, 45500.0, 45200.0, at(0)).unwrap_err();
        assert!(matches!(err, ModelError::TakeProfitSide { side: "short", .. }));
    }

    #[test]
    fn rejects_lowercase_symbol() {
        let err =
            Position::new("btcusdt", Side::Long, 45000.0, 0.1, 44500.0, 46000.0, at(0)).unwrap_err();
        assert!(matches!(err, ModelError::InvalidSymbol(_)));
    }

    #[test]
    fn pnl_signs_by_side() {
        let p = long();
        assert!((p.realized_pnl(46000.0) - 100.0).abs() < 1e-9);
        assert!((p.realized_pnl(44500.0) + 50.0).abs() < 1e-9);

        let s =
            Position::new("BTCUSDT", Side::Short, 45000.0, 0.1, 45500.0, 44000.0, at(0)).unwrap();
        assert!((s.realized_pnl(44000.0) - 100.0).abs() < 1e-9);
    }
}
