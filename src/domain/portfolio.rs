use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// A held position. Quantity can only go non-positive transiently; the
/// tracker deletes such positions immediately.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioPosition {
    pub symbol: String,
    pub quantity: i64,
    pub avg_price: Decimal,
    pub current_price: Option<Decimal>,
}

impl PortfolioPosition {
    pub fn new(symbol: impl Into<String>, quantity: i64, avg_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            avg_price,
            current_price: None,
        }
    }

    pub fn market_value(&self) -> Option<Decimal> {
        self.current_price
            .map(|price| price * Decimal::from(self.quantity))
    }

    pub fn cost_basis(&self) -> Decimal {
        self.avg_price * Decimal::from(self.quantity)
    }

    pub fn unrealized_pnl(&self) -> Option<Decimal> {
        self.current_price
            .map(|price| (price - self.avg_price) * Decimal::from(self.quantity))
    }
}

/// In-memory portfolio state. Owned by the portfolio tracker; every other
/// component reads a cloned snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Portfolio {
    pub positions: HashMap<String, PortfolioPosition>,
    pub cash: Decimal,
    pub total_equity: Decimal,
    pub daily_pnl: Decimal,
    pub daily_start_equity: Option<Decimal>,
    pub last_updated: DateTime<Utc>,
}

impl Portfolio {
    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
            cash: Decimal::ZERO,
            total_equity: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            daily_start_equity: None,
            last_updated: Utc::now(),
        }
    }

    /// Sum of market values for all positions with a known price.
    pub fn total_position_value(&self) -> Decimal {
        self.positions
            .values()
            .filter_map(|pos| pos.market_value())
            .sum()
    }

    /// Exposure as a fraction of total equity.
    pub fn exposure_pct(&self) -> Decimal {
        if self.total_equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.total_position_value() / self.total_equity
    }

    pub fn position_quantity(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map_or(0, |pos| pos.quantity)
    }
}

impl Default for Portfolio {
    fn default() -> Self {
        Self::new()
    }
}
