pub mod pullback;
pub mod registry;

pub use registry::StrategyRegistry;

use crate::domain::market::{Candle, Tick, Timeframe};
use crate::domain::order::OrderSide;
use crate::domain::portfolio::Portfolio;
use crate::domain::signal::Signal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Market state handed to a strategy for one symbol.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub last_tick: Option<Tick>,
    /// In-progress candles by timeframe.
    pub current_candles: HashMap<Timeframe, Candle>,
    /// Closed candles by timeframe, most-recent-first, capped at 250.
    pub historical_candles: HashMap<Timeframe, Vec<Candle>>,
}

impl MarketSnapshot {
    pub fn last_price(&self) -> Option<Decimal> {
        if let Some(tick) = &self.last_tick {
            return Some(tick.price);
        }
        self.current_candles.values().next().map(|c| c.close)
    }
}

/// Portfolio and system context for decision making.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub portfolio: Portfolio,
    pub active_orders_count: usize,
    pub daily_trades_count: u32,
    pub is_market_open: bool,
    /// Free-form extras, e.g. the current universe.
    pub metadata: serde_json::Value,
}

/// The strategy contract. Strategies are pure relative to their inputs:
/// they return Signal values and never touch the broker. Signals go
/// through risk validation before any order exists.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Unique registry name.
    fn name(&self) -> &str;

    /// Symbols this strategy trades; empty means the whole universe.
    fn symbols(&self) -> Vec<String>;

    async fn on_market_data(
        &self,
        snapshot: &MarketSnapshot,
        context: &StrategyContext,
    ) -> anyhow::Result<Vec<Signal>>;

    async fn on_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called for fills on symbols within this strategy's set.
    async fn on_fill(&self, _symbol: &str, _side: OrderSide, _quantity: i64, _price: Decimal) {}
}

impl std::fmt::Debug for dyn Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy").field("name", &self.name()).finish()
    }
}
