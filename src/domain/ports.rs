use crate::domain::errors::BrokerError;
use crate::domain::events::ErrorSeverity;
use crate::domain::market::Tick;
use crate::domain::order::{Order, OrderSide};
use async_trait::async_trait;
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Invoked for every tick the broker pushes. Must marshal back onto the
/// cooperative scheduler before touching core state.
pub type TickCallback = Arc<dyn Fn(Tick) -> BoxFuture<'static, ()> + Send + Sync>;

/// Asynchronous adapter-side failures (connection drops, bad ticks) are
/// reported through this; the application republishes them as ErrorEvents.
pub type BrokerErrorCallback =
    Arc<dyn Fn(String, String, ErrorSeverity, serde_json::Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Position as the broker reports it.
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: i64,
    pub avg_price: Decimal,
    pub current_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
}

/// Account balance snapshot.
#[derive(Debug, Clone)]
pub struct Balance {
    pub total_equity: Decimal,
    pub available_cash: Decimal,
    pub margin_used: Decimal,
    pub unrealized_pnl: Decimal,
}

/// An open order as the broker reports it, matched to local orders by
/// broker_order_id during reconciliation.
#[derive(Debug, Clone)]
pub struct BrokerOpenOrder {
    pub broker_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub filled_quantity: i64,
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AmendRequest {
    pub quantity: Option<i64>,
    pub price: Option<Decimal>,
}

/// The brokerage capability the core consumes. Rate limiting between
/// requests and any GUI/message-pump runtime live entirely inside the
/// adapter; the core never assumes immediate completion.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;

    /// Returns the broker's order id on acceptance.
    async fn place_order(&self, order: &Order) -> Result<String, BrokerError>;

    async fn cancel_order(&self, broker_order_id: &str) -> Result<bool, BrokerError>;

    async fn amend_order(
        &self,
        broker_order_id: &str,
        amend: AmendRequest,
    ) -> Result<bool, BrokerError>;

    async fn fetch_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    async fn fetch_open_orders(&self) -> Result<Vec<BrokerOpenOrder>, BrokerError>;

    async fn fetch_balance(&self) -> Result<Balance, BrokerError>;

    async fn subscribe_market_data(
        &self,
        symbols: &[String],
        callback: TickCallback,
    ) -> Result<(), BrokerError>;

    async fn unsubscribe_market_data(&self, symbols: &[String]) -> Result<(), BrokerError>;

    fn set_error_callback(&self, callback: BrokerErrorCallback);
}

/// Source of the tradable symbol set for the session.
#[async_trait]
pub trait UniverseService: Send + Sync {
    /// Top symbols by trading value, best first.
    async fn top_by_trading_value(&self, size: usize) -> anyhow::Result<Vec<String>>;
}
