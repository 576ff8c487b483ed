use crate::domain::errors::BrokerError;
use crate::domain::market::Tick;
use crate::domain::order::Order;
use crate::domain::ports::{
    AmendRequest, Balance, Broker, BrokerErrorCallback, BrokerOpenOrder, BrokerPosition,
    TickCallback,
};
use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::info;

/// In-process broker used by `--broker mock` and the test suite. Orders are
/// accepted with sequential broker ids; positions, balance, open orders and
/// scripted rejections are configurable.
pub struct MockBroker {
    connected: AtomicBool,
    order_counter: AtomicU64,
    positions: Mutex<Vec<BrokerPosition>>,
    open_orders: Mutex<Vec<BrokerOpenOrder>>,
    balance: Mutex<Balance>,
    tick_callback: Mutex<Option<TickCallback>>,
    error_callback: Mutex<Option<BrokerErrorCallback>>,
    next_place_failure: Mutex<Option<BrokerError>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            order_counter: AtomicU64::new(0),
            positions: Mutex::new(Vec::new()),
            open_orders: Mutex::new(Vec::new()),
            balance: Mutex::new(Balance {
                total_equity: dec!(10000000),
                available_cash: dec!(10000000),
                margin_used: dec!(0),
                unrealized_pnl: dec!(0),
            }),
            tick_callback: Mutex::new(None),
            error_callback: Mutex::new(None),
            next_place_failure: Mutex::new(None),
        }
    }

    pub fn set_positions(&self, positions: Vec<BrokerPosition>) {
        *self.positions.lock().unwrap() = positions;
    }

    pub fn set_open_orders(&self, orders: Vec<BrokerOpenOrder>) {
        *self.open_orders.lock().unwrap() = orders;
    }

    pub fn set_balance(&self, balance: Balance) {
        *self.balance.lock().unwrap() = balance;
    }

    /// Make the next `place_order` fail with the given error.
    pub fn fail_next_place_order(&self, error: BrokerError) {
        *self.next_place_failure.lock().unwrap() = Some(error);
    }

    /// Push a tick through the registered market-data callback, as a real
    /// adapter would after marshaling off its message pump.
    pub async fn push_tick(&self, tick: Tick) {
        let callback = self.tick_callback.lock().unwrap().clone();
        if let Some(cb) = callback {
            cb(tick).await;
        }
    }

    pub fn placed_order_count(&self) -> u64 {
        self.order_counter.load(Ordering::SeqCst)
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.connected.store(true, Ordering::SeqCst);
        info!("Mock broker connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        info!("Mock broker disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn place_order(&self, _order: &Order) -> Result<String, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::ConnectionLost("mock broker offline".to_string()));
        }
        if let Some(error) = self.next_place_failure.lock().unwrap().take() {
            return Err(error);
        }
        let n = self.order_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("MOCK-{n}"))
    }

    async fn cancel_order(&self, _broker_order_id: &str) -> Result<bool, BrokerError> {
        Ok(true)
    }

    async fn amend_order(
        &self,
        _broker_order_id: &str,
        _amend: AmendRequest,
    ) -> Result<bool, BrokerError> {
        Ok(true)
    }

    async fn fetch_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn fetch_open_orders(&self) -> Result<Vec<BrokerOpenOrder>, BrokerError> {
        Ok(self.open_orders.lock().unwrap().clone())
    }

    async fn fetch_balance(&self) -> Result<Balance, BrokerError> {
        Ok(self.balance.lock().unwrap().clone())
    }

    async fn subscribe_market_data(
        &self,
        symbols: &[String],
        callback: TickCallback,
    ) -> Result<(), BrokerError> {
        info!("Mock broker subscribed: {:?}", symbols);
        *self.tick_callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    async fn unsubscribe_market_data(&self, symbols: &[String]) -> Result<(), BrokerError> {
        info!("Mock broker unsubscribed: {:?}", symbols);
        Ok(())
    }

    fn set_error_callback(&self, callback: BrokerErrorCallback) {
        *self.error_callback.lock().unwrap() = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderSide, OrderType};

    fn sample_order() -> Order {
        Order::new(
            "ORD-1".to_string(),
            "SIG-1".to_string(),
            "005930".to_string(),
            OrderSide::Buy,
            OrderType::Market,
            1,
            None,
        )
    }

    #[tokio::test]
    async fn test_place_order_requires_connection() {
        let broker = MockBroker::new();
        assert!(matches!(
            broker.place_order(&sample_order()).await,
            Err(BrokerError::ConnectionLost(_))
        ));

        broker.connect().await.unwrap();
        let id = broker.place_order(&sample_order()).await.unwrap();
        assert_eq!(id, "MOCK-1");
        let id = broker.place_order(&sample_order()).await.unwrap();
        assert_eq!(id, "MOCK-2");
    }

    #[tokio::test]
    async fn test_scripted_rejection_fires_once() {
        let broker = MockBroker::new();
        broker.connect().await.unwrap();
        broker.fail_next_place_order(BrokerError::InsufficientFunds);

        assert!(matches!(
            broker.place_order(&sample_order()).await,
            Err(BrokerError::InsufficientFunds)
        ));
        assert!(broker.place_order(&sample_order()).await.is_ok());
    }
}
