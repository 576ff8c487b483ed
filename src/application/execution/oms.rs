use crate::application::execution::idempotency::{
    DEFAULT_BUCKET_SECONDS, fill_id, order_idempotency_key, retry_suffix,
};
use crate::domain::errors::{BrokerError, OrderError};
use crate::domain::events::{Event, FillEvent, OrderEvent, OrderEventType};
use crate::domain::order::{Fill, Order, OrderStatus, OrderType};
use crate::domain::ports::Broker;
use crate::domain::signal::{Signal, SignalAction};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::persistence::Repository;
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Order lifecycle owner: idempotent submission, fill application and
/// cancellation. Sole writer for order state; durable truth lives in the
/// store and is always written before the matching event is published.
pub struct OrderManagementSystem {
    broker: Arc<dyn Broker>,
    repo: Repository,
    bus: EventBus,
    active_orders: RwLock<HashMap<String, Order>>,
    paused: AtomicBool,
}

impl OrderManagementSystem {
    pub fn new(broker: Arc<dyn Broker>, repo: Repository, bus: EventBus) -> Self {
        Self {
            broker,
            repo,
            bus,
            active_orders: RwLock::new(HashMap::new()),
            paused: AtomicBool::new(false),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// While paused, new signals are rejected at entry; already-placed
    /// orders keep receiving fills.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        warn!("OMS paused - new signals will be rejected");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("OMS resumed");
    }

    /// Reload non-terminal orders from the store on startup.
    pub async fn load_active_orders(&self) -> Result<()> {
        let open_orders = self.repo.get_open_orders().await?;
        let mut active = self.active_orders.write().await;
        for order in open_orders {
            active.insert(order.order_id.clone(), order);
        }
        info!("Loaded {} active orders", active.len());
        Ok(())
    }

    /// Create and submit an order for an approved signal.
    ///
    /// Submission is idempotent: the same signal within the same time
    /// bucket maps to the same order id, and an existing non-terminal
    /// order is returned instead of resubmitting.
    pub async fn process_approved_signal(
        &self,
        signal: &Signal,
        approved_quantity: i64,
        price: Option<Decimal>,
    ) -> Result<Option<Order>> {
        if self.is_paused() {
            warn!("OMS paused, rejecting signal {}", signal.signal_id);
            return Ok(None);
        }
        if signal.action == SignalAction::Hold {
            debug!("Ignoring HOLD signal {}", signal.signal_id);
            return Ok(None);
        }

        let mut order_id =
            order_idempotency_key(signal, approved_quantity, DEFAULT_BUCKET_SECONDS);

        if let Some(existing) = self.repo.get_order(&order_id).await? {
            if !existing.is_terminal() {
                info!(
                    "Order already in flight: {} (status={})",
                    order_id, existing.status
                );
                return Ok(Some(existing));
            }
            // Terminal order under the same key: this is a fresh attempt.
            order_id = format!("{order_id}-{}", retry_suffix());
        }

        let side = match signal.action {
            SignalAction::Buy => crate::domain::order::OrderSide::Buy,
            SignalAction::Sell => crate::domain::order::OrderSide::Sell,
            SignalAction::Hold => unreachable!("HOLD filtered above"),
        };
        let order_type = if price.is_some() {
            OrderType::Limit
        } else {
            OrderType::Market
        };

        let mut order = Order::new(
            order_id,
            signal.signal_id.clone(),
            signal.symbol.clone(),
            side,
            order_type,
            approved_quantity,
            price,
        );

        self.repo.save_order(&order).await?;
        self.active_orders
            .write()
            .await
            .insert(order.order_id.clone(), order.clone());
        self.publish_order_event(OrderEventType::New, &order);

        match self.broker.place_order(&order).await {
            Ok(broker_order_id) => {
                order.mark_submitted(broker_order_id.clone())?;
                info!("Order submitted: {} -> broker:{}", order.order_id, broker_order_id);
            }
            Err(e @ BrokerError::OrderRejected { .. }) => {
                order.mark_rejected(e.to_string())?;
                warn!("Order rejected: {} - {}", order.order_id, e);
            }
            Err(e) => {
                order.mark_rejected(format!("Broker error: {e}"))?;
                error!("Broker error for order {}: {}", order.order_id, e);
            }
        }

        self.repo.update_order(&order).await?;

        let mut active = self.active_orders.write().await;
        if order.is_terminal() {
            active.remove(&order.order_id);
        } else {
            active.insert(order.order_id.clone(), order.clone());
        }
        drop(active);

        if order.status == OrderStatus::Rejected {
            self.publish_order_event(OrderEventType::Rejected, &order);
        }

        Ok(Some(order))
    }

    /// Apply a fill notification from the broker.
    pub async fn handle_fill(
        &self,
        broker_order_id: &str,
        quantity: i64,
        price: Decimal,
        broker_fill_id: Option<String>,
        commission: Option<Decimal>,
    ) -> Result<()> {
        let Some(mut order) = self.find_by_broker_id(broker_order_id).await? else {
            warn!("Unknown order for fill: {}", broker_order_id);
            return Ok(());
        };

        if quantity <= 0 {
            return Err(OrderError::NonPositiveFill(quantity).into());
        }
        if quantity > order.remaining_quantity() {
            return Err(OrderError::FillExceedsRemaining {
                quantity,
                remaining: order.remaining_quantity(),
            }
            .into());
        }

        let fills = self.repo.get_fills_for_order(&order.order_id).await?;
        let fill = Fill {
            fill_id: fill_id(&order.order_id, fills.len() + 1),
            order_id: order.order_id.clone(),
            broker_fill_id,
            quantity,
            price,
            commission,
            filled_at: Utc::now(),
        };
        self.repo.save_fill(&fill).await?;

        let old_status = order.status;
        order.apply_fill(quantity)?;
        self.repo.update_order(&order).await?;

        {
            let mut active = self.active_orders.write().await;
            if order.is_terminal() {
                active.remove(&order.order_id);
            } else {
                active.insert(order.order_id.clone(), order.clone());
            }
        }

        self.bus.publish(Event::Fill(FillEvent {
            fill_id: fill.fill_id.clone(),
            order_id: order.order_id.clone(),
            quantity,
            price,
        }));

        let event_type = if order.status == OrderStatus::Filled {
            OrderEventType::Filled
        } else {
            OrderEventType::Partial
        };
        self.publish_order_event(event_type, &order);

        info!(
            "Fill applied: order={}, qty={}@{}, status={}->{}",
            order.order_id, quantity, price, old_status, order.status
        );
        Ok(())
    }

    /// Apply a cancel confirmation from the broker.
    pub async fn handle_cancel(&self, broker_order_id: &str) -> Result<()> {
        let Some(mut order) = self.find_by_broker_id(broker_order_id).await? else {
            warn!("Unknown order for cancel: {}", broker_order_id);
            return Ok(());
        };

        if order.is_terminal() {
            debug!("Order already terminal: {}", order.order_id);
            return Ok(());
        }

        order.mark_canceled()?;
        self.repo.update_order(&order).await?;
        self.publish_order_event(OrderEventType::Canceled, &order);

        self.active_orders.write().await.remove(&order.order_id);
        info!("Order canceled: {}", order.order_id);
        Ok(())
    }

    /// Request cancellation at the broker. The transition to CANCELED
    /// happens on confirmation via `handle_cancel`.
    pub async fn cancel_order(&self, order_id: &str) -> bool {
        let order = self.active_orders.read().await.get(order_id).cloned();
        let Some(order) = order else {
            warn!("Cannot cancel unknown order: {}", order_id);
            return false;
        };
        let Some(broker_order_id) = order.broker_order_id else {
            warn!("Order not yet submitted: {}", order_id);
            return false;
        };
        if order.status.is_terminal() {
            debug!("Order already terminal: {}", order_id);
            return true;
        }

        match self.broker.cancel_order(&broker_order_id).await {
            Ok(sent) => {
                if sent {
                    info!("Cancel request sent: {}", order_id);
                }
                sent
            }
            Err(e) => {
                error!("Cancel failed for {}: {}", order_id, e);
                false
            }
        }
    }

    /// Request cancellation of every active order. Returns the number of
    /// cancel requests that went out.
    pub async fn cancel_all_orders(&self) -> usize {
        let order_ids: Vec<String> = self.active_orders.read().await.keys().cloned().collect();
        let mut canceled = 0;
        for order_id in order_ids {
            if self.cancel_order(&order_id).await {
                canceled += 1;
            }
        }
        warn!("Cancellation requested for {} orders", canceled);
        canceled
    }

    pub async fn active_orders(&self) -> Vec<Order> {
        self.active_orders.read().await.values().cloned().collect()
    }

    pub async fn active_order_count(&self) -> usize {
        self.active_orders.read().await.len()
    }

    pub async fn get_order(&self, order_id: &str) -> Option<Order> {
        self.active_orders.read().await.get(order_id).cloned()
    }

    async fn find_by_broker_id(&self, broker_order_id: &str) -> Result<Option<Order>> {
        let from_memory = self
            .active_orders
            .read()
            .await
            .values()
            .find(|o| o.broker_order_id.as_deref() == Some(broker_order_id))
            .cloned();
        if from_memory.is_some() {
            return Ok(from_memory);
        }
        self.repo.get_order_by_broker_id(broker_order_id).await
    }

    fn publish_order_event(&self, event_type: OrderEventType, order: &Order) {
        self.bus.publish(Event::Order(OrderEvent {
            order_id: order.order_id.clone(),
            event_type,
            order: order.clone(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::SignalAction;
    use crate::infrastructure::mock::MockBroker;
    use crate::infrastructure::persistence::Database;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    async fn setup() -> (Arc<MockBroker>, OrderManagementSystem) {
        let broker = Arc::new(MockBroker::new());
        broker.connect().await.unwrap();
        let repo = Repository::new(Database::connect_in_memory().await.unwrap());
        let bus = EventBus::new();
        bus.start().await;
        let oms = OrderManagementSystem::new(broker.clone(), repo, bus);
        (broker, oms)
    }

    fn buy_signal(quantity: Option<i64>) -> Signal {
        Signal {
            signal_id: "SIG-1".to_string(),
            strategy_name: "pullback_v1".to_string(),
            symbol: "005930".to_string(),
            action: SignalAction::Buy,
            confidence: 0.8,
            reason: "entry_trigger".to_string(),
            suggested_quantity: quantity,
            metadata: serde_json::json!({}),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_submission_is_idempotent_within_bucket() {
        let (broker, oms) = setup().await;
        oms.repo.save_signal(&buy_signal(Some(10))).await.unwrap();

        let first = oms
            .process_approved_signal(&buy_signal(Some(10)), 10, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.status, OrderStatus::Submitted);

        let second = oms
            .process_approved_signal(&buy_signal(Some(10)), 10, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.order_id, second.order_id);
        assert_eq!(broker.placed_order_count(), 1);
        assert_eq!(oms.active_order_count().await, 1);
    }

    #[tokio::test]
    async fn test_terminal_order_gets_suffixed_retry() {
        let (broker, oms) = setup().await;
        oms.repo.save_signal(&buy_signal(Some(10))).await.unwrap();

        broker.fail_next_place_order(BrokerError::OrderRejected {
            code: "E100".to_string(),
            message: "limit down".to_string(),
        });
        let rejected = oms
            .process_approved_signal(&buy_signal(Some(10)), 10, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rejected.status, OrderStatus::Rejected);
        assert!(rejected.reject_reason.unwrap().contains("limit down"));

        let retried = oms
            .process_approved_signal(&buy_signal(Some(10)), 10, None)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(retried.order_id, rejected.order_id);
        assert!(retried.order_id.starts_with(&rejected.order_id));
        assert_eq!(retried.status, OrderStatus::Submitted);
    }

    #[tokio::test]
    async fn test_partial_then_full_fill() {
        let (_broker, oms) = setup().await;
        oms.repo.save_signal(&buy_signal(Some(10))).await.unwrap();

        let order = oms
            .process_approved_signal(&buy_signal(Some(10)), 10, None)
            .await
            .unwrap()
            .unwrap();
        let broker_id = order.broker_order_id.clone().unwrap();

        oms.handle_fill(&broker_id, 3, dec!(100), None, None)
            .await
            .unwrap();
        let partial = oms.get_order(&order.order_id).await.unwrap();
        assert_eq!(partial.status, OrderStatus::PartialFill);
        assert_eq!(partial.filled_quantity, 3);

        oms.handle_fill(&broker_id, 7, dec!(101), None, None)
            .await
            .unwrap();
        // Terminal orders leave the active map; the store has the truth.
        assert!(oms.get_order(&order.order_id).await.is_none());
        let stored = oms.repo.get_order(&order.order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Filled);
        assert_eq!(stored.filled_quantity, 10);

        let fills = oms.repo.get_fills_for_order(&order.order_id).await.unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].fill_id, format!("FILL-{}-1", order.order_id));
        assert_eq!(fills[1].fill_id, format!("FILL-{}-2", order.order_id));
        assert_eq!(fills.iter().map(|f| f.quantity).sum::<i64>(), 10);
    }

    #[tokio::test]
    async fn test_fill_exceeding_remaining_is_rejected() {
        let (_broker, oms) = setup().await;
        oms.repo.save_signal(&buy_signal(Some(10))).await.unwrap();

        let order = oms
            .process_approved_signal(&buy_signal(Some(10)), 10, None)
            .await
            .unwrap()
            .unwrap();
        let broker_id = order.broker_order_id.clone().unwrap();

        assert!(oms.handle_fill(&broker_id, 11, dec!(100), None, None).await.is_err());
        assert!(oms.handle_fill(&broker_id, 0, dec!(100), None, None).await.is_err());

        // No fill rows were persisted for the rejected attempts.
        let fills = oms.repo.get_fills_for_order(&order.order_id).await.unwrap();
        assert!(fills.is_empty());
    }

    #[tokio::test]
    async fn test_paused_oms_rejects_new_signals() {
        let (broker, oms) = setup().await;
        oms.pause();
        let result = oms
            .process_approved_signal(&buy_signal(Some(10)), 10, None)
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(broker.placed_order_count(), 0);

        oms.resume();
        oms.repo.save_signal(&buy_signal(Some(10))).await.unwrap();
        assert!(
            oms.process_approved_signal(&buy_signal(Some(10)), 10, None)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_cancel_flow() {
        let (_broker, oms) = setup().await;
        oms.repo.save_signal(&buy_signal(Some(10))).await.unwrap();

        let order = oms
            .process_approved_signal(&buy_signal(Some(10)), 10, None)
            .await
            .unwrap()
            .unwrap();
        let broker_id = order.broker_order_id.clone().unwrap();

        assert_eq!(oms.cancel_all_orders().await, 1);
        // Cancel confirmation arrives from the broker side.
        oms.handle_cancel(&broker_id).await.unwrap();

        let stored = oms.repo.get_order(&order.order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Canceled);
        assert_eq!(oms.active_order_count().await, 0);
    }

    #[tokio::test]
    async fn test_load_active_orders_on_startup() {
        let (broker, oms) = setup().await;
        oms.repo.save_signal(&buy_signal(Some(10))).await.unwrap();
        oms.process_approved_signal(&buy_signal(Some(10)), 10, None)
            .await
            .unwrap();

        // Fresh OMS over the same store simulates a restart.
        let restarted =
            OrderManagementSystem::new(broker.clone(), oms.repo.clone(), oms.bus.clone());
        restarted.load_active_orders().await.unwrap();
        assert_eq!(restarted.active_order_count().await, 1);
    }
}
