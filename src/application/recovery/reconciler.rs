use crate::application::risk::PortfolioTracker;
use crate::domain::order::OrderStatus;
use crate::domain::ports::{Broker, BrokerOpenOrder};
use crate::domain::run::RunStatus;
use crate::infrastructure::persistence::Repository;
use anyhow::Result;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Outcome of the startup sync. `success == false` means the application
/// must refuse to start trading.
#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    pub success: bool,
    pub run_id: String,
    pub positions_synced: usize,
    pub orders_updated: usize,
    pub orders_canceled: usize,
    pub discrepancies: Vec<String>,
    pub error: Option<String>,
}

impl ReconciliationResult {
    fn new(run_id: String) -> Self {
        Self {
            success: false,
            run_id,
            positions_synced: 0,
            orders_updated: 0,
            orders_canceled: 0,
            discrepancies: Vec::new(),
            error: None,
        }
    }
}

/// Aligns local state with the broker on startup. The broker wins: its
/// positions overwrite the portfolio, and local open orders it no longer
/// knows are settled as FILLED or CANCELED.
pub struct Reconciler {
    broker: Arc<dyn Broker>,
    repo: Repository,
    tracker: Arc<PortfolioTracker>,
    run_id: Mutex<Option<String>>,
    run_ended: AtomicBool,
}

impl Reconciler {
    pub fn new(broker: Arc<dyn Broker>, repo: Repository, tracker: Arc<PortfolioTracker>) -> Self {
        Self {
            broker,
            repo,
            tracker,
            run_id: Mutex::new(None),
            run_ended: AtomicBool::new(false),
        }
    }

    pub fn run_id(&self) -> Option<String> {
        self.run_id.lock().unwrap().clone()
    }

    pub async fn reconcile(&self) -> ReconciliationResult {
        let run_id = format!("RUN-{}", &Uuid::new_v4().simple().to_string()[..12]);
        *self.run_id.lock().unwrap() = Some(run_id.clone());
        let mut result = ReconciliationResult::new(run_id.clone());

        match self.reconcile_inner(&run_id, &mut result).await {
            Ok(()) => {
                result.success = true;
                info!(
                    "Reconciliation complete: run={}, positions={}, orders_updated={}, orders_canceled={}",
                    run_id, result.positions_synced, result.orders_updated, result.orders_canceled
                );
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!("Reconciliation failed: {}", message);
                result.error = Some(message.clone());
                if let Err(log_err) = self
                    .repo
                    .log_error(&run_id, "RECONCILIATION_ERROR", &message, None)
                    .await
                {
                    error!("Failed to record reconciliation error: {:#}", log_err);
                }
            }
        }
        result
    }

    async fn reconcile_inner(
        &self,
        run_id: &str,
        result: &mut ReconciliationResult,
    ) -> Result<()> {
        self.mark_crashed_runs().await?;

        // Create the run record first so errors can reference it.
        self.repo.start_bot_run(run_id).await?;

        if !self.broker.is_connected() {
            anyhow::bail!("Broker not connected");
        }

        let positions = self.broker.fetch_positions().await?;
        let balance = self.broker.fetch_balance().await?;
        self.tracker.sync_with_broker(&positions, &balance).await?;
        result.positions_synced = positions.len();

        let broker_orders = self.broker.fetch_open_orders().await?;
        self.reconcile_orders(&broker_orders, result).await?;
        Ok(())
    }

    /// Any run without an end timestamp died uncleanly.
    async fn mark_crashed_runs(&self) -> Result<()> {
        for run in self.repo.get_unfinished_bot_runs().await? {
            self.repo
                .end_bot_run(
                    &run.run_id,
                    RunStatus::Crashed,
                    Some("Unclean shutdown detected during reconciliation"),
                )
                .await?;
            warn!("Marked previous run as crashed: {}", run.run_id);
        }
        Ok(())
    }

    async fn reconcile_orders(
        &self,
        broker_orders: &[BrokerOpenOrder],
        result: &mut ReconciliationResult,
    ) -> Result<()> {
        let broker_ids: std::collections::HashSet<&str> = broker_orders
            .iter()
            .map(|o| o.broker_order_id.as_str())
            .collect();

        // Local open orders the broker no longer reports were settled while
        // we were away: partial fills become FILLED, untouched orders CANCELED.
        for mut order in self.repo.get_open_orders().await? {
            let Some(broker_id) = order.broker_order_id.clone() else {
                continue;
            };
            if broker_ids.contains(broker_id.as_str()) {
                continue;
            }

            let target = if order.filled_quantity > 0 {
                OrderStatus::Filled
            } else {
                OrderStatus::Canceled
            };
            if let Err(e) = order.transition_to(target) {
                warn!("Cannot settle order {} as {}: {}", order.order_id, target, e);
                result
                    .discrepancies
                    .push(format!("unsettleable order {}", order.order_id));
                continue;
            }
            self.repo.update_order(&order).await?;
            result.orders_canceled += 1;
            info!(
                "Order reconciled as {}: {} (broker_id={})",
                target, order.order_id, broker_id
            );
        }

        // Broker-reported fills override local fill counts.
        for broker_order in broker_orders {
            let Some(mut order) = self
                .repo
                .get_order_by_broker_id(&broker_order.broker_order_id)
                .await?
            else {
                warn!(
                    "Unknown broker order found: {}",
                    broker_order.broker_order_id
                );
                result.discrepancies.push(format!(
                    "broker order {} has no local counterpart",
                    broker_order.broker_order_id
                ));
                continue;
            };

            if broker_order.filled_quantity != order.filled_quantity {
                order.filled_quantity = broker_order.filled_quantity;
                order.updated_at = chrono::Utc::now();
                self.repo.update_order(&order).await?;
                result.orders_updated += 1;
                info!(
                    "Order updated from broker: {}, filled={}",
                    order.order_id, order.filled_quantity
                );
            }
        }
        Ok(())
    }

    /// Close out the current run record. Only the first call writes; a
    /// later teardown cannot overwrite a CRASHED verdict.
    pub async fn end_run(&self, status: RunStatus, error: Option<&str>) -> Result<()> {
        if self.run_ended.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(run_id) = self.run_id() {
            self.repo.end_bot_run(&run_id, status, error).await?;
            info!("Bot run ended: {} ({})", run_id, status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{Order, OrderSide, OrderType};
    use crate::domain::ports::{Balance, BrokerPosition};
    use crate::domain::signal::{Signal, SignalAction};
    use crate::infrastructure::mock::MockBroker;
    use crate::infrastructure::persistence::Database;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    async fn setup() -> (Arc<MockBroker>, Repository, Arc<PortfolioTracker>, Reconciler) {
        let broker = Arc::new(MockBroker::new());
        broker.connect().await.unwrap();
        let repo = Repository::new(Database::connect_in_memory().await.unwrap());
        let tracker = Arc::new(PortfolioTracker::new(repo.clone()));
        let reconciler = Reconciler::new(broker.clone(), repo.clone(), tracker.clone());
        (broker, repo, tracker, reconciler)
    }

    async fn seed_submitted_order(repo: &Repository, order_id: &str, broker_id: &str, filled: i64) {
        let signal = Signal {
            signal_id: format!("SIG-{order_id}"),
            strategy_name: "pullback_v1".to_string(),
            symbol: "005930".to_string(),
            action: SignalAction::Buy,
            confidence: 0.5,
            reason: "test".to_string(),
            suggested_quantity: None,
            metadata: serde_json::json!({}),
            timestamp: Utc::now(),
        };
        repo.save_signal(&signal).await.unwrap();
        let mut order = Order::new(
            order_id.to_string(),
            signal.signal_id,
            "005930".to_string(),
            OrderSide::Buy,
            OrderType::Market,
            10,
            None,
        );
        order.mark_submitted(broker_id.to_string()).unwrap();
        order.filled_quantity = filled;
        repo.save_order(&order).await.unwrap();
    }

    #[tokio::test]
    async fn test_orphan_order_without_fills_is_canceled() {
        let (_broker, repo, _tracker, reconciler) = setup().await;
        seed_submitted_order(&repo, "ORD-1", "B1", 0).await;

        let result = reconciler.reconcile().await;
        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(result.orders_canceled, 1);

        let order = repo.get_order("ORD-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn test_orphan_order_with_fills_is_marked_filled() {
        let (_broker, repo, _tracker, reconciler) = setup().await;
        seed_submitted_order(&repo, "ORD-1", "B1", 4).await;

        let result = reconciler.reconcile().await;
        assert!(result.success);

        let order = repo.get_order("ORD-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_broker_fill_count_overrides_local() {
        let (broker, repo, _tracker, reconciler) = setup().await;
        seed_submitted_order(&repo, "ORD-1", "B1", 0).await;
        broker.set_open_orders(vec![BrokerOpenOrder {
            broker_order_id: "B1".to_string(),
            symbol: "005930".to_string(),
            side: OrderSide::Buy,
            quantity: 10,
            filled_quantity: 6,
            price: None,
        }]);

        let result = reconciler.reconcile().await;
        assert!(result.success);
        assert_eq!(result.orders_updated, 1);
        assert_eq!(result.orders_canceled, 0);

        let order = repo.get_order("ORD-1").await.unwrap().unwrap();
        assert_eq!(order.filled_quantity, 6);
        // Status untouched; only the fill count is corrected.
        assert_eq!(order.status, OrderStatus::Submitted);
    }

    #[tokio::test]
    async fn test_unknown_broker_order_is_logged_not_fabricated() {
        let (broker, repo, _tracker, reconciler) = setup().await;
        broker.set_open_orders(vec![BrokerOpenOrder {
            broker_order_id: "B-GHOST".to_string(),
            symbol: "000660".to_string(),
            side: OrderSide::Sell,
            quantity: 5,
            filled_quantity: 0,
            price: None,
        }]);

        let result = reconciler.reconcile().await;
        assert!(result.success);
        assert_eq!(result.discrepancies.len(), 1);
        assert!(repo.get_open_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unclean_runs_marked_crashed_and_portfolio_synced() {
        let (broker, repo, tracker, reconciler) = setup().await;
        repo.start_bot_run("RUN-OLD").await.unwrap();
        broker.set_positions(vec![BrokerPosition {
            symbol: "005930".to_string(),
            quantity: 7,
            avg_price: dec!(70000),
            current_price: None,
            unrealized_pnl: None,
        }]);
        broker.set_balance(Balance {
            total_equity: dec!(12000000),
            available_cash: dec!(11510000),
            margin_used: dec!(0),
            unrealized_pnl: dec!(0),
        });

        let result = reconciler.reconcile().await;
        assert!(result.success);
        assert_eq!(result.positions_synced, 1);

        // The stale run is now CRASHED; the new run is RUNNING.
        let unfinished = repo.get_unfinished_bot_runs().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].run_id, result.run_id);

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.positions.get("005930").unwrap().quantity, 7);
        assert_eq!(snapshot.total_equity, dec!(12000000));
    }

    #[tokio::test]
    async fn test_disconnected_broker_fails_reconciliation() {
        let (broker, repo, _tracker, reconciler) = setup().await;
        broker.disconnect().await.unwrap();

        let result = reconciler.reconcile().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not connected"));

        // The failure is recorded against the run.
        let errors = repo.get_recent_errors(&result.run_id, 10).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, "RECONCILIATION_ERROR");
    }
}
