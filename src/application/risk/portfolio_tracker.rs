use crate::domain::events::{Event, EventHandler, FillEvent};
use crate::domain::order::OrderSide;
use crate::domain::portfolio::{Portfolio, PortfolioPosition};
use crate::domain::ports::{Balance, BrokerPosition};
use crate::infrastructure::persistence::Repository;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::hash_map::Entry;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Aggregates fills into positions and reconciles against broker
/// snapshots. Owns the in-memory portfolio; consumers read clones.
pub struct PortfolioTracker {
    repo: Repository,
    portfolio: RwLock<Portfolio>,
}

impl PortfolioTracker {
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            portfolio: RwLock::new(Portfolio::new()),
        }
    }

    /// Load persisted positions on startup.
    pub async fn initialize(&self) -> Result<()> {
        let positions = self.repo.get_all_positions().await?;
        let mut portfolio = self.portfolio.write().await;
        for (symbol, quantity, avg_price) in &positions {
            portfolio.positions.insert(
                symbol.clone(),
                PortfolioPosition::new(symbol.clone(), *quantity, *avg_price),
            );
        }
        info!("Loaded {} positions from database", positions.len());
        Ok(())
    }

    /// Read-only snapshot of the current state.
    pub async fn snapshot(&self) -> Portfolio {
        self.portfolio.read().await.clone()
    }

    /// Replace local state with the broker's view. Symbols the broker does
    /// not report are removed locally; the broker wins.
    pub async fn sync_with_broker(
        &self,
        positions: &[BrokerPosition],
        balance: &Balance,
    ) -> Result<()> {
        let mut portfolio = self.portfolio.write().await;
        portfolio.cash = balance.available_cash;
        portfolio.total_equity = balance.total_equity;

        let mut broker_symbols = std::collections::HashSet::new();
        for pos in positions {
            broker_symbols.insert(pos.symbol.clone());
            let mut local = PortfolioPosition::new(pos.symbol.clone(), pos.quantity, pos.avg_price);
            local.current_price = pos.current_price;
            portfolio.positions.insert(pos.symbol.clone(), local);
            self.repo
                .save_position(&pos.symbol, pos.quantity, pos.avg_price)
                .await?;
        }

        let stale: Vec<String> = portfolio
            .positions
            .keys()
            .filter(|s| !broker_symbols.contains(*s))
            .cloned()
            .collect();
        for symbol in stale {
            portfolio.positions.remove(&symbol);
            self.repo.delete_position(&symbol).await?;
        }

        portfolio.last_updated = Utc::now();
        info!(
            "Portfolio synced: {} positions, cash={}, equity={}",
            portfolio.positions.len(),
            portfolio.cash,
            portfolio.total_equity
        );
        Ok(())
    }

    /// Apply one fill. The tracker reads the order's side and symbol from
    /// the store, which the OMS updates before publishing the event.
    pub async fn on_fill(&self, event: &FillEvent) -> Result<()> {
        let Some(order) = self.repo.get_order(&event.order_id).await? else {
            warn!("Fill for unknown order: {}", event.order_id);
            return Ok(());
        };

        let symbol = order.symbol.clone();
        let quantity = event.quantity;
        let price = event.price;
        let mut portfolio = self.portfolio.write().await;

        match order.side {
            OrderSide::Buy => match portfolio.positions.entry(symbol.clone()) {
                Entry::Occupied(mut entry) => {
                    let pos = entry.get_mut();
                    let new_qty = pos.quantity + quantity;
                    let total_cost = pos.avg_price * Decimal::from(pos.quantity)
                        + price * Decimal::from(quantity);
                    pos.avg_price = total_cost / Decimal::from(new_qty);
                    pos.quantity = new_qty;
                }
                Entry::Vacant(entry) => {
                    entry.insert(PortfolioPosition::new(symbol.clone(), quantity, price));
                }
            },
            OrderSide::Sell => match portfolio.positions.entry(symbol.clone()) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().quantity -= quantity;
                    if entry.get().quantity <= 0 {
                        entry.remove();
                        self.repo.delete_position(&symbol).await?;
                        portfolio.last_updated = Utc::now();
                        info!(
                            "Position closed from fill: SELL {} {} @ {}",
                            symbol, quantity, price
                        );
                        return Ok(());
                    }
                }
                Entry::Vacant(_) => {
                    // Short positions are out of scope; never fabricate one.
                    warn!("SELL fill for {} with no local position", symbol);
                    return Ok(());
                }
            },
        }

        if let Some(pos) = portfolio.positions.get(&symbol) {
            self.repo
                .save_position(&symbol, pos.quantity, pos.avg_price)
                .await?;
        }
        portfolio.last_updated = Utc::now();
        info!(
            "Position updated from fill: {} {} {} @ {}",
            order.side, symbol, quantity, price
        );
        Ok(())
    }

    /// Refresh the mark used for market_value computations.
    pub async fn update_price(&self, symbol: &str, price: Decimal) {
        let mut portfolio = self.portfolio.write().await;
        if let Some(pos) = portfolio.positions.get_mut(symbol) {
            pos.current_price = Some(price);
        }
    }

    /// Anchor daily PnL at the current equity (call at market open).
    pub async fn reset_daily_pnl(&self) {
        let mut portfolio = self.portfolio.write().await;
        portfolio.daily_start_equity = Some(portfolio.total_equity);
        portfolio.daily_pnl = Decimal::ZERO;
    }

    pub async fn calculate_daily_pnl(&self) -> Decimal {
        let mut portfolio = self.portfolio.write().await;
        let Some(start) = portfolio.daily_start_equity else {
            return Decimal::ZERO;
        };
        portfolio.daily_pnl = portfolio.total_equity - start;
        portfolio.daily_pnl
    }
}

#[async_trait]
impl EventHandler for PortfolioTracker {
    async fn handle(&self, event: Event) -> Result<()> {
        if let Event::Fill(fill) = event {
            self.on_fill(&fill).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "portfolio_tracker"
    }
}
