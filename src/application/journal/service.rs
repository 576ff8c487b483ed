use crate::application::journal::writer::JournalWriter;
use crate::domain::market::{Candle, Timeframe};
use crate::domain::order::{Fill, Order, OrderSide, OrderType};
use crate::infrastructure::persistence::Repository;
use anyhow::Result;
use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// One order with its signal context, fills and surrounding price action.
#[derive(Debug, Clone)]
pub struct TradeEntry {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
    pub strategy_name: String,
    pub confidence: f64,
    pub reason: String,
    pub fills: Vec<Fill>,
    pub candles_before: Vec<Candle>,
    pub candles_after: Vec<Candle>,
}

impl TradeEntry {
    /// Quantity-weighted average fill price.
    pub fn avg_fill_price(&self) -> Decimal {
        let total_qty: i64 = self.fills.iter().map(|f| f.quantity).sum();
        if total_qty == 0 {
            return Decimal::ZERO;
        }
        let total_value: Decimal = self
            .fills
            .iter()
            .map(|f| f.price * Decimal::from(f.quantity))
            .sum();
        total_value / Decimal::from(total_qty)
    }

    pub fn total_commission(&self) -> Decimal {
        self.fills.iter().filter_map(|f| f.commission).sum()
    }

    pub fn notional_value(&self) -> Decimal {
        self.avg_fill_price() * Decimal::from(self.fills.iter().map(|f| f.quantity).sum::<i64>())
    }
}

#[derive(Debug, Clone)]
pub struct DailySummary {
    pub total_trades: usize,
    pub buy_count: usize,
    pub sell_count: usize,
    pub total_commission: Decimal,
    pub symbols_traded: Vec<String>,
    pub strategy_name: String,
}

#[derive(Debug, Clone)]
pub struct TradeJournal {
    pub date: DateTime<Utc>,
    pub summary: DailySummary,
    pub trades: Vec<TradeEntry>,
    pub portfolio_equity: Decimal,
    pub portfolio_cash: Decimal,
}

/// Renders a markdown journal of the day's trades on the market-close
/// transition. At most one journal per day.
pub struct JournalService {
    repo: Repository,
    journal_dir: PathBuf,
    strategy_name: String,
    generated_today: AtomicBool,
}

impl JournalService {
    pub fn new(repo: Repository, journal_dir: impl AsRef<Path>, strategy_name: String) -> Self {
        Self {
            repo,
            journal_dir: journal_dir.as_ref().to_path_buf(),
            strategy_name,
            generated_today: AtomicBool::new(false),
        }
    }

    /// Write the journal for `date`. Returns the output path, or None when
    /// there were no trades or the journal already exists for today.
    pub async fn generate(
        &self,
        date: DateTime<Utc>,
        portfolio_equity: Decimal,
        portfolio_cash: Decimal,
    ) -> Result<Option<PathBuf>> {
        if self.generated_today.swap(true, Ordering::SeqCst) {
            debug!("Journal already generated today, skipping");
            return Ok(None);
        }

        let (day_start, day_end) = local_day_bounds(date);
        let orders = self.repo.get_orders_between(day_start, day_end).await?;
        if orders.is_empty() {
            info!("No trades today, skipping journal generation");
            return Ok(None);
        }

        let mut trades = Vec::with_capacity(orders.len());
        for order in orders {
            trades.push(self.build_trade_entry(order).await?);
        }
        let summary = self.build_summary(&trades);

        let journal = TradeJournal {
            date,
            summary,
            trades,
            portfolio_equity,
            portfolio_cash,
        };

        let output_path = self
            .journal_dir
            .join(format!("{}.md", date.format("%Y-%m-%d")));
        let path = JournalWriter::write(&journal, &output_path)?;
        info!(
            "Journal written to {} ({} trades)",
            path.display(),
            journal.trades.len()
        );
        Ok(Some(path))
    }

    async fn build_trade_entry(&self, order: Order) -> Result<TradeEntry> {
        let mut strategy_name = self.strategy_name.clone();
        let mut confidence = 0.0;
        let mut reason = String::new();
        if !order.signal_id.is_empty() {
            if let Some(signal) = self.repo.get_signal(&order.signal_id).await? {
                strategy_name = signal.strategy_name;
                confidence = signal.confidence;
                reason = signal.reason;
            }
        }

        let fills = self.repo.get_fills_for_order(&order.order_id).await?;

        // Price action around the entry: 1m bars leading in, 5m bars after.
        let mut candles_before = self
            .repo
            .get_candles_before(&order.symbol, Timeframe::OneMin, 10, order.created_at)
            .await?;
        candles_before.reverse();
        let candles_after = self
            .repo
            .get_candles_after(&order.symbol, Timeframe::FiveMin, 6, order.created_at)
            .await?;

        Ok(TradeEntry {
            order_id: order.order_id,
            symbol: order.symbol,
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            created_at: order.created_at,
            strategy_name,
            confidence,
            reason,
            fills,
            candles_before,
            candles_after,
        })
    }

    fn build_summary(&self, trades: &[TradeEntry]) -> DailySummary {
        let buy_count = trades.iter().filter(|t| t.side == OrderSide::Buy).count();
        let mut symbols = Vec::new();
        for trade in trades {
            if !symbols.contains(&trade.symbol) {
                symbols.push(trade.symbol.clone());
            }
        }
        let strategy_name = trades
            .iter()
            .map(|t| t.strategy_name.as_str())
            .find(|n| !n.is_empty())
            .unwrap_or(&self.strategy_name)
            .to_string();

        DailySummary {
            total_trades: trades.len(),
            buy_count,
            sell_count: trades.len() - buy_count,
            total_commission: trades.iter().map(|t| t.total_commission()).sum(),
            symbols_traded: symbols,
            strategy_name,
        }
    }
}

/// [midnight, next midnight) of the local calendar day containing `date`.
fn local_day_bounds(date: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_day = date.with_timezone(&Local).date_naive();
    let start = local_day
        .and_hms_opt(0, 0, 0)
        .and_then(|t| Local.from_local_datetime(&t).single())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(date);
    (start, start + Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::{Signal, SignalAction};
    use crate::infrastructure::persistence::Database;
    use rust_decimal_macros::dec;

    async fn seed_trade(repo: &Repository) {
        let signal = Signal {
            signal_id: "SIG-1".to_string(),
            strategy_name: "pullback_v1".to_string(),
            symbol: "005930".to_string(),
            action: SignalAction::Buy,
            confidence: 0.8,
            reason: "entry_trigger".to_string(),
            suggested_quantity: None,
            metadata: serde_json::json!({}),
            timestamp: Utc::now(),
        };
        repo.save_signal(&signal).await.unwrap();

        let mut order = Order::new(
            "ORD-1".to_string(),
            "SIG-1".to_string(),
            "005930".to_string(),
            OrderSide::Buy,
            OrderType::Market,
            10,
            None,
        );
        order.mark_submitted("B-1".to_string()).unwrap();
        order.apply_fill(10).unwrap();
        repo.save_order(&order).await.unwrap();

        repo.save_fill(&Fill {
            fill_id: "FILL-ORD-1-1".to_string(),
            order_id: "ORD-1".to_string(),
            broker_fill_id: None,
            quantity: 10,
            price: dec!(70000),
            commission: Some(dec!(105)),
            filled_at: Utc::now(),
        })
        .await
        .unwrap();
    }

    fn temp_journal_dir() -> PathBuf {
        std::env::temp_dir().join(format!("kortrade-journal-{}", uuid::Uuid::new_v4().simple()))
    }

    #[tokio::test]
    async fn test_generates_markdown_once_per_day() {
        let repo = Repository::new(Database::connect_in_memory().await.unwrap());
        seed_trade(&repo).await;

        let dir = temp_journal_dir();
        let service = JournalService::new(repo, &dir, "pullback_v1".to_string());

        let path = service
            .generate(Utc::now(), dec!(10000000), dec!(9300000))
            .await
            .unwrap()
            .expect("journal should be written");
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Daily Trading Journal"));
        assert!(content.contains("005930"));
        assert!(content.contains("pullback_v1"));
        assert!(content.contains("70000"));

        // Second call the same day is a no-op.
        let again = service
            .generate(Utc::now(), dec!(10000000), dec!(9300000))
            .await
            .unwrap();
        assert!(again.is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_no_trades_no_journal() {
        let repo = Repository::new(Database::connect_in_memory().await.unwrap());
        let dir = temp_journal_dir();
        let service = JournalService::new(repo, &dir, "pullback_v1".to_string());

        let path = service
            .generate(Utc::now(), dec!(10000000), dec!(10000000))
            .await
            .unwrap();
        assert!(path.is_none());
        assert!(!dir.exists());
    }

    #[test]
    fn test_avg_fill_price_is_weighted() {
        let entry = TradeEntry {
            order_id: "ORD-1".to_string(),
            symbol: "005930".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: 10,
            created_at: Utc::now(),
            strategy_name: "pullback_v1".to_string(),
            confidence: 0.8,
            reason: String::new(),
            fills: vec![
                Fill {
                    fill_id: "F1".to_string(),
                    order_id: "ORD-1".to_string(),
                    broker_fill_id: None,
                    quantity: 3,
                    price: dec!(100),
                    commission: None,
                    filled_at: Utc::now(),
                },
                Fill {
                    fill_id: "F2".to_string(),
                    order_id: "ORD-1".to_string(),
                    broker_fill_id: None,
                    quantity: 7,
                    price: dec!(110),
                    commission: Some(dec!(1)),
                    filled_at: Utc::now(),
                },
            ],
            candles_before: Vec::new(),
            candles_after: Vec::new(),
        };
        assert_eq!(entry.avg_fill_price(), dec!(107));
        assert_eq!(entry.total_commission(), dec!(1));
    }
}
