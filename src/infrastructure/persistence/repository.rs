use crate::domain::market::{Candle, Timeframe};
use crate::domain::order::{Fill, Order};
use crate::domain::run::{BotRun, ErrorRecord, RunStatus};
use crate::domain::signal::Signal;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;
use tracing::debug;

fn epoch_to_utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn decimal_opt(value: Option<&str>) -> Result<Option<Decimal>> {
    value
        .map(|s| Decimal::from_str(s).context("Malformed decimal in store"))
        .transpose()
}

/// Data access layer for all trading entities. Every write commits before
/// returning; the pool is capped at one connection so writes stay ordered.
#[derive(Clone)]
pub struct Repository {
    db: Database,
}

impl Repository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // --- Candle operations ---

    pub async fn save_candle(&self, candle: &Candle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO candles
            (symbol, timeframe, open_time, open, high, low, close, volume)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&candle.symbol)
        .bind(candle.timeframe.as_str())
        .bind(candle.open_time.timestamp())
        .bind(candle.open.to_string())
        .bind(candle.high.to_string())
        .bind(candle.low.to_string())
        .bind(candle.close.to_string())
        .bind(candle.volume)
        .execute(&self.db.pool)
        .await
        .context("Failed to save candle")?;
        Ok(())
    }

    /// Most-recent-first candles for a symbol and timeframe.
    pub async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: i64,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM candles
            WHERE symbol = ? AND timeframe = ?
            ORDER BY open_time DESC LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;
        rows.iter().map(candle_from_row).collect()
    }

    /// Candles strictly before a point in time, most-recent-first.
    pub async fn get_candles_before(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: i64,
        before: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM candles
            WHERE symbol = ? AND timeframe = ? AND open_time < ?
            ORDER BY open_time DESC LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(before.timestamp())
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;
        rows.iter().map(candle_from_row).collect()
    }

    /// Candles at or after a point in time, oldest-first.
    pub async fn get_candles_after(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: i64,
        after: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM candles
            WHERE symbol = ? AND timeframe = ? AND open_time >= ?
            ORDER BY open_time ASC LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(after.timestamp())
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;
        rows.iter().map(candle_from_row).collect()
    }

    // --- Signal operations ---

    pub async fn save_signal(&self, signal: &Signal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO signals
            (signal_id, strategy_name, symbol, action, confidence, reason,
             suggested_quantity, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.signal_id)
        .bind(&signal.strategy_name)
        .bind(&signal.symbol)
        .bind(signal.action.to_string())
        .bind(signal.confidence)
        .bind(&signal.reason)
        .bind(signal.suggested_quantity)
        .bind(signal.metadata.to_string())
        .bind(signal.timestamp.timestamp())
        .execute(&self.db.pool)
        .await
        .context("Failed to save signal")?;
        Ok(())
    }

    pub async fn get_signal(&self, signal_id: &str) -> Result<Option<Signal>> {
        let row = sqlx::query("SELECT * FROM signals WHERE signal_id = ?")
            .bind(signal_id)
            .fetch_optional(&self.db.pool)
            .await?;
        row.as_ref().map(signal_from_row).transpose()
    }

    // --- Order operations ---

    pub async fn save_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders
            (order_id, broker_order_id, signal_id, symbol, side, order_type,
             quantity, filled_quantity, price, status, reject_reason,
             created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.broker_order_id)
        .bind(&order.signal_id)
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(order.order_type.to_string())
        .bind(order.quantity)
        .bind(order.filled_quantity)
        .bind(order.price.map(|p| p.to_string()))
        .bind(order.status.to_string())
        .bind(&order.reject_reason)
        .bind(order.created_at.timestamp())
        .bind(order.updated_at.timestamp())
        .execute(&self.db.pool)
        .await
        .context("Failed to save order")?;
        debug!("Persisted order {}", order.order_id);
        Ok(())
    }

    pub async fn update_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE orders SET
                broker_order_id = ?,
                filled_quantity = ?,
                status = ?,
                reject_reason = ?,
                updated_at = ?
            WHERE order_id = ?
            "#,
        )
        .bind(&order.broker_order_id)
        .bind(order.filled_quantity)
        .bind(order.status.to_string())
        .bind(&order.reject_reason)
        .bind(order.updated_at.timestamp())
        .bind(&order.order_id)
        .execute(&self.db.pool)
        .await
        .context("Failed to update order")?;
        Ok(())
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&self.db.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    pub async fn get_order_by_broker_id(&self, broker_order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE broker_order_id = ?")
            .bind(broker_order_id)
            .fetch_optional(&self.db.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    /// All non-terminal orders, oldest first.
    pub async fn get_open_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE status NOT IN ('FILLED', 'CANCELED', 'REJECTED')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.db.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    /// Orders created today by local wall clock, any status. Drives the
    /// max_trades_per_day gate across restarts.
    pub async fn count_orders_today(&self) -> Result<i64> {
        let today_start = Local::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|t| t.and_local_timezone(Local).single())
            .map_or(0, |t| t.timestamp());

        let row = sqlx::query("SELECT COUNT(*) AS count FROM orders WHERE created_at >= ?")
            .bind(today_start)
            .fetch_one(&self.db.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    /// Orders created in [start, end), oldest first. Used by the journal.
    pub async fn get_orders_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT * FROM orders WHERE created_at >= ? AND created_at < ? ORDER BY created_at ASC",
        )
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_all(&self.db.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    // --- Fill operations ---

    pub async fn save_fill(&self, fill: &Fill) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fills
            (fill_id, order_id, broker_fill_id, quantity, price, commission, filled_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&fill.fill_id)
        .bind(&fill.order_id)
        .bind(&fill.broker_fill_id)
        .bind(fill.quantity)
        .bind(fill.price.to_string())
        .bind(fill.commission.map(|c| c.to_string()))
        .bind(fill.filled_at.timestamp())
        .execute(&self.db.pool)
        .await
        .context("Failed to save fill")?;
        Ok(())
    }

    pub async fn get_fills_for_order(&self, order_id: &str) -> Result<Vec<Fill>> {
        let rows = sqlx::query("SELECT * FROM fills WHERE order_id = ? ORDER BY filled_at ASC")
            .bind(order_id)
            .fetch_all(&self.db.pool)
            .await?;
        rows.iter().map(fill_from_row).collect()
    }

    // --- Position operations ---

    pub async fn save_position(
        &self,
        symbol: &str,
        quantity: i64,
        avg_price: Decimal,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO positions (symbol, quantity, avg_price, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(symbol)
        .bind(quantity)
        .bind(avg_price.to_string())
        .bind(Utc::now().timestamp())
        .execute(&self.db.pool)
        .await
        .context("Failed to save position")?;
        Ok(())
    }

    pub async fn get_all_positions(&self) -> Result<Vec<(String, i64, Decimal)>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE quantity != 0")
            .fetch_all(&self.db.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let symbol: String = row.try_get("symbol")?;
                let quantity: i64 = row.try_get("quantity")?;
                let avg_price = Decimal::from_str(row.try_get("avg_price")?)?;
                Ok((symbol, quantity, avg_price))
            })
            .collect()
    }

    pub async fn delete_position(&self, symbol: &str) -> Result<()> {
        sqlx::query("DELETE FROM positions WHERE symbol = ?")
            .bind(symbol)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    // --- Bot run operations ---

    pub async fn start_bot_run(&self, run_id: &str) -> Result<()> {
        sqlx::query("INSERT INTO bot_runs (run_id, started_at, status) VALUES (?, ?, 'RUNNING')")
            .bind(run_id)
            .bind(Utc::now().timestamp())
            .execute(&self.db.pool)
            .await
            .context("Failed to record bot run")?;
        Ok(())
    }

    pub async fn end_bot_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE bot_runs SET ended_at = ?, status = ?, error_message = ? WHERE run_id = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(status.to_string())
        .bind(error_message)
        .bind(run_id)
        .execute(&self.db.pool)
        .await
        .context("Failed to end bot run")?;
        Ok(())
    }

    pub async fn get_unfinished_bot_runs(&self) -> Result<Vec<BotRun>> {
        let rows =
            sqlx::query("SELECT * FROM bot_runs WHERE ended_at IS NULL ORDER BY started_at DESC")
                .fetch_all(&self.db.pool)
                .await?;
        rows.iter().map(run_from_row).collect()
    }

    pub async fn get_last_bot_run(&self) -> Result<Option<BotRun>> {
        let row = sqlx::query("SELECT * FROM bot_runs ORDER BY started_at DESC LIMIT 1")
            .fetch_optional(&self.db.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    // --- Error operations ---

    pub async fn log_error(
        &self,
        run_id: &str,
        error_type: &str,
        message: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO errors (run_id, error_type, message, context, occurred_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(error_type)
        .bind(message)
        .bind(context.map(|c| c.to_string()))
        .bind(Utc::now().timestamp())
        .execute(&self.db.pool)
        .await
        .context("Failed to log error")?;
        Ok(())
    }

    pub async fn get_recent_errors(&self, run_id: &str, limit: i64) -> Result<Vec<ErrorRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM errors WHERE run_id = ? ORDER BY occurred_at DESC LIMIT ?",
        )
        .bind(run_id)
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let context: Option<String> = row.try_get("context")?;
                Ok(ErrorRecord {
                    run_id: row.try_get("run_id")?,
                    error_type: row.try_get("error_type")?,
                    message: row.try_get("message")?,
                    context: context.and_then(|c| serde_json::from_str(&c).ok()),
                    occurred_at: epoch_to_utc(row.try_get("occurred_at")?),
                })
            })
            .collect()
    }
}

fn candle_from_row(row: &SqliteRow) -> Result<Candle> {
    let timeframe: String = row.try_get("timeframe")?;
    Ok(Candle {
        symbol: row.try_get("symbol")?,
        timeframe: Timeframe::from_str(&timeframe)?,
        open_time: epoch_to_utc(row.try_get("open_time")?),
        open: Decimal::from_str(row.try_get("open")?)?,
        high: Decimal::from_str(row.try_get("high")?)?,
        low: Decimal::from_str(row.try_get("low")?)?,
        close: Decimal::from_str(row.try_get("close")?)?,
        volume: row.try_get("volume")?,
    })
}

fn signal_from_row(row: &SqliteRow) -> Result<Signal> {
    let action: String = row.try_get("action")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(Signal {
        signal_id: row.try_get("signal_id")?,
        strategy_name: row.try_get("strategy_name")?,
        symbol: row.try_get("symbol")?,
        action: action.parse()?,
        confidence: row.try_get("confidence")?,
        reason: row.try_get::<Option<String>, _>("reason")?.unwrap_or_default(),
        suggested_quantity: row.try_get("suggested_quantity")?,
        metadata: metadata
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or(serde_json::Value::Null),
        timestamp: epoch_to_utc(row.try_get("created_at")?),
    })
}

fn order_from_row(row: &SqliteRow) -> Result<Order> {
    let side: String = row.try_get("side")?;
    let order_type: String = row.try_get("order_type")?;
    let status: String = row.try_get("status")?;
    let price: Option<String> = row.try_get("price")?;
    Ok(Order {
        order_id: row.try_get("order_id")?,
        signal_id: row.try_get::<Option<String>, _>("signal_id")?.unwrap_or_default(),
        symbol: row.try_get("symbol")?,
        side: side.parse()?,
        order_type: order_type.parse()?,
        quantity: row.try_get("quantity")?,
        filled_quantity: row.try_get("filled_quantity")?,
        price: decimal_opt(price.as_deref())?,
        broker_order_id: row.try_get("broker_order_id")?,
        status: status.parse()?,
        reject_reason: row.try_get("reject_reason")?,
        created_at: epoch_to_utc(row.try_get("created_at")?),
        updated_at: epoch_to_utc(row.try_get("updated_at")?),
    })
}

fn fill_from_row(row: &SqliteRow) -> Result<Fill> {
    let commission: Option<String> = row.try_get("commission")?;
    Ok(Fill {
        fill_id: row.try_get("fill_id")?,
        order_id: row.try_get("order_id")?,
        broker_fill_id: row.try_get("broker_fill_id")?,
        quantity: row.try_get("quantity")?,
        price: Decimal::from_str(row.try_get("price")?)?,
        commission: decimal_opt(commission.as_deref())?,
        filled_at: epoch_to_utc(row.try_get("filled_at")?),
    })
}

fn run_from_row(row: &SqliteRow) -> Result<BotRun> {
    let status: String = row.try_get("status")?;
    let ended_at: Option<i64> = row.try_get("ended_at")?;
    Ok(BotRun {
        run_id: row.try_get("run_id")?,
        started_at: epoch_to_utc(row.try_get("started_at")?),
        ended_at: ended_at.map(epoch_to_utc),
        status: status.parse()?,
        error_message: row.try_get("error_message")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderSide, OrderStatus, OrderType};
    use crate::domain::signal::SignalAction;
    use rust_decimal_macros::dec;

    async fn test_repo() -> Repository {
        Repository::new(Database::connect_in_memory().await.unwrap())
    }

    fn sample_signal() -> Signal {
        Signal {
            signal_id: "SIG-test1".to_string(),
            strategy_name: "pullback_v1".to_string(),
            symbol: "005930".to_string(),
            action: SignalAction::Buy,
            confidence: 0.7,
            reason: "entry_trigger".to_string(),
            suggested_quantity: Some(10),
            metadata: serde_json::json!({"ltf": "5m"}),
            timestamp: Utc::now(),
        }
    }

    fn sample_order() -> Order {
        Order::new(
            "ORD-deadbeef".to_string(),
            "SIG-test1".to_string(),
            "005930".to_string(),
            OrderSide::Buy,
            OrderType::Limit,
            10,
            Some(dec!(71200)),
        )
    }

    #[tokio::test]
    async fn test_order_round_trip_preserves_all_fields() {
        let repo = test_repo().await;
        repo.save_signal(&sample_signal()).await.unwrap();

        let mut order = sample_order();
        order.mark_submitted("B-77".to_string()).unwrap();
        order.apply_fill(4).unwrap();
        repo.save_order(&order).await.unwrap();

        let loaded = repo.get_order("ORD-deadbeef").await.unwrap().unwrap();
        assert_eq!(loaded.order_id, order.order_id);
        assert_eq!(loaded.signal_id, order.signal_id);
        assert_eq!(loaded.symbol, order.symbol);
        assert_eq!(loaded.side, OrderSide::Buy);
        assert_eq!(loaded.order_type, OrderType::Limit);
        assert_eq!(loaded.quantity, 10);
        assert_eq!(loaded.filled_quantity, 4);
        assert_eq!(loaded.price, Some(dec!(71200)));
        assert_eq!(loaded.broker_order_id.as_deref(), Some("B-77"));
        assert_eq!(loaded.status, OrderStatus::PartialFill);
        assert_eq!(loaded.created_at.timestamp(), order.created_at.timestamp());
    }

    #[tokio::test]
    async fn test_open_orders_excludes_terminal() {
        let repo = test_repo().await;
        repo.save_signal(&sample_signal()).await.unwrap();

        let mut active = sample_order();
        active.mark_submitted("B-1".to_string()).unwrap();
        repo.save_order(&active).await.unwrap();

        let mut done = sample_order();
        done.order_id = "ORD-cafebabe".to_string();
        done.mark_rejected("no funds").unwrap();
        repo.save_order(&done).await.unwrap();

        let open = repo.get_open_orders().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].order_id, "ORD-deadbeef");
    }

    #[tokio::test]
    async fn test_lookup_by_broker_id() {
        let repo = test_repo().await;
        repo.save_signal(&sample_signal()).await.unwrap();

        let mut order = sample_order();
        order.mark_submitted("B-42".to_string()).unwrap();
        repo.save_order(&order).await.unwrap();

        let found = repo.get_order_by_broker_id("B-42").await.unwrap().unwrap();
        assert_eq!(found.order_id, "ORD-deadbeef");
        assert!(repo.get_order_by_broker_id("B-99").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_candle_round_trip_and_ordering() {
        let repo = test_repo().await;
        for i in 0..5i64 {
            let candle = Candle {
                symbol: "005930".to_string(),
                timeframe: Timeframe::OneMin,
                open_time: epoch_to_utc(1_704_067_200 + i * 60),
                open: dec!(70000) + Decimal::from(i),
                high: dec!(70500) + Decimal::from(i),
                low: dec!(69900),
                close: dec!(70300),
                volume: 100 + i,
            };
            repo.save_candle(&candle).await.unwrap();
        }

        let candles = repo.get_candles("005930", Timeframe::OneMin, 3).await.unwrap();
        assert_eq!(candles.len(), 3);
        // Most-recent-first
        assert_eq!(candles[0].open_time.timestamp(), 1_704_067_200 + 4 * 60);
        assert_eq!(candles[0].open, dec!(70004));
        assert!(candles[0].open_time > candles[2].open_time);
    }

    #[tokio::test]
    async fn test_candle_upsert_on_duplicate_open_time() {
        let repo = test_repo().await;
        let mut candle = Candle {
            symbol: "005930".to_string(),
            timeframe: Timeframe::FiveMin,
            open_time: epoch_to_utc(1_704_067_200),
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close: dec!(105),
            volume: 10,
        };
        repo.save_candle(&candle).await.unwrap();
        candle.close = dec!(108);
        repo.save_candle(&candle).await.unwrap();

        let stored = repo.get_candles("005930", Timeframe::FiveMin, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].close, dec!(108));
    }

    #[tokio::test]
    async fn test_positions_lifecycle() {
        let repo = test_repo().await;
        repo.save_position("005930", 10, dec!(70000)).await.unwrap();
        repo.save_position("000660", 5, dec!(180000)).await.unwrap();

        let positions = repo.get_all_positions().await.unwrap();
        assert_eq!(positions.len(), 2);

        repo.delete_position("005930").await.unwrap();
        let positions = repo.get_all_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].0, "000660");
    }

    #[tokio::test]
    async fn test_bot_run_lifecycle() {
        let repo = test_repo().await;
        repo.start_bot_run("RUN-1").await.unwrap();
        repo.start_bot_run("RUN-2").await.unwrap();

        let unfinished = repo.get_unfinished_bot_runs().await.unwrap();
        assert_eq!(unfinished.len(), 2);
        assert_eq!(unfinished[0].status, RunStatus::Running);

        repo.end_bot_run("RUN-1", RunStatus::Completed, None).await.unwrap();
        repo.end_bot_run("RUN-2", RunStatus::Crashed, Some("unclean shutdown"))
            .await
            .unwrap();

        assert!(repo.get_unfinished_bot_runs().await.unwrap().is_empty());
        let last = repo.get_last_bot_run().await.unwrap().unwrap();
        assert!(last.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_error_log_round_trip() {
        let repo = test_repo().await;
        repo.start_bot_run("RUN-1").await.unwrap();
        repo.log_error(
            "RUN-1",
            "STRATEGY_ERROR",
            "boom",
            Some(&serde_json::json!({"symbol": "005930"})),
        )
        .await
        .unwrap();

        let errors = repo.get_recent_errors("RUN-1", 10).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, "STRATEGY_ERROR");
        assert_eq!(errors[0].context.as_ref().unwrap()["symbol"], "005930");
    }

    #[tokio::test]
    async fn test_fills_ordered_by_time() {
        let repo = test_repo().await;
        repo.save_signal(&sample_signal()).await.unwrap();
        let mut order = sample_order();
        order.mark_submitted("B-1".to_string()).unwrap();
        repo.save_order(&order).await.unwrap();

        for seq in 1..=3 {
            let fill = Fill {
                fill_id: format!("FILL-ORD-deadbeef-{seq}"),
                order_id: "ORD-deadbeef".to_string(),
                broker_fill_id: None,
                quantity: 2,
                price: dec!(71000),
                commission: Some(dec!(10.5)),
                filled_at: epoch_to_utc(1_704_067_200 + seq),
            };
            repo.save_fill(&fill).await.unwrap();
        }

        let fills = repo.get_fills_for_order("ORD-deadbeef").await.unwrap();
        assert_eq!(fills.len(), 3);
        assert_eq!(fills[0].fill_id, "FILL-ORD-deadbeef-1");
        assert_eq!(fills[2].fill_id, "FILL-ORD-deadbeef-3");
        assert_eq!(fills[0].commission, Some(dec!(10.5)));
    }
}
