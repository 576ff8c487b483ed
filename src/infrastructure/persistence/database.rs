use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Schema, executed statement by statement at connect time.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS candles (
        id INTEGER PRIMARY KEY,
        symbol TEXT NOT NULL,
        timeframe TEXT NOT NULL,
        open_time INTEGER NOT NULL,
        open TEXT NOT NULL,
        high TEXT NOT NULL,
        low TEXT NOT NULL,
        close TEXT NOT NULL,
        volume INTEGER NOT NULL,
        UNIQUE(symbol, timeframe, open_time)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_candles_symbol_timeframe
    ON candles(symbol, timeframe, open_time DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS signals (
        signal_id TEXT PRIMARY KEY,
        strategy_name TEXT NOT NULL,
        symbol TEXT NOT NULL,
        action TEXT NOT NULL,
        confidence REAL NOT NULL,
        reason TEXT,
        suggested_quantity INTEGER,
        metadata TEXT,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        order_id TEXT PRIMARY KEY,
        broker_order_id TEXT,
        signal_id TEXT REFERENCES signals(signal_id),
        symbol TEXT NOT NULL,
        side TEXT NOT NULL,
        order_type TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        filled_quantity INTEGER DEFAULT 0,
        price TEXT,
        status TEXT NOT NULL,
        reject_reason TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_orders_symbol ON orders(symbol, created_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fills (
        fill_id TEXT PRIMARY KEY,
        order_id TEXT REFERENCES orders(order_id),
        broker_fill_id TEXT,
        quantity INTEGER NOT NULL,
        price TEXT NOT NULL,
        commission TEXT,
        filled_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_fills_order ON fills(order_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS positions (
        symbol TEXT PRIMARY KEY,
        quantity INTEGER NOT NULL,
        avg_price TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bot_runs (
        run_id TEXT PRIMARY KEY,
        started_at INTEGER NOT NULL,
        ended_at INTEGER,
        status TEXT NOT NULL,
        error_message TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS errors (
        id INTEGER PRIMARY KEY,
        run_id TEXT REFERENCES bot_runs(run_id),
        error_type TEXT NOT NULL,
        message TEXT NOT NULL,
        context TEXT,
        occurred_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_errors_run ON errors(run_id, occurred_at DESC)
    "#,
];

/// Sqlite connection wrapper. A single connection with WAL journaling keeps
/// writes serialized and ordered relative to published events.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        let db = Self { pool };
        db.init_schema().await?;

        info!("Database connected: {}", db_url);
        Ok(db)
    }

    /// In-memory database for tests.
    pub async fn connect_in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to initialize database schema")?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_initializes() {
        let db = Database::connect_in_memory().await.unwrap();
        // All tables should exist and be queryable.
        for table in [
            "candles", "signals", "orders", "fills", "positions", "bot_runs", "errors",
        ] {
            sqlx::query(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&db.pool)
                .await
                .unwrap_or_else(|e| panic!("table {table} missing: {e}"));
        }
    }
}
