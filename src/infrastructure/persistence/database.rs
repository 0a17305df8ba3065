//! SQLite connection pool and embedded schema migrations.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{db_path}"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!(db_path, "connected to database");

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub(crate) async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS slots (
                id INTEGER PRIMARY KEY,
                balance TEXT NOT NULL,
                state TEXT NOT NULL,
                current_symbol TEXT,
                current_trade_id TEXT,
                total_trades INTEGER NOT NULL,
                total_pnl TEXT NOT NULL,
                cooldown_until TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create slots table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                slot_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price TEXT,
                qty TEXT,
                entry_order_id TEXT,
                initial_sl_price TEXT,
                current_sl_price TEXT,
                tp_levels_json TEXT NOT NULL,
                highest_tp_reached INTEGER NOT NULL,
                atr_value TEXT,
                status TEXT NOT NULL,
                pnl TEXT,
                fees TEXT NOT NULL,
                entry_time TEXT,
                exit_time TEXT,
                exit_reason TEXT,
                fill_attempts INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create trades table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades (symbol);")
            .execute(&self.pool)
            .await
            .context("Failed to create trades symbol index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bot_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create bot_state table")?;

        info!("database schema migrated");
        Ok(())
    }
}
