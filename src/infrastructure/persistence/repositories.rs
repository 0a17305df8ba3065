//! SQLite-backed implementations of the slot/trade/bot-state ports. All
//! decimals are stored as strings to preserve exact precision.

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::repositories::{SlotRepository, StateRepository, TradeRepository};
use crate::domain::signal::Side;
use crate::domain::slot::{Slot, SlotState};
use crate::domain::trade::{ExitReason, TPLevel, Trade, TradeStatus};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;
use uuid::Uuid;

fn dec(raw: &str) -> EngineResult<Decimal> {
    Decimal::from_str(raw).map_err(|e| EngineError::Other(anyhow::anyhow!(e)))
}

fn opt_dec(raw: Option<String>) -> EngineResult<Option<Decimal>> {
    raw.as_deref().map(dec).transpose()
}

fn slot_state_str(state: SlotState) -> &'static str {
    match state {
        SlotState::Available => "AVAILABLE",
        SlotState::Assigned => "ASSIGNED",
        SlotState::InTrade => "IN_TRADE",
        SlotState::Cooldown => "COOLDOWN",
        SlotState::Frozen => "FROZEN",
    }
}

fn slot_state_from_str(raw: &str) -> EngineResult<SlotState> {
    match raw {
        "AVAILABLE" => Ok(SlotState::Available),
        "ASSIGNED" => Ok(SlotState::Assigned),
        "IN_TRADE" => Ok(SlotState::InTrade),
        "COOLDOWN" => Ok(SlotState::Cooldown),
        "FROZEN" => Ok(SlotState::Frozen),
        other => Err(EngineError::InvariantViolation(format!(
            "unknown slot state in database: {other}"
        ))),
    }
}

pub struct SqliteSlotRepository {
    pool: SqlitePool,
}

impl SqliteSlotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_slot(row: SqliteRow) -> EngineResult<Slot> {
        let current_trade_id: Option<String> = row.try_get("current_trade_id")?;
        let cooldown_until: Option<String> = row.try_get("cooldown_until")?;
        Ok(Slot {
            id: row.try_get::<i64, _>("id")? as u32,
            balance: dec(&row.try_get::<String, _>("balance")?)?,
            state: slot_state_from_str(&row.try_get::<String, _>("state")?)?,
            current_symbol: row.try_get("current_symbol")?,
            current_trade_id: current_trade_id
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?,
            total_trades: row.try_get::<i64, _>("total_trades")? as u64,
            total_pnl: dec(&row.try_get::<String, _>("total_pnl")?)?,
            cooldown_until: cooldown_until
                .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
                .transpose()
                .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?,
        })
    }
}

#[async_trait]
impl SlotRepository for SqliteSlotRepository {
    async fn load_all(&self) -> EngineResult<Vec<Slot>> {
        let rows = sqlx::query("SELECT * FROM slots ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_slot).collect()
    }

    async fn upsert(&self, slot: &Slot) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO slots (id, balance, state, current_symbol, current_trade_id, total_trades, total_pnl, cooldown_until)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                balance = excluded.balance,
                state = excluded.state,
                current_symbol = excluded.current_symbol,
                current_trade_id = excluded.current_trade_id,
                total_trades = excluded.total_trades,
                total_pnl = excluded.total_pnl,
                cooldown_until = excluded.cooldown_until
            "#,
        )
        .bind(slot.id as i64)
        .bind(slot.balance.to_string())
        .bind(slot_state_str(slot.state))
        .bind(&slot.current_symbol)
        .bind(slot.current_trade_id.map(|id| id.to_string()))
        .bind(slot.total_trades as i64)
        .bind(slot.total_pnl.to_string())
        .bind(slot.cooldown_until.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Long => "LONG",
        Side::Short => "SHORT",
    }
}

fn side_from_str(raw: &str) -> EngineResult<Side> {
    match raw {
        "LONG" => Ok(Side::Long),
        "SHORT" => Ok(Side::Short),
        other => Err(EngineError::InvariantViolation(format!(
            "unknown side in database: {other}"
        ))),
    }
}

fn status_str(status: TradeStatus) -> &'static str {
    match status {
        TradeStatus::Pending => "PENDING",
        TradeStatus::Filling => "FILLING",
        TradeStatus::Open => "OPEN",
        TradeStatus::Closing => "CLOSING",
        TradeStatus::Closed => "CLOSED",
        TradeStatus::Cancelled => "CANCELLED",
    }
}

fn status_from_str(raw: &str) -> EngineResult<TradeStatus> {
    match raw {
        "PENDING" => Ok(TradeStatus::Pending),
        "FILLING" => Ok(TradeStatus::Filling),
        "OPEN" => Ok(TradeStatus::Open),
        "CLOSING" => Ok(TradeStatus::Closing),
        "CLOSED" => Ok(TradeStatus::Closed),
        "CANCELLED" => Ok(TradeStatus::Cancelled),
        other => Err(EngineError::InvariantViolation(format!(
            "unknown trade status in database: {other}"
        ))),
    }
}

fn exit_reason_str(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::SlHit => "SL_HIT",
        ExitReason::TrailingSl => "TRAILING_SL",
        ExitReason::KillSwitch => "KILL_SWITCH",
        ExitReason::Manual => "MANUAL",
        ExitReason::FillFailed => "FILL_FAILED",
    }
}

fn exit_reason_from_str(raw: &str) -> EngineResult<ExitReason> {
    match raw {
        "SL_HIT" => Ok(ExitReason::SlHit),
        "TRAILING_SL" => Ok(ExitReason::TrailingSl),
        "KILL_SWITCH" => Ok(ExitReason::KillSwitch),
        "MANUAL" => Ok(ExitReason::Manual),
        "FILL_FAILED" => Ok(ExitReason::FillFailed),
        other => Err(EngineError::InvariantViolation(format!(
            "unknown exit reason in database: {other}"
        ))),
    }
}

fn parse_rfc3339(raw: Option<String>) -> EngineResult<Option<DateTime<Utc>>> {
    raw.map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))
}

pub struct SqliteTradeRepository {
    pool: SqlitePool,
}

impl SqliteTradeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_trade(row: SqliteRow) -> EngineResult<Trade> {
        let id: String = row.try_get("id")?;
        let tp_levels_json: String = row.try_get("tp_levels_json")?;
        let tp_levels: Vec<TPLevel> =
            serde_json::from_str(&tp_levels_json).context("failed to deserialize tp_levels")?;

        Ok(Trade {
            id: Uuid::parse_str(&id).map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?,
            slot_id: row.try_get::<i64, _>("slot_id")? as u32,
            symbol: row.try_get("symbol")?,
            side: side_from_str(&row.try_get::<String, _>("side")?)?,
            entry_price: opt_dec(row.try_get("entry_price")?)?,
            qty: opt_dec(row.try_get("qty")?)?,
            entry_order_id: row.try_get("entry_order_id")?,
            initial_sl_price: opt_dec(row.try_get("initial_sl_price")?)?,
            current_sl_price: opt_dec(row.try_get("current_sl_price")?)?,
            tp_levels,
            highest_tp_reached: row.try_get::<i64, _>("highest_tp_reached")? as u8,
            atr_value: opt_dec(row.try_get("atr_value")?)?,
            status: status_from_str(&row.try_get::<String, _>("status")?)?,
            pnl: opt_dec(row.try_get("pnl")?)?,
            fees: dec(&row.try_get::<String, _>("fees")?)?,
            entry_time: parse_rfc3339(row.try_get("entry_time")?)?,
            exit_time: parse_rfc3339(row.try_get("exit_time")?)?,
            exit_reason: row
                .try_get::<Option<String>, _>("exit_reason")?
                .as_deref()
                .map(exit_reason_from_str)
                .transpose()?,
            fill_attempts: row.try_get::<i64, _>("fill_attempts")? as u32,
        })
    }
}

#[async_trait]
impl TradeRepository for SqliteTradeRepository {
    async fn load_open(&self) -> EngineResult<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE status = 'OPEN'")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_trade).collect()
    }

    async fn upsert(&self, trade: &Trade) -> EngineResult<()> {
        let tp_levels_json =
            serde_json::to_string(&trade.tp_levels).context("failed to serialize tp_levels")?;

        sqlx::query(
            r#"
            INSERT INTO trades (
                id, slot_id, symbol, side, entry_price, qty, entry_order_id,
                initial_sl_price, current_sl_price, tp_levels_json, highest_tp_reached,
                atr_value, status, pnl, fees, entry_time, exit_time, exit_reason, fill_attempts
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                slot_id = excluded.slot_id,
                symbol = excluded.symbol,
                side = excluded.side,
                entry_price = excluded.entry_price,
                qty = excluded.qty,
                entry_order_id = excluded.entry_order_id,
                initial_sl_price = excluded.initial_sl_price,
                current_sl_price = excluded.current_sl_price,
                tp_levels_json = excluded.tp_levels_json,
                highest_tp_reached = excluded.highest_tp_reached,
                atr_value = excluded.atr_value,
                status = excluded.status,
                pnl = excluded.pnl,
                fees = excluded.fees,
                entry_time = excluded.entry_time,
                exit_time = excluded.exit_time,
                exit_reason = excluded.exit_reason,
                fill_attempts = excluded.fill_attempts
            "#,
        )
        .bind(trade.id.to_string())
        .bind(trade.slot_id as i64)
        .bind(&trade.symbol)
        .bind(side_str(trade.side))
        .bind(trade.entry_price.map(|d| d.to_string()))
        .bind(trade.qty.map(|d| d.to_string()))
        .bind(&trade.entry_order_id)
        .bind(trade.initial_sl_price.map(|d| d.to_string()))
        .bind(trade.current_sl_price.map(|d| d.to_string()))
        .bind(tp_levels_json)
        .bind(trade.highest_tp_reached as i64)
        .bind(trade.atr_value.map(|d| d.to_string()))
        .bind(status_str(trade.status))
        .bind(trade.pnl.map(|d| d.to_string()))
        .bind(trade.fees.to_string())
        .bind(trade.entry_time.map(|t| t.to_rfc3339()))
        .bind(trade.exit_time.map(|t| t.to_rfc3339()))
        .bind(trade.exit_reason.map(exit_reason_str))
        .bind(trade.fill_attempts as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> EngineResult<Option<Trade>> {
        let row = sqlx::query("SELECT * FROM trades WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_trade).transpose()
    }
}

pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateRepository for SqliteStateRepository {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM bot_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bot_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::slot::Slot;
    use rust_decimal_macros::dec;

    async fn test_pool() -> SqlitePool {
        SqlitePool::connect("sqlite::memory:").await.unwrap()
    }

    async fn migrate(pool: &SqlitePool) {
        let db = crate::infrastructure::persistence::database::Database {
            pool: pool.clone(),
        };
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn slot_roundtrips_through_sqlite() {
        let pool = test_pool().await;
        migrate(&pool).await;
        let repo = SqliteSlotRepository::new(pool);

        let mut slot = Slot::new(1, dec!(10));
        slot.state = SlotState::Cooldown;
        slot.cooldown_until = Some(Utc::now());
        repo.upsert(&slot).await.unwrap();

        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].state, SlotState::Cooldown);
        assert_eq!(loaded[0].balance, dec!(10));
    }

    #[tokio::test]
    async fn trade_roundtrips_through_sqlite() {
        let pool = test_pool().await;
        migrate(&pool).await;
        let repo = SqliteTradeRepository::new(pool);

        let mut trade = Trade::new_pending(Uuid::new_v4(), 1, "BTCUSDT", Side::Long);
        trade.entry_price = Some(dec!(100));
        trade.status = TradeStatus::Open;
        repo.upsert(&trade).await.unwrap();

        let loaded = repo.find(trade.id).await.unwrap().unwrap();
        assert_eq!(loaded.entry_price, Some(dec!(100)));
        assert_eq!(loaded.status, TradeStatus::Open);

        let open = repo.load_open().await.unwrap();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn state_roundtrips_through_sqlite() {
        let pool = test_pool().await;
        migrate(&pool).await;
        let repo = SqliteStateRepository::new(pool);

        assert_eq!(repo.get("kill_switch_triggered").await.unwrap(), None);
        repo.set("kill_switch_triggered", "true").await.unwrap();
        assert_eq!(
            repo.get("kill_switch_triggered").await.unwrap(),
            Some("true".to_string())
        );
    }
}
