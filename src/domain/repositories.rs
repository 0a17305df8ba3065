use crate::domain::errors::EngineResult;
use crate::domain::slot::Slot;
use crate::domain::trade::Trade;
use async_trait::async_trait;
use uuid::Uuid;

/// CRUD contract for the slot table. All decimals round-trip through the
/// adapter as exact values (stored as strings in the SQLite adapter).
#[async_trait]
pub trait SlotRepository: Send + Sync {
    async fn load_all(&self) -> EngineResult<Vec<Slot>>;
    async fn upsert(&self, slot: &Slot) -> EngineResult<()>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn load_open(&self) -> EngineResult<Vec<Trade>>;
    async fn upsert(&self, trade: &Trade) -> EngineResult<()>;
    async fn find(&self, id: Uuid) -> EngineResult<Option<Trade>>;
}

/// Single-key bot-wide flags (notably `kill_switch_triggered`).
#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn get(&self, key: &str) -> EngineResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> EngineResult<()>;
}
