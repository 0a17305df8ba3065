use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::repositories::SlotRepository;
use crate::domain::slot::{Slot, SlotState};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// Read-only reporting snapshot consumed by the startup notification and the
/// daily summary loop.
#[derive(Debug, Clone)]
pub struct SlotStatusSummary {
    pub num_slots: usize,
    pub available: usize,
    pub in_trade: usize,
    pub cooldown: usize,
    pub frozen: usize,
    pub total_balance: Decimal,
    pub total_pnl: Decimal,
}

/// 8 independent-balance slot state machines. Every transition is also
/// persisted through `repo` so a restart never loses slot state.
pub struct SlotManager {
    slots: Vec<Slot>,
    leverage: u32,
    min_balance: Decimal,
    cooldown_minutes: i64,
    repo: Arc<dyn SlotRepository>,
}

impl SlotManager {
    pub fn new(
        leverage: u32,
        min_balance: Decimal,
        cooldown_minutes: i64,
        repo: Arc<dyn SlotRepository>,
    ) -> Self {
        Self {
            slots: Vec::new(),
            leverage,
            min_balance,
            cooldown_minutes,
            repo,
        }
    }

    /// Creates `num_slots` slots at `initial_balance`, rehydrating any
    /// persisted row in place of the fresh default (the persisted store is
    /// authoritative across restarts).
    pub async fn initialize(&mut self, num_slots: u32, initial_balance: Decimal) -> EngineResult<()> {
        let persisted = self.repo.load_all().await?;

        self.slots = (1..=num_slots)
            .map(|id| {
                persisted
                    .iter()
                    .find(|s| s.id == id)
                    .cloned()
                    .unwrap_or_else(|| Slot::new(id, initial_balance))
            })
            .collect();

        for slot in &self.slots {
            self.repo.upsert(slot).await?;
        }
        Ok(())
    }

    pub fn leverage(&self) -> u32 {
        self.leverage
    }

    pub fn all(&self) -> &[Slot] {
        &self.slots
    }

    pub fn get(&self, id: u32) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: u32) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.id == id)
    }

    pub fn count_available(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Available)
            .count()
    }

    pub fn count_in_trade(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::InTrade)
            .count()
    }

    pub fn get_total_balance(&self) -> Decimal {
        self.slots.iter().map(|s| s.balance).sum()
    }

    pub fn get_status_summary(&self) -> SlotStatusSummary {
        let mut summary = SlotStatusSummary {
            num_slots: self.slots.len(),
            available: 0,
            in_trade: 0,
            cooldown: 0,
            frozen: 0,
            total_balance: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
        };
        for slot in &self.slots {
            summary.total_balance += slot.balance;
            summary.total_pnl += slot.total_pnl;
            match slot.state {
                SlotState::Available => summary.available += 1,
                SlotState::InTrade | SlotState::Assigned => summary.in_trade += 1,
                SlotState::Cooldown => summary.cooldown += 1,
                SlotState::Frozen => summary.frozen += 1,
            }
        }
        summary
    }

    /// Releases any COOLDOWN slot whose timer has expired back to AVAILABLE.
    /// Cooldowns are not spawned tasks: this is called on every gate
    /// evaluation so a restart never loses an in-flight cooldown.
    pub async fn release_expired_cooldowns(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        let expired_ids: Vec<u32> = self
            .slots
            .iter()
            .filter(|s| {
                s.state == SlotState::Cooldown
                    && s.cooldown_until.is_some_and(|until| now >= until)
            })
            .map(|s| s.id)
            .collect();

        for id in expired_ids {
            if let Some(slot) = self.get_mut(id) {
                slot.state = SlotState::Available;
                slot.cooldown_until = None;
                self.repo.upsert(slot).await?;
            }
        }
        Ok(())
    }

    /// Reserves the lowest-id AVAILABLE slot for `symbol`/`trade_id`.
    pub async fn assign(&mut self, trade_id: uuid::Uuid, symbol: &str) -> EngineResult<u32> {
        let id = self
            .slots
            .iter()
            .filter(|s| s.state == SlotState::Available)
            .map(|s| s.id)
            .min()
            .ok_or(EngineError::NoSlotAvailable)?;

        let slot = self.get_mut(id).expect("id came from self.slots");
        slot.state = SlotState::Assigned;
        slot.current_symbol = Some(symbol.to_string());
        slot.current_trade_id = Some(trade_id);
        debug_assert!(slot.invariant_holds());
        self.repo.upsert(slot).await?;
        Ok(id)
    }

    /// ASSIGNED -> IN_TRADE on fill.
    pub async fn mark_in_trade(&mut self, id: u32) -> EngineResult<()> {
        let slot = self
            .get_mut(id)
            .ok_or_else(|| EngineError::InvariantViolation(format!("no such slot {id}")))?;
        if slot.state != SlotState::Assigned {
            return Err(EngineError::InvariantViolation(format!(
                "slot {id} mark_in_trade from non-ASSIGNED state {:?}",
                slot.state
            )));
        }
        slot.state = SlotState::InTrade;
        self.repo.upsert(slot).await?;
        Ok(())
    }

    /// `net = pnl - fees`; compounds into balance; transitions to FROZEN if
    /// the resulting balance drops below `min_balance`, else COOLDOWN.
    pub async fn complete_trade(
        &mut self,
        id: u32,
        pnl: Decimal,
        fees: Decimal,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let cooldown_minutes = self.cooldown_minutes;
        let min_balance = self.min_balance;
        let slot = self
            .get_mut(id)
            .ok_or_else(|| EngineError::InvariantViolation(format!("no such slot {id}")))?;

        let net = pnl - fees;
        slot.balance += net;
        slot.total_trades += 1;
        slot.total_pnl += net;
        slot.current_trade_id = None;
        // current_symbol is retained through COOLDOWN/FROZEN so the Signal
        // Engine can rehydrate its per-symbol cooldown table from the slot
        // table alone on restart (see SignalEngine::rehydrate_cooldowns).

        if slot.balance < min_balance {
            slot.state = SlotState::Frozen;
            slot.cooldown_until = None;
            warn!(slot_id = id, balance = %slot.balance, "slot frozen below min_balance");
        } else {
            slot.state = SlotState::Cooldown;
            slot.cooldown_until = Some(now + ChronoDuration::minutes(cooldown_minutes));
        }
        debug_assert!(slot.invariant_holds());
        self.repo.upsert(slot).await?;
        Ok(())
    }

    /// Fill-failed path: returns an ASSIGNED slot to AVAILABLE with no
    /// balance change and no cooldown.
    pub async fn release_slot(&mut self, id: u32) -> EngineResult<()> {
        let slot = self
            .get_mut(id)
            .ok_or_else(|| EngineError::InvariantViolation(format!("no such slot {id}")))?;
        slot.state = SlotState::Available;
        slot.current_symbol = None;
        slot.current_trade_id = None;
        slot.cooldown_until = None;
        debug_assert!(slot.invariant_holds());
        self.repo.upsert(slot).await?;
        info!(slot_id = id, "slot released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repositories::SlotRepository;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct InMemorySlotRepo {
        rows: Mutex<Vec<Slot>>,
    }

    #[async_trait]
    impl SlotRepository for InMemorySlotRepo {
        async fn load_all(&self) -> EngineResult<Vec<Slot>> {
            Ok(self.rows.lock().await.clone())
        }

        async fn upsert(&self, slot: &Slot) -> EngineResult<()> {
            let mut rows = self.rows.lock().await;
            if let Some(existing) = rows.iter_mut().find(|s| s.id == slot.id) {
                *existing = slot.clone();
            } else {
                rows.push(slot.clone());
            }
            Ok(())
        }
    }

    async fn new_manager() -> SlotManager {
        let repo = Arc::new(InMemorySlotRepo::default());
        let mut mgr = SlotManager::new(8, dec!(5), 30, repo);
        mgr.initialize(8, dec!(10)).await.unwrap();
        mgr
    }

    #[tokio::test]
    async fn assign_picks_lowest_id() {
        let mut mgr = new_manager().await;
        let id = mgr.assign(uuid::Uuid::new_v4(), "BTCUSDT").await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(mgr.count_available(), 7);
    }

    #[tokio::test]
    async fn freeze_below_min_balance() {
        let mut mgr = new_manager().await;
        let trade_id = uuid::Uuid::new_v4();
        let id = mgr.assign(trade_id, "BTCUSDT").await.unwrap();
        mgr.mark_in_trade(id).await.unwrap();
        mgr.complete_trade(id, dec!(-2), dec!(0), Utc::now())
            .await
            .unwrap();
        assert_eq!(mgr.get(id).unwrap().state, SlotState::Frozen);
        assert_eq!(mgr.get(id).unwrap().balance, dec!(4));
    }

    #[tokio::test]
    async fn cooldown_then_release() {
        let mut mgr = new_manager().await;
        let id = mgr.assign(uuid::Uuid::new_v4(), "BTCUSDT").await.unwrap();
        mgr.mark_in_trade(id).await.unwrap();
        let now = Utc::now();
        mgr.complete_trade(id, dec!(2), dec!(0), now).await.unwrap();
        assert_eq!(mgr.get(id).unwrap().state, SlotState::Cooldown);

        mgr.release_expired_cooldowns(now).await.unwrap();
        assert_eq!(mgr.get(id).unwrap().state, SlotState::Cooldown);

        mgr.release_expired_cooldowns(now + ChronoDuration::minutes(31))
            .await
            .unwrap();
        assert_eq!(mgr.get(id).unwrap().state, SlotState::Available);
    }

    #[tokio::test]
    async fn release_slot_on_fill_failure_keeps_balance() {
        let mut mgr = new_manager().await;
        let id = mgr.assign(uuid::Uuid::new_v4(), "BTCUSDT").await.unwrap();
        mgr.release_slot(id).await.unwrap();
        assert_eq!(mgr.get(id).unwrap().state, SlotState::Available);
        assert_eq!(mgr.get(id).unwrap().balance, dec!(10));
    }
}
