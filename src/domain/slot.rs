use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Available,
    Assigned,
    InTrade,
    Cooldown,
    Frozen,
}

/// An independent capital bucket. Slot ids are stable for the lifetime of
/// the process, numbered `1..=num_slots`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub id: u32,
    pub balance: Decimal,
    pub state: SlotState,
    pub current_symbol: Option<String>,
    pub current_trade_id: Option<Uuid>,
    pub total_trades: u64,
    pub total_pnl: Decimal,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl Slot {
    pub fn new(id: u32, initial_balance: Decimal) -> Self {
        Self {
            id,
            balance: initial_balance,
            state: SlotState::Available,
            current_symbol: None,
            current_trade_id: None,
            total_trades: 0,
            total_pnl: Decimal::ZERO,
            cooldown_until: None,
        }
    }

    /// `current_trade_id` is `Some` iff `state` is ASSIGNED or IN_TRADE.
    pub fn invariant_holds(&self) -> bool {
        let has_trade = self.current_trade_id.is_some();
        let in_assigned_states = matches!(self.state, SlotState::Assigned | SlotState::InTrade);
        has_trade == in_assigned_states
    }

    pub fn calculate_position_size(&self, leverage: u32) -> Decimal {
        self.balance * Decimal::from(leverage)
    }
}
