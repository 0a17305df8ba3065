use crate::domain::signal::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Pending,
    Filling,
    Open,
    Closing,
    Closed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    SlHit,
    TrailingSl,
    KillSwitch,
    Manual,
    FillFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TPLevel {
    pub level: u8,
    pub price: Decimal,
    pub hit: bool,
    pub hit_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub slot_id: u32,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Option<Decimal>,
    pub qty: Option<Decimal>,
    pub entry_order_id: Option<String>,
    pub initial_sl_price: Option<Decimal>,
    pub current_sl_price: Option<Decimal>,
    pub tp_levels: Vec<TPLevel>,
    pub highest_tp_reached: u8,
    pub atr_value: Option<Decimal>,
    pub status: TradeStatus,
    pub pnl: Option<Decimal>,
    pub fees: Decimal,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    pub fill_attempts: u32,
}

impl Trade {
    pub fn new_pending(id: Uuid, slot_id: u32, symbol: impl Into<String>, side: Side) -> Self {
        Self {
            id,
            slot_id,
            symbol: symbol.into(),
            side,
            entry_price: None,
            qty: None,
            entry_order_id: None,
            initial_sl_price: None,
            current_sl_price: None,
            tp_levels: Vec::new(),
            highest_tp_reached: 0,
            atr_value: None,
            status: TradeStatus::Pending,
            pnl: None,
            fees: Decimal::ZERO,
            entry_time: None,
            exit_time: None,
            exit_reason: None,
            fill_attempts: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            TradeStatus::Pending | TradeStatus::Filling | TradeStatus::Open
        )
    }

    /// Records a TP-level hit and recomputes `highest_tp_reached`, which
    /// never decreases.
    pub fn mark_tp_hit(&mut self, level: u8, at: DateTime<Utc>) {
        if let Some(tp) = self.tp_levels.iter_mut().find(|t| t.level == level) {
            tp.hit = true;
            tp.hit_time = Some(at);
        }
        self.highest_tp_reached = self.highest_tp_reached.max(level);
    }

    /// Whether moving the current SL to `candidate` is a strictly
    /// favorable change (or the first arm, when there is none yet).
    pub fn sl_update_is_favorable(&self, candidate: Decimal) -> bool {
        match self.current_sl_price {
            None => true,
            Some(current) => match self.side {
                Side::Long => candidate > current,
                Side::Short => candidate < current,
            },
        }
    }

    pub fn exit_reason_for_position_close(&self) -> ExitReason {
        if self.highest_tp_reached >= 2 {
            ExitReason::TrailingSl
        } else {
            ExitReason::SlHit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sl_mono_rejects_regression_long() {
        let mut t = Trade::new_pending(Uuid::new_v4(), 1, "BTCUSDT", Side::Long);
        t.current_sl_price = Some(dec!(100));
        assert!(t.sl_update_is_favorable(dec!(101)));
        assert!(!t.sl_update_is_favorable(dec!(99)));
        assert!(!t.sl_update_is_favorable(dec!(100)));
    }

    #[test]
    fn sl_mono_rejects_regression_short() {
        let mut t = Trade::new_pending(Uuid::new_v4(), 1, "BTCUSDT", Side::Short);
        t.current_sl_price = Some(dec!(100));
        assert!(t.sl_update_is_favorable(dec!(99)));
        assert!(!t.sl_update_is_favorable(dec!(101)));
    }

    #[test]
    fn exit_reason_threshold() {
        let mut t = Trade::new_pending(Uuid::new_v4(), 1, "BTCUSDT", Side::Long);
        assert_eq!(t.exit_reason_for_position_close(), ExitReason::SlHit);
        t.highest_tp_reached = 1;
        assert_eq!(t.exit_reason_for_position_close(), ExitReason::SlHit);
        t.highest_tp_reached = 2;
        assert_eq!(t.exit_reason_for_position_close(), ExitReason::TrailingSl);
    }
}
