//! Per-trade SL/TP ladder, monotonic trailing, and mark-price checks.
//!
//! Deliberately callee-only: this component never reaches back into the
//! Slot Manager. `handle_trade_closed` returns the finalized [`Trade`] and
//! it is the Signal Engine's job to feed the net P&L into the Slot Manager.

use crate::domain::coin::CoinInfo;
use crate::domain::errors::EngineResult;
use crate::domain::ports::{ClosePnl, ExchangeRest};
use crate::domain::repositories::TradeRepository;
use crate::domain::rounding::round_to_tick;
use crate::domain::signal::Side;
use crate::domain::trade::{TPLevel, Trade, TradeStatus};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct RiskConfig {
    pub initial_sl_pct: Decimal,
    pub tp_levels: u8,
}

/// Fallback TP spacing when no ATR reading is available yet.
fn atr_spacing_fallback(entry: Decimal) -> Decimal {
    entry * Decimal::new(1, 2) // 1%
}

pub struct RiskManager {
    config: RiskConfig,
    repo: Arc<dyn TradeRepository>,
    active_by_id: HashMap<Uuid, Trade>,
    active_by_symbol: HashMap<String, Uuid>,
    active_by_order_id: HashMap<String, Uuid>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, repo: Arc<dyn TradeRepository>) -> Self {
        Self {
            config,
            repo,
            active_by_id: HashMap::new(),
            active_by_symbol: HashMap::new(),
            active_by_order_id: HashMap::new(),
        }
    }

    /// Rehydrates the in-memory active-trades map from persisted OPEN
    /// trades at restart.
    pub async fn load_active_trades(&mut self) -> EngineResult<()> {
        let open = self.repo.load_open().await?;
        for trade in open {
            self.register(trade);
        }
        Ok(())
    }

    fn register(&mut self, trade: Trade) {
        self.active_by_symbol
            .insert(trade.symbol.clone(), trade.id);
        if let Some(order_id) = trade.entry_order_id.clone() {
            self.active_by_order_id.insert(order_id, trade.id);
        }
        self.active_by_id.insert(trade.id, trade);
    }

    pub fn has_active_trade(&self, symbol: &str) -> bool {
        self.active_by_symbol.contains_key(symbol)
    }

    pub fn get(&self, id: Uuid) -> Option<&Trade> {
        self.active_by_id.get(&id)
    }

    fn initial_sl(side: Side, entry: Decimal, sl_pct: Decimal, tick: Decimal) -> Decimal {
        match side {
            // Tighter SL is acceptable; round toward the entry.
            Side::Long => round_to_tick(entry * (Decimal::ONE - sl_pct), tick, true),
            Side::Short => round_to_tick(entry * (Decimal::ONE + sl_pct), tick, false),
        }
    }

    fn tp_ladder(
        side: Side,
        entry: Decimal,
        spacing: Decimal,
        count: u8,
        tick: Decimal,
    ) -> Vec<TPLevel> {
        (1..=count)
            .map(|n| {
                let raw = match side {
                    Side::Long => entry + Decimal::from(n) * spacing,
                    Side::Short => entry - Decimal::from(n) * spacing,
                };
                // Round toward the entry so targets are easier to reach.
                let price = match side {
                    Side::Long => round_to_tick(raw, tick, false),
                    Side::Short => round_to_tick(raw, tick, true),
                };
                TPLevel {
                    level: n,
                    price,
                    hit: false,
                    hit_time: None,
                }
            })
            .collect()
    }

    /// Places the initial SL and computes the TP ladder for a freshly-filled
    /// trade. `trade` must already carry `entry_price`/`qty`/`entry_time`
    /// and status FILLING. On success the trade becomes OPEN and is
    /// registered in the active set. Failure to place the SL is a hard
    /// error: the caller must immediately market-close the position.
    pub async fn setup_trade_risk(
        &mut self,
        mut trade: Trade,
        current_atr: Option<Decimal>,
        coin: &CoinInfo,
        rest: &dyn ExchangeRest,
    ) -> EngineResult<Trade> {
        let entry = trade
            .entry_price
            .expect("setup_trade_risk requires a filled entry_price");

        let sl = Self::initial_sl(trade.side, entry, self.config.initial_sl_pct, coin.tick_size);
        let spacing = current_atr.unwrap_or_else(|| atr_spacing_fallback(entry));
        let tp_levels = Self::tp_ladder(
            trade.side,
            entry,
            spacing,
            self.config.tp_levels,
            coin.tick_size,
        );

        rest.set_trading_stop(&trade.symbol, sl).await?;

        trade.initial_sl_price = Some(sl);
        trade.current_sl_price = Some(sl);
        trade.atr_value = Some(spacing);
        trade.tp_levels = tp_levels;
        trade.status = TradeStatus::Open;

        self.repo.upsert(&trade).await?;
        self.register(trade.clone());
        info!(symbol = %trade.symbol, %sl, "risk armed");
        Ok(trade)
    }

    /// On every mark-price tick: marks hit TP levels, advances
    /// `highest_tp_reached`, and pushes a trailing SL update when the
    /// trailing policy yields a strictly favorable value.
    pub async fn check_price(
        &mut self,
        symbol: &str,
        mark_price: Decimal,
        rest: &dyn ExchangeRest,
    ) -> EngineResult<()> {
        let Some(&trade_id) = self.active_by_symbol.get(symbol) else {
            return Ok(());
        };
        let trade = self.active_by_id.get_mut(&trade_id).expect("registered");
        if trade.status != TradeStatus::Open {
            return Ok(());
        }

        let now = Utc::now();
        let mut newly_hit = trade.highest_tp_reached;
        for tp in trade.tp_levels.iter_mut().filter(|t| !t.hit) {
            let hit = match trade.side {
                Side::Long => mark_price >= tp.price,
                Side::Short => mark_price <= tp.price,
            };
            if hit {
                tp.hit = true;
                tp.hit_time = Some(now);
                newly_hit = newly_hit.max(tp.level);
            }
        }
        trade.highest_tp_reached = trade.highest_tp_reached.max(newly_hit);

        let candidate = match trade.highest_tp_reached {
            0 | 1 => trade.initial_sl_price,
            n => trade
                .tp_levels
                .iter()
                .find(|t| t.level == n - 1)
                .map(|t| t.price),
        };

        if let Some(candidate) = candidate
            && trade.sl_update_is_favorable(candidate)
        {
            match rest.set_trading_stop(symbol, candidate).await {
                Ok(()) => {
                    trade.current_sl_price = Some(candidate);
                    self.repo.upsert(trade).await?;
                    info!(symbol, %candidate, "trailing SL advanced");
                }
                Err(e) => {
                    warn!(symbol, error = %e, "trailing SL push failed, will retry next tick");
                }
            }
        } else {
            self.repo.upsert(trade).await?;
        }
        Ok(())
    }

    /// Accumulates execution fees into the trade that placed `order_id`.
    pub async fn accumulate_fee(&mut self, order_id: &str, fee: Decimal) -> EngineResult<()> {
        let Some(&trade_id) = self.active_by_order_id.get(order_id) else {
            return Ok(());
        };
        if let Some(trade) = self.active_by_id.get_mut(&trade_id) {
            trade.fees += fee;
            self.repo.upsert(trade).await?;
        }
        Ok(())
    }

    /// Finalizes a trade reported closed via a position update with size=0.
    /// `exit_reason` follows the TRAILING_SL/SL_HIT heuristic unless the
    /// caller overrides it (kill switch, manual).
    pub async fn handle_trade_closed(
        &mut self,
        symbol: &str,
        close: ClosePnl,
    ) -> EngineResult<Option<Trade>> {
        let Some(trade_id) = self.active_by_symbol.remove(symbol) else {
            return Ok(None);
        };
        let mut trade = self
            .active_by_id
            .remove(&trade_id)
            .expect("symbol index and id index must agree");
        if let Some(order_id) = &trade.entry_order_id {
            self.active_by_order_id.remove(order_id);
        }

        trade.status = TradeStatus::Closed;
        trade.exit_time = Some(close.closed_at);
        trade.exit_reason = Some(trade.exit_reason_for_position_close());
        trade.pnl = Some(close.pnl);

        self.repo.upsert(&trade).await?;
        info!(symbol, exit_reason = ?trade.exit_reason, pnl = %close.pnl, "trade closed");
        Ok(Some(trade))
    }

    /// Used by the kill switch: force-closes every active trade in memory
    /// with `exit_reason = KillSwitch`, without requiring a position update.
    pub async fn force_close_all(&mut self, at: chrono::DateTime<Utc>) -> EngineResult<Vec<Trade>> {
        let ids: Vec<Uuid> = self.active_by_id.keys().copied().collect();
        let mut closed = Vec::with_capacity(ids.len());
        for id in ids {
            let mut trade = self.active_by_id.remove(&id).expect("id from keys()");
            self.active_by_symbol.remove(&trade.symbol);
            if let Some(order_id) = &trade.entry_order_id {
                self.active_by_order_id.remove(order_id);
            }
            trade.status = TradeStatus::Closed;
            trade.exit_time = Some(at);
            trade.exit_reason = Some(crate::domain::trade::ExitReason::KillSwitch);
            self.repo.upsert(&trade).await?;
            closed.push(trade);
        }
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{
        InstrumentSpec, OpenOrder, OrderBookTop, PlaceOrderResponse, PositionSnapshot,
        TickerSnapshot,
    };
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct InMemoryTradeRepo {
        rows: Mutex<HashMap<Uuid, Trade>>,
    }

    #[async_trait]
    impl TradeRepository for InMemoryTradeRepo {
        async fn load_open(&self) -> EngineResult<Vec<Trade>> {
            Ok(self
                .rows
                .lock()
                .await
                .values()
                .filter(|t| t.is_active())
                .cloned()
                .collect())
        }
        async fn upsert(&self, trade: &Trade) -> EngineResult<()> {
            self.rows.lock().await.insert(trade.id, trade.clone());
            Ok(())
        }
        async fn find(&self, id: Uuid) -> EngineResult<Option<Trade>> {
            Ok(self.rows.lock().await.get(&id).cloned())
        }
    }

    struct FakeRest {
        reject_sl: bool,
    }

    #[async_trait]
    impl ExchangeRest for FakeRest {
        async fn get_tickers(&self) -> EngineResult<Vec<TickerSnapshot>> {
            Ok(vec![])
        }
        async fn get_instruments(&self) -> EngineResult<Vec<InstrumentSpec>> {
            Ok(vec![])
        }
        async fn get_klines(
            &self,
            _s: &str,
            _i: &str,
            _l: u32,
        ) -> EngineResult<Vec<crate::domain::candle::Candle>> {
            Ok(vec![])
        }
        async fn get_orderbook_top(&self, _s: &str) -> EngineResult<OrderBookTop> {
            Ok(OrderBookTop {
                best_bid: dec!(100),
                best_ask: dec!(100.1),
            })
        }
        async fn place_order(
            &self,
            _req: crate::domain::ports::PlaceOrderRequest,
        ) -> EngineResult<PlaceOrderResponse> {
            unimplemented!()
        }
        async fn cancel_order(&self, _s: &str, _o: &str) -> EngineResult<()> {
            Ok(())
        }
        async fn cancel_all_orders(&self, _s: &str) -> EngineResult<()> {
            Ok(())
        }
        async fn get_open_orders(&self, _s: &str) -> EngineResult<Vec<OpenOrder>> {
            Ok(vec![])
        }
        async fn set_trading_stop(&self, _symbol: &str, _sl_price: Decimal) -> EngineResult<()> {
            if self.reject_sl {
                Err(crate::domain::errors::EngineError::ExchangeBusiness {
                    action: "set-trading-stop".to_string(),
                    symbol: _symbol.to_string(),
                    ret_code: 10001,
                    msg: "rejected".to_string(),
                })
            } else {
                Ok(())
            }
        }
        async fn set_leverage(&self, _s: &str, _l: u32) -> EngineResult<()> {
            Ok(())
        }
        async fn get_positions(&self) -> EngineResult<Vec<PositionSnapshot>> {
            Ok(vec![])
        }
        async fn market_close(&self, _s: &str, _side: Side, _qty: Decimal) -> EngineResult<()> {
            Ok(())
        }
    }

    fn coin() -> CoinInfo {
        CoinInfo::new("BTCUSDT", "BTC", dec!(0), dec!(0.001), dec!(0.001), dec!(0.1))
    }

    fn filled_trade(side: Side, entry: Decimal) -> Trade {
        let mut t = Trade::new_pending(Uuid::new_v4(), 1, "BTCUSDT", side);
        t.entry_price = Some(entry);
        t.qty = Some(dec!(1));
        t.entry_order_id = Some("order-1".to_string());
        t.entry_time = Some(Utc::now());
        t.status = TradeStatus::Filling;
        t
    }

    #[tokio::test]
    async fn setup_trade_risk_happy_long() {
        let repo = Arc::new(InMemoryTradeRepo::default());
        let mut rm = RiskManager::new(
            RiskConfig {
                initial_sl_pct: dec!(0.025),
                tp_levels: 10,
            },
            repo,
        );
        let rest = FakeRest { reject_sl: false };
        let trade = rm
            .setup_trade_risk(filled_trade(Side::Long, dec!(100.0)), Some(dec!(0.4)), &coin(), &rest)
            .await
            .unwrap();

        assert_eq!(trade.initial_sl_price, Some(dec!(97.5)));
        assert_eq!(trade.tp_levels[0].price, dec!(100.4));
        assert!(rm.has_active_trade("BTCUSDT"));
    }

    #[tokio::test]
    async fn setup_trade_risk_propagates_sl_failure() {
        let repo = Arc::new(InMemoryTradeRepo::default());
        let mut rm = RiskManager::new(
            RiskConfig {
                initial_sl_pct: dec!(0.025),
                tp_levels: 10,
            },
            repo,
        );
        let rest = FakeRest { reject_sl: true };
        let result = rm
            .setup_trade_risk(filled_trade(Side::Long, dec!(100.0)), None, &coin(), &rest)
            .await;
        assert!(result.is_err());
        assert!(!rm.has_active_trade("BTCUSDT"));
    }

    #[tokio::test]
    async fn trailing_sl_follows_tp_progression() {
        let repo = Arc::new(InMemoryTradeRepo::default());
        let mut rm = RiskManager::new(
            RiskConfig {
                initial_sl_pct: dec!(0.025),
                tp_levels: 10,
            },
            repo,
        );
        let rest = FakeRest { reject_sl: false };
        rm.setup_trade_risk(filled_trade(Side::Long, dec!(100.0)), Some(dec!(1)), &coin(), &rest)
            .await
            .unwrap();

        // Cross TP2 (price 102): SL should advance to TP1 (101).
        rm.check_price("BTCUSDT", dec!(102), &rest).await.unwrap();
        let trade = rm.active_by_id.values().next().unwrap();
        assert_eq!(trade.highest_tp_reached, 2);
        assert_eq!(trade.current_sl_price, Some(dec!(101)));

        // Cross TP4 (price 104): SL should advance to TP3 (103).
        rm.check_price("BTCUSDT", dec!(104), &rest).await.unwrap();
        let trade = rm.active_by_id.values().next().unwrap();
        assert_eq!(trade.highest_tp_reached, 4);
        assert_eq!(trade.current_sl_price, Some(dec!(103)));
    }

    #[tokio::test]
    async fn handle_trade_closed_sets_trailing_exit_reason() {
        let repo = Arc::new(InMemoryTradeRepo::default());
        let mut rm = RiskManager::new(
            RiskConfig {
                initial_sl_pct: dec!(0.025),
                tp_levels: 10,
            },
            repo,
        );
        let rest = FakeRest { reject_sl: false };
        rm.setup_trade_risk(filled_trade(Side::Long, dec!(100.0)), Some(dec!(1)), &coin(), &rest)
            .await
            .unwrap();
        rm.check_price("BTCUSDT", dec!(102), &rest).await.unwrap();

        let closed = rm
            .handle_trade_closed(
                "BTCUSDT",
                ClosePnl {
                    pnl: dec!(2),
                    closed_at: Utc::now(),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            closed.exit_reason,
            Some(crate::domain::trade::ExitReason::TrailingSl)
        );
        assert!(!rm.has_active_trade("BTCUSDT"));
    }
}
