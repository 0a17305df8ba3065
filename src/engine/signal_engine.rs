//! Top-level WS topic dispatcher. Owns per-asset cooldowns, the per-window
//! flip debounce, and the live-4h candle cache, and orchestrates the HA/ATR
//! engines, Coin Selector, Slot Manager and Order Executor through the full
//! gate-to-risk-armed signal path.
//!
//! Deliberately does not own the Risk Manager — it is handed a `&mut
//! RiskManager` at the one call site that needs it (`process_signal`), while
//! the ticker/position/execution paths are driven directly by the
//! orchestrator against its own lock, independent of the signal-processing
//! critical section.

use crate::domain::candle::Candle;
use crate::domain::coin::CoinInfo;
use crate::domain::errors::EngineResult;
use crate::domain::ports::{ExchangeRest, Notifier};
use crate::domain::repositories::TradeRepository;
use crate::domain::signal::{Side, Signal};
use crate::domain::trade::{ExitReason, Trade, TradeStatus};
use crate::engine::atr::AtrEngine;
use crate::engine::coin_selector::CoinSelector;
use crate::engine::ha::HaEngine;
use crate::engine::order_executor::OrderExecutor;
use crate::engine::risk_manager::RiskManager;
use crate::engine::slot_manager::SlotManager;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SignalEngineConfig {
    pub cooldown_minutes: i64,
    pub dry_run: bool,
}

pub struct SignalEngine {
    config: SignalEngineConfig,
    ha: HaEngine,
    atr: AtrEngine,
    coin_selector: CoinSelector,
    slots: SlotManager,
    executor: OrderExecutor,
    trade_repo: Arc<dyn TradeRepository>,
    rest: Arc<dyn ExchangeRest>,
    notifier: Arc<dyn Notifier>,
    cooldowns: HashMap<String, DateTime<Utc>>,
    live_4h_cache: HashMap<String, Candle>,
    flip_acted: HashMap<String, i64>,
}

impl SignalEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SignalEngineConfig,
        atr_period: usize,
        coin_selector: CoinSelector,
        slots: SlotManager,
        executor: OrderExecutor,
        trade_repo: Arc<dyn TradeRepository>,
        rest: Arc<dyn ExchangeRest>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            ha: HaEngine::new(),
            atr: AtrEngine::new(atr_period),
            coin_selector,
            slots,
            executor,
            trade_repo,
            rest,
            notifier,
            cooldowns: HashMap::new(),
            live_4h_cache: HashMap::new(),
            flip_acted: HashMap::new(),
        }
    }

    pub fn slots(&self) -> &SlotManager {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut SlotManager {
        &mut self.slots
    }

    pub fn coin_selector(&self) -> &CoinSelector {
        &self.coin_selector
    }

    pub fn coin_selector_mut(&mut self) -> &mut CoinSelector {
        &mut self.coin_selector
    }

    /// Seeds per-symbol HA/ATR state from historical candles at boot.
    pub fn seed_history(&mut self, symbol: &str, ha_4h_history: &[Candle], atr_15m_history: &[Candle]) {
        self.ha.build_from_history(symbol, ha_4h_history);
        self.atr.initialize(symbol, atr_15m_history);
    }

    /// Rehydrates per-symbol cooldowns from the slot table at boot: a slot
    /// still in COOLDOWN retains the symbol that put it there.
    pub fn rehydrate_cooldowns(&mut self) {
        for slot in self.slots.all() {
            if slot.state == crate::domain::slot::SlotState::Cooldown
                && let (Some(symbol), Some(until)) = (&slot.current_symbol, slot.cooldown_until)
            {
                self.cooldowns.insert(symbol.clone(), until);
            }
        }
    }

    /// Drops all per-symbol state for a coin leaving the tracked universe.
    pub fn remove_symbol_state(&mut self, symbol: &str) {
        self.ha.remove_symbol(symbol);
        self.atr.remove_symbol(symbol);
        self.live_4h_cache.remove(symbol);
        self.flip_acted.remove(symbol);
        self.cooldowns.remove(symbol);
    }

    fn is_in_cooldown(&mut self, symbol: &str, now: DateTime<Utc>) -> bool {
        match self.cooldowns.get(symbol) {
            Some(until) if now < *until => true,
            Some(_) => {
                self.cooldowns.remove(symbol);
                false
            }
            None => false,
        }
    }

    /// 4h kline handler. Live candles refresh the cache and, only when a
    /// *new* window has begun, clear the flip-acted marker so a delayed
    /// confirm message cannot suppress the new window's signal. Confirmed
    /// candles feed the HA Engine and drop the live cache.
    pub fn on_kline_4h(&mut self, symbol: &str, candle: Candle) {
        if !candle.confirmed {
            let is_new_window = self
                .live_4h_cache
                .get(symbol)
                .map(|c| c.timestamp_ms != candle.timestamp_ms)
                .unwrap_or(true);
            self.live_4h_cache.insert(symbol.to_string(), candle);
            if is_new_window {
                self.flip_acted.remove(symbol);
            }
            return;
        }

        let _ = self.ha.update(symbol, &candle);
        self.flip_acted.remove(symbol);
        self.live_4h_cache.remove(symbol);
    }

    /// 15m kline handler: forwards confirmed candles to the ATR Engine.
    pub fn on_kline_15m(&mut self, symbol: &str, candle: Candle) {
        if candle.confirmed {
            self.atr.update(symbol, candle);
        }
    }

    /// 5m kline handler (confirmed only): evaluates the cached live 4h
    /// candle and debounces at most one signal per (symbol, window).
    pub fn on_kline_5m(&mut self, symbol: &str, candle: Candle) -> Option<Signal> {
        if !candle.confirmed {
            return None;
        }
        let live = self.live_4h_cache.get(symbol)?;
        let (_, signal) = self.ha.calc_live(symbol, live)?;
        let signal = signal?;

        let window_start = live.timestamp_ms;
        if self.flip_acted.get(symbol) == Some(&window_start) {
            return None;
        }
        self.flip_acted.insert(symbol.to_string(), window_start);
        Some(signal)
    }

    /// The full gate-to-risk-armed critical section. Serialized by the
    /// caller holding this `SignalEngine`'s lock for the duration.
    pub async fn process_signal(
        &mut self,
        signal: Signal,
        risk: &mut RiskManager,
    ) -> EngineResult<()> {
        let now = Utc::now();
        let symbol = signal.symbol.clone();

        if self.is_in_cooldown(&symbol, now) {
            info!(symbol, "signal rejected: symbol in cooldown");
            return Ok(());
        }
        if self.coin_selector.is_in_trade(&symbol) {
            info!(symbol, "signal rejected: symbol already has an active trade");
            return Ok(());
        }
        if self.slots.count_available() == 0 {
            info!(symbol, "signal rejected: no slot available");
            return Ok(());
        }
        let Some(coin) = self.coin_selector.get(&symbol).cloned() else {
            info!(symbol, "signal rejected: symbol not in tracked universe");
            return Ok(());
        };

        if self.config.dry_run {
            self.notifier
                .send(&format!(
                    "[DRY RUN] would open {} {symbol} on flip signal",
                    signal.side
                ))
                .await;
            return Ok(());
        }

        let trade_id = uuid::Uuid::new_v4();
        let slot_id = self.slots.assign(trade_id, &symbol).await?;
        self.coin_selector.mark_in_trade(&symbol, true);

        let mut trade = Trade::new_pending(trade_id, slot_id, symbol.clone(), signal.side);

        if let Err(e) = self.rest.set_leverage(&symbol, self.slots.leverage()).await {
            warn!(symbol, error = %e, "set_leverage failed, continuing with existing leverage");
        }

        let notional = self
            .slots
            .get(slot_id)
            .expect("slot just assigned")
            .calculate_position_size(self.slots.leverage());

        trade.status = TradeStatus::Filling;
        self.trade_repo.upsert(&trade).await?;

        match self
            .executor
            .execute_entry(self.rest.as_ref(), &symbol, signal.side, notional, &coin)
            .await
        {
            Err(e) => {
                warn!(symbol, error = %e, "entry fill failed on all tiers");
                trade.status = TradeStatus::Cancelled;
                trade.exit_reason = Some(ExitReason::FillFailed);
                trade.fill_attempts = self.executor.max_fill_retries();
                self.trade_repo.upsert(&trade).await?;
                self.slots.release_slot(slot_id).await?;
                self.coin_selector.mark_in_trade(&symbol, false);
                self.notifier
                    .send(&format!("{symbol}: entry fill failed, trade cancelled"))
                    .await;
                Ok(())
            }
            Ok(fill) => {
                trade.entry_price = Some(fill.entry_price);
                trade.qty = Some(fill.qty);
                trade.entry_order_id = Some(fill.entry_order_id.clone());
                trade.entry_time = Some(fill.entry_time);
                trade.fill_attempts = fill.attempts_used;
                trade.status = TradeStatus::Open;
                self.trade_repo.upsert(&trade).await?;
                self.slots.mark_in_trade(slot_id).await?;

                let current_atr = self.atr.atr(&symbol);
                match risk
                    .setup_trade_risk(trade, current_atr, &coin, self.rest.as_ref())
                    .await
                {
                    Ok(_armed) => {
                        self.notifier
                            .send(&format!(
                                "{symbol}: {} opened, entry={}, qty={}",
                                signal.side, fill.entry_price, fill.qty
                            ))
                            .await;
                        Ok(())
                    }
                    Err(e) => {
                        error!(symbol, error = %e, "SL placement failed after fill, emergency market-close");
                        if let Err(close_err) = self
                            .executor
                            .market_close(self.rest.as_ref(), &symbol, signal.side, fill.qty)
                            .await
                        {
                            error!(symbol, error = %close_err, "emergency market-close also failed");
                        }
                        self.slots.release_slot(slot_id).await?;
                        self.coin_selector.mark_in_trade(&symbol, false);
                        self.notifier
                            .send_bot_status(&format!(
                                "CRITICAL: {symbol} SL placement failed after fill; position force-closed"
                            ))
                            .await;
                        Ok(())
                    }
                }
            }
        }
    }

    /// Post-close bookkeeping: compounds the slot balance, clears the
    /// coin's in-trade flag, and arms the per-symbol cooldown. Called by
    /// the orchestrator after `RiskManager::handle_trade_closed` returns a
    /// finalized trade.
    pub async fn on_trade_closed(&mut self, trade: &Trade) -> EngineResult<()> {
        let now = Utc::now();
        self.slots
            .complete_trade(trade.slot_id, trade.pnl.unwrap_or(Decimal::ZERO), trade.fees, now)
            .await?;
        self.coin_selector.mark_in_trade(&trade.symbol, false);
        self.cooldowns.insert(
            trade.symbol.clone(),
            now + ChronoDuration::minutes(self.config.cooldown_minutes),
        );
        Ok(())
    }

    /// Releases any slot cooldown whose timer has expired (called
    /// periodically, or at minimum before every gate evaluation).
    pub async fn release_expired_cooldowns(&mut self) -> EngineResult<()> {
        self.slots.release_expired_cooldowns(Utc::now()).await
    }

    pub fn get_coin(&self, symbol: &str) -> Option<&CoinInfo> {
        self.coin_selector.get(symbol)
    }

    pub fn atr_of(&self, symbol: &str) -> Option<Decimal> {
        self.atr.atr(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use crate::domain::ports::{
        InstrumentSpec, OpenOrder, OrderBookTop, PlaceOrderRequest, PlaceOrderResponse,
        PositionSnapshot, TickerSnapshot,
    };
    use crate::domain::repositories::SlotRepository;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct InMemorySlotRepo {
        rows: Mutex<Vec<crate::domain::slot::Slot>>,
    }
    #[async_trait]
    impl SlotRepository for InMemorySlotRepo {
        async fn load_all(&self) -> EngineResult<Vec<crate::domain::slot::Slot>> {
            Ok(self.rows.lock().await.clone())
        }
        async fn upsert(&self, slot: &crate::domain::slot::Slot) -> EngineResult<()> {
            let mut rows = self.rows.lock().await;
            if let Some(existing) = rows.iter_mut().find(|s| s.id == slot.id) {
                *existing = slot.clone();
            } else {
                rows.push(slot.clone());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct InMemoryTradeRepo {
        rows: Mutex<HashMap<uuid::Uuid, Trade>>,
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
        async fn find(&self, id: uuid::Uuid) -> EngineResult<Option<Trade>> {
            Ok(self.rows.lock().await.get(&id).cloned())
        }
    }

    struct FakeRest;
    #[async_trait]
    impl ExchangeRest for FakeRest {
        async fn get_tickers(&self) -> EngineResult<Vec<TickerSnapshot>> {
            Ok(vec![])
        }
        async fn get_instruments(&self) -> EngineResult<Vec<InstrumentSpec>> {
            Ok(vec![])
        }
        async fn get_klines(&self, _s: &str, _i: &str, _l: u32) -> EngineResult<Vec<Candle>> {
            Ok(vec![])
        }
        async fn get_orderbook_top(&self, _s: &str) -> EngineResult<OrderBookTop> {
            Ok(OrderBookTop {
                best_bid: dec!(100.0),
                best_ask: dec!(100.1),
            })
        }
        async fn place_order(&self, _req: PlaceOrderRequest) -> EngineResult<PlaceOrderResponse> {
            Ok(PlaceOrderResponse {
                order_id: "order-1".to_string(),
                ret_code: 0,
                ret_msg: "OK".to_string(),
            })
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
        async fn set_trading_stop(&self, _s: &str, _p: Decimal) -> EngineResult<()> {
            Ok(())
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

    struct NoopNotifier;
    #[async_trait]
    impl Notifier for NoopNotifier {
        async fn send(&self, _text: &str) {}
        async fn send_bot_status(&self, _text: &str) {}
        async fn send_daily_summary(&self, _text: &str) {}
    }

    fn candle(ts: i64, confirmed: bool) -> Candle {
        Candle {
            timestamp_ms: ts,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(0),
            confirmed,
        }
    }

    async fn engine_with_one_coin() -> SignalEngine {
        let mut selector = CoinSelector::new(20, vec![]);
        // seed universe via internal refresh against a fake rest that returns one symbol
        struct SeedRest;
        #[async_trait]
        impl ExchangeRest for SeedRest {
            async fn get_tickers(&self) -> EngineResult<Vec<TickerSnapshot>> {
                Ok(vec![TickerSnapshot {
                    symbol: "BTCUSDT".to_string(),
                    turnover_24h: dec!(1000000),
                }])
            }
            async fn get_instruments(&self) -> EngineResult<Vec<InstrumentSpec>> {
                Ok(vec![InstrumentSpec {
                    symbol: "BTCUSDT".to_string(),
                    base_asset: "BTC".to_string(),
                    min_qty: dec!(0.001),
                    qty_step: dec!(0.001),
                    tick_size: dec!(0.1),
                }])
            }
            async fn get_klines(&self, _s: &str, _i: &str, _l: u32) -> EngineResult<Vec<Candle>> {
                Ok(vec![])
            }
            async fn get_orderbook_top(&self, _s: &str) -> EngineResult<OrderBookTop> {
                unimplemented!()
            }
            async fn place_order(
                &self,
                _r: PlaceOrderRequest,
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
            async fn set_trading_stop(&self, _s: &str, _p: Decimal) -> EngineResult<()> {
                Ok(())
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
        selector.refresh(&SeedRest).await.unwrap();

        let mut slots = SlotManager::new(8, dec!(5), 30, Arc::new(InMemorySlotRepo::default()));
        slots.initialize(8, dec!(10)).await.unwrap();

        SignalEngine::new(
            SignalEngineConfig {
                cooldown_minutes: 30,
                dry_run: false,
            },
            14,
            selector,
            slots,
            OrderExecutor::new(Default::default()),
            Arc::new(InMemoryTradeRepo::default()),
            Arc::new(FakeRest),
            Arc::new(NoopNotifier),
        )
    }

    #[tokio::test]
    async fn flip_acted_resets_on_new_window_but_not_same_window() {
        let mut engine = engine_with_one_coin().await;
        engine.on_kline_4h("BTCUSDT", candle(0, false));
        engine.flip_acted.insert("BTCUSDT".to_string(), 0);

        // Same window live update must not clear the marker.
        engine.on_kline_4h("BTCUSDT", candle(0, false));
        assert_eq!(engine.flip_acted.get("BTCUSDT"), Some(&0));

        // A new window's live update clears it.
        engine.on_kline_4h("BTCUSDT", candle(14_400_000, false));
        assert_eq!(engine.flip_acted.get("BTCUSDT"), None);
    }

    #[tokio::test]
    async fn gate_rejects_cooldown_symbol() {
        let mut engine = engine_with_one_coin().await;
        engine
            .cooldowns
            .insert("BTCUSDT".to_string(), Utc::now() + ChronoDuration::minutes(5));

        let mut risk = RiskManager::new(
            crate::engine::risk_manager::RiskConfig {
                initial_sl_pct: dec!(0.025),
                tp_levels: 10,
            },
            Arc::new(InMemoryTradeRepo::default()),
        );

        let signal = Signal {
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            detected_at: Utc::now(),
            ha_candle: crate::domain::candle::HACandle {
                timestamp_ms: 0,
                ha_open: dec!(100),
                ha_close: dec!(101),
                ha_high: dec!(101),
                ha_low: dec!(100),
            },
        };
        engine.process_signal(signal, &mut risk).await.unwrap();
        assert_eq!(engine.slots().count_available(), 8);
    }

    #[tokio::test]
    async fn happy_path_reserves_slot_and_arms_risk() {
        let mut engine = engine_with_one_coin().await;
        let mut risk = RiskManager::new(
            crate::engine::risk_manager::RiskConfig {
                initial_sl_pct: dec!(0.025),
                tp_levels: 10,
            },
            Arc::new(InMemoryTradeRepo::default()),
        );

        let signal = Signal {
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            detected_at: Utc::now(),
            ha_candle: crate::domain::candle::HACandle {
                timestamp_ms: 0,
                ha_open: dec!(100),
                ha_close: dec!(101),
                ha_high: dec!(101),
                ha_low: dec!(100),
            },
        };
        engine.process_signal(signal, &mut risk).await.unwrap();
        assert_eq!(engine.slots().count_available(), 7);
        assert!(risk.has_active_trade("BTCUSDT"));
    }
}
