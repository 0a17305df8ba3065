//! Three-tier limit-order fill protocol: PostOnly join, PostOnly re-join,
//! then a crossing-allowed GTC limit as a last resort.

use crate::domain::coin::CoinInfo;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ports::{ExchangeRest, OrderStatus, PlaceOrderRequest, TimeInForce};
use crate::domain::rounding::{round_qty, round_to_tick};
use crate::domain::signal::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub fill_timeout_sec: u64,
    pub max_fill_retries: u32,
    pub post_only_retries: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            fill_timeout_sec: 15,
            max_fill_retries: 3,
            post_only_retries: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FillOutcome {
    pub entry_price: Decimal,
    pub qty: Decimal,
    pub entry_order_id: String,
    pub entry_time: DateTime<Utc>,
    /// Tiers consumed to reach a fill (1 if tier 0 filled, up to `max_fill_retries`).
    pub attempts_used: u32,
}

/// One of the three escalating tiers. Tier index also equals the
/// `fill_attempts` consumed so far when this tier is entered: a
/// PostOnly-reject retry does not consume a tier/attempt slot, it only
/// retries placement at the same tier.
fn tier_tif(tier: u32) -> TimeInForce {
    if tier < 2 {
        TimeInForce::PostOnly
    } else {
        TimeInForce::Gtc
    }
}

pub struct OrderExecutor {
    config: ExecutorConfig,
}

impl OrderExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Total tier attempts a failed `execute_entry` consumed before giving up.
    pub fn max_fill_retries(&self) -> u32 {
        self.config.max_fill_retries
    }

    fn pick_price(side: Side, book_bid: Decimal, book_ask: Decimal, tick: Decimal) -> Decimal {
        match side {
            Side::Long => round_to_tick(book_bid, tick, false),
            Side::Short => round_to_tick(book_ask, tick, true),
        }
    }

    /// Attempts to fill an entry order for `notional` quote value, escalating
    /// through the tier ladder. Returns `Err(FillTimeout)`-flavoured errors
    /// bubbled from the final exhausted tier; callers treat any `Err` here as
    /// a fill failure (trade -> CANCELLED, `exit_reason = FillFailed`).
    pub async fn execute_entry(
        &self,
        rest: &dyn ExchangeRest,
        symbol: &str,
        side: Side,
        notional: Decimal,
        coin: &CoinInfo,
    ) -> EngineResult<FillOutcome> {
        let mut last_err: Option<EngineError> = None;

        for tier in 0..self.config.max_fill_retries {
            let tif = tier_tif(tier);

            match self
                .attempt_tier(rest, symbol, side, notional, coin, tif, tier)
                .await
            {
                Ok(mut outcome) => {
                    outcome.attempts_used = tier + 1;
                    return Ok(outcome);
                }
                Err(e) => {
                    warn!(symbol, tier, error = %e, "fill tier exhausted, escalating");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| EngineError::FillTimeout {
            symbol: symbol.to_string(),
            tier: self.config.max_fill_retries.saturating_sub(1) as u8,
            waited_secs: self.config.fill_timeout_sec,
        }))
    }

    async fn attempt_tier(
        &self,
        rest: &dyn ExchangeRest,
        symbol: &str,
        side: Side,
        notional: Decimal,
        coin: &CoinInfo,
        tif: TimeInForce,
        tier: u32,
    ) -> EngineResult<FillOutcome> {
        let mut postonly_attempt = 0u32;

        let (order_id, price, qty) = loop {
            let book = rest.get_orderbook_top(symbol).await?;
            let price = Self::pick_price(side, book.best_bid, book.best_ask, coin.tick_size);
            let qty = round_qty(notional, price, coin.qty_step, coin.min_qty).ok_or_else(|| {
                EngineError::QtyBelowMinimum {
                    symbol: symbol.to_string(),
                    computed: notional / price,
                    min_qty: coin.min_qty,
                }
            })?;

            let resp = rest
                .place_order(PlaceOrderRequest {
                    symbol: symbol.to_string(),
                    side,
                    price,
                    qty,
                    tif,
                    reduce_only: false,
                })
                .await?;

            if resp.ret_code == 0 {
                break (resp.order_id, price, qty);
            }

            if tif == TimeInForce::PostOnly && postonly_attempt < self.config.post_only_retries {
                postonly_attempt += 1;
                warn!(
                    symbol,
                    tier,
                    postonly_attempt,
                    ret_code = resp.ret_code,
                    "postonly reject, retrying same tier"
                );
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            return Err(EngineError::PostOnlyReject {
                symbol: symbol.to_string(),
                tier: tier as u8,
                reason: resp.ret_msg,
            });
        };

        match self.poll_for_fill(rest, symbol, &order_id, tier).await {
            Ok(()) => Ok(FillOutcome {
                entry_price: price,
                qty,
                entry_order_id: order_id,
                entry_time: Utc::now(),
                attempts_used: 0, // filled in by execute_entry, which knows the tier index
            }),
            Err(e) => {
                let _ = rest.cancel_order(symbol, &order_id).await;
                Err(e)
            }
        }
    }

    /// Polls open-orders every ~1s up to `fill_timeout_sec`. Filled if the
    /// order reports `Filled` or has disappeared from the open-orders list;
    /// `Cancelled|Rejected|Deactivated` are not-filled.
    async fn poll_for_fill(
        &self,
        rest: &dyn ExchangeRest,
        symbol: &str,
        order_id: &str,
        tier: u32,
    ) -> EngineResult<()> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.fill_timeout_sec);

        loop {
            let open = rest.get_open_orders(symbol).await?;
            match open.iter().find(|o| o.order_id == order_id) {
                None => return Ok(()),
                Some(o) if o.status.is_filled() => return Ok(()),
                Some(o) if o.status.is_terminal_unfilled() => {
                    return Err(EngineError::FillTimeout {
                        symbol: symbol.to_string(),
                        tier: tier as u8,
                        waited_secs: self.config.fill_timeout_sec,
                    });
                }
                Some(_) if tokio::time::Instant::now() >= deadline => {
                    return Err(EngineError::FillTimeout {
                        symbol: symbol.to_string(),
                        tier: tier as u8,
                        waited_secs: self.config.fill_timeout_sec,
                    });
                }
                Some(_) => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Reduce-only market order for the full quantity; used by the kill
    /// switch and the emergency SL-placement-failed path.
    pub async fn market_close(
        &self,
        rest: &dyn ExchangeRest,
        symbol: &str,
        position_side: Side,
        qty: Decimal,
    ) -> EngineResult<()> {
        info!(symbol, %qty, "market-closing position");
        rest.market_close(symbol, position_side.opposite(), qty)
            .await
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
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn coin() -> CoinInfo {
        CoinInfo::new("BTCUSDT", "BTC", dec!(0), dec!(0.001), dec!(0.001), dec!(0.1))
    }

    struct FakeRest {
        place_calls: AtomicU32,
        fill_on_poll: u32,
        reject_tier1_postonly: bool,
        poll_calls: AtomicU32,
        open_orders: Mutex<Vec<OpenOrder>>,
    }

    impl Default for FakeRest {
        fn default() -> Self {
            Self {
                place_calls: AtomicU32::new(0),
                fill_on_poll: 1,
                reject_tier1_postonly: false,
                poll_calls: AtomicU32::new(0),
                open_orders: Mutex::new(Vec::new()),
            }
        }
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
            _symbol: &str,
            _interval: &str,
            _limit: u32,
        ) -> EngineResult<Vec<crate::domain::candle::Candle>> {
            Ok(vec![])
        }
        async fn get_orderbook_top(&self, _symbol: &str) -> EngineResult<OrderBookTop> {
            Ok(OrderBookTop {
                best_bid: dec!(100.0),
                best_ask: dec!(100.2),
            })
        }
        async fn place_order(
            &self,
            req: PlaceOrderRequest,
        ) -> EngineResult<PlaceOrderResponse> {
            let n = self.place_calls.fetch_add(1, Ordering::SeqCst);
            if self.reject_tier1_postonly && req.tif == TimeInForce::PostOnly && n == 0 {
                return Ok(PlaceOrderResponse {
                    order_id: String::new(),
                    ret_code: 110017,
                    ret_msg: "postonly would cross".to_string(),
                });
            }
            let id = format!("order-{n}");
            self.open_orders.lock().unwrap().push(OpenOrder {
                order_id: id.clone(),
                symbol: req.symbol.clone(),
                status: OrderStatus::New,
            });
            Ok(PlaceOrderResponse {
                order_id: id,
                ret_code: 0,
                ret_msg: "OK".to_string(),
            })
        }
        async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> EngineResult<()> {
            Ok(())
        }
        async fn cancel_all_orders(&self, _symbol: &str) -> EngineResult<()> {
            Ok(())
        }
        async fn get_open_orders(&self, _symbol: &str) -> EngineResult<Vec<OpenOrder>> {
            let n = self.poll_calls.fetch_add(1, Ordering::SeqCst);
            let mut orders = self.open_orders.lock().unwrap().clone();
            if n + 1 >= self.fill_on_poll {
                orders.clear();
            }
            Ok(orders)
        }
        async fn set_trading_stop(&self, _symbol: &str, _sl_price: Decimal) -> EngineResult<()> {
            Ok(())
        }
        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> EngineResult<()> {
            Ok(())
        }
        async fn get_positions(&self) -> EngineResult<Vec<PositionSnapshot>> {
            Ok(vec![])
        }
        async fn market_close(
            &self,
            _symbol: &str,
            _side: Side,
            _qty: Decimal,
        ) -> EngineResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn fills_on_tier_one_when_order_disappears() {
        let rest = FakeRest::default();
        let exec = OrderExecutor::new(ExecutorConfig {
            fill_timeout_sec: 2,
            ..Default::default()
        });
        let outcome = exec
            .execute_entry(&rest, "BTCUSDT", Side::Long, dec!(80), &coin())
            .await
            .unwrap();
        assert_eq!(outcome.entry_price, dec!(100.0));
        assert_eq!(outcome.qty, dec!(0.800));
    }

    #[tokio::test]
    async fn postonly_reject_retries_same_tier_without_escalating() {
        let rest = FakeRest {
            reject_tier1_postonly: true,
            ..Default::default()
        };
        let exec = OrderExecutor::new(ExecutorConfig {
            fill_timeout_sec: 2,
            post_only_retries: 2,
            ..Default::default()
        });
        let outcome = exec
            .execute_entry(&rest, "BTCUSDT", Side::Long, dec!(80), &coin())
            .await
            .unwrap();
        assert_eq!(outcome.qty, dec!(0.800));
        // one rejected place_order + one successful place_order on the same tier.
        assert_eq!(rest.place_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_tiers_timeout_is_fill_failure() {
        let rest = FakeRest {
            fill_on_poll: u32::MAX,
            ..Default::default()
        };
        let exec = OrderExecutor::new(ExecutorConfig {
            fill_timeout_sec: 1,
            max_fill_retries: 3,
            post_only_retries: 0,
        });
        let result = exec
            .execute_entry(&rest, "BTCUSDT", Side::Long, dec!(80), &coin())
            .await;
        assert!(result.is_err());
        // 3 tiers attempted, one place_order each.
        assert_eq!(rest.place_calls.load(Ordering::SeqCst), 3);
    }
}
