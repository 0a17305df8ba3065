//! Trait seams between the engine core and its external collaborators.
//!
//! Every port here is a narrow, typed capability — the translation from
//! raw exchange JSON into these types happens entirely inside the
//! infrastructure adapters implementing them.

use crate::domain::candle::Candle;
use crate::domain::errors::EngineResult;
use crate::domain::signal::Side;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    PostOnly,
    Gtc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Deactivated,
}

impl OrderStatus {
    pub fn is_filled(self) -> bool {
        matches!(self, OrderStatus::Filled)
    }

    pub fn is_terminal_unfilled(self) -> bool {
        matches!(
            self,
            OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Deactivated
        )
    }
}

#[derive(Debug, Clone)]
pub struct TickerSnapshot {
    pub symbol: String,
    pub turnover_24h: Decimal,
}

#[derive(Debug, Clone)]
pub struct InstrumentSpec {
    pub symbol: String,
    pub base_asset: String,
    pub min_qty: Decimal,
    pub qty_step: Decimal,
    pub tick_size: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderBookTop {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub tif: TimeInForce,
    pub reduce_only: bool,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderResponse {
    pub order_id: String,
    pub ret_code: i64,
    pub ret_msg: String,
}

#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub status: OrderStatus,
}

#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub unrealised_pnl: Decimal,
    pub cum_realised_pnl: Decimal,
}

/// The exchange REST transport. Out of scope as an independently specified
/// subsystem (its business semantics are the exchange's API contract) but
/// given a concrete, typed seam here so the engine core never touches JSON.
#[async_trait]
pub trait ExchangeRest: Send + Sync {
    async fn get_tickers(&self) -> EngineResult<Vec<TickerSnapshot>>;
    async fn get_instruments(&self) -> EngineResult<Vec<InstrumentSpec>>;
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32)
    -> EngineResult<Vec<Candle>>;
    async fn get_orderbook_top(&self, symbol: &str) -> EngineResult<OrderBookTop>;
    async fn place_order(&self, req: PlaceOrderRequest) -> EngineResult<PlaceOrderResponse>;
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> EngineResult<()>;
    async fn cancel_all_orders(&self, symbol: &str) -> EngineResult<()>;
    async fn get_open_orders(&self, symbol: &str) -> EngineResult<Vec<OpenOrder>>;
    async fn set_trading_stop(&self, symbol: &str, sl_price: Decimal) -> EngineResult<()>;
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> EngineResult<()>;
    async fn get_positions(&self) -> EngineResult<Vec<PositionSnapshot>>;
    /// Places a reduce-only market order. `side` is the side of the order to
    /// place, i.e. already the opposite of the position being closed.
    async fn market_close(&self, symbol: &str, side: Side, qty: Decimal) -> EngineResult<()>;
}

/// A topic-typed event translated from the exchange's WS push stream.
#[derive(Debug, Clone)]
pub enum Event {
    Kline4h { symbol: String, candle: Candle },
    Kline5m { symbol: String, candle: Candle },
    Kline15m { symbol: String, candle: Candle },
    Ticker { symbol: String, mark_price: Decimal },
    Position { snapshot: PositionSnapshot },
    Execution { order_id: String, fee: Decimal },
}

/// The exchange WS transport: a topic-subscribed push stream, fanned out
/// as typed [`Event`]s.
#[async_trait]
pub trait ExchangeStream: Send + Sync {
    async fn subscribe_symbols(&self, symbols: &[String]) -> EngineResult<()>;
    async fn unsubscribe_symbols(&self, symbols: &[String]) -> EngineResult<()>;
    fn events(&self) -> tokio::sync::broadcast::Receiver<Event>;
}

/// Fire-and-forget human-readable sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
    async fn send_bot_status(&self, text: &str);
    async fn send_daily_summary(&self, text: &str);
}

#[derive(Debug, Clone, Copy)]
pub struct ClosePnl {
    pub pnl: Decimal,
    pub closed_at: DateTime<Utc>,
}
