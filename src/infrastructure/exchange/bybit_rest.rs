//! Bybit V5 REST transport. Every private call is signed with
//! HMAC-SHA256 over `timestamp + api_key + recv_window + payload`.

use crate::domain::candle::Candle;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ports::{
    ExchangeRest, InstrumentSpec, OpenOrder, OrderBookTop, OrderStatus, PlaceOrderRequest,
    PlaceOrderResponse, PositionSnapshot, TickerSnapshot,
};
use crate::domain::signal::Side;
use crate::infrastructure::http_client_factory::build_client;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::Sha256;
use std::str::FromStr;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

const CATEGORY: &str = "linear";

pub struct BybitRest {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: String,
    recv_window_ms: u64,
}

impl BybitRest {
    pub fn new(api_key: String, api_secret: String, base_url: String, recv_window_ms: u64) -> Self {
        Self {
            client: build_client(),
            api_key,
            api_secret,
            base_url,
            recv_window_ms,
        }
    }

    fn sign(&self, timestamp: i64, payload: &str) -> String {
        let prefix = format!("{timestamp}{}{}", self.api_key, self.recv_window_ms);
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(prefix.as_bytes());
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn signed_get(&self, path: &str, query: &str) -> EngineResult<Value> {
        let timestamp = Utc::now().timestamp_millis();
        let signature = self.sign(timestamp, query);
        let url = if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        };

        let response = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.recv_window_ms.to_string())
            .header("X-BAPI-SIGN", signature)
            .send()
            .await
            .map_err(|e| EngineError::Transport {
                endpoint: path.to_string(),
                reason: e.to_string(),
            })?;

        Self::parse_envelope(path, response).await
    }

    async fn signed_post(&self, path: &str, body: &Value) -> EngineResult<Value> {
        let timestamp = Utc::now().timestamp_millis();
        let payload = body.to_string();
        let signature = self.sign(timestamp, &payload);
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.recv_window_ms.to_string())
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| EngineError::Transport {
                endpoint: path.to_string(),
                reason: e.to_string(),
            })?;

        Self::parse_envelope(path, response).await
    }

    async fn parse_envelope(path: &str, response: reqwest::Response) -> EngineResult<Value> {
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| EngineError::Transport {
            endpoint: path.to_string(),
            reason: format!("invalid JSON response: {e}"),
        })?;

        if !status.is_success() {
            return Err(EngineError::Transport {
                endpoint: path.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let ret_code = body.get("retCode").and_then(Value::as_i64).unwrap_or(0);
        if ret_code != 0 {
            let msg = body
                .get("retMsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(EngineError::ExchangeBusiness {
                action: path.to_string(),
                symbol: String::new(),
                ret_code,
                msg,
            });
        }

        Ok(body)
    }

    fn parse_decimal(v: &Value, field: &str) -> EngineResult<Decimal> {
        let raw = v.get(field).and_then(Value::as_str).ok_or_else(|| {
            EngineError::Other(anyhow::anyhow!("missing field {field} in Bybit response"))
        })?;
        Decimal::from_str(raw).map_err(|e| EngineError::Other(anyhow::anyhow!(e)))
    }
}

#[async_trait]
impl ExchangeRest for BybitRest {
    async fn get_tickers(&self) -> EngineResult<Vec<TickerSnapshot>> {
        let body = self
            .signed_get("/v5/market/tickers", &format!("category={CATEGORY}"))
            .await?;
        let list = body["result"]["list"].as_array().cloned().unwrap_or_default();
        list.iter()
            .map(|t| {
                Ok(TickerSnapshot {
                    symbol: t["symbol"].as_str().unwrap_or_default().to_string(),
                    turnover_24h: Self::parse_decimal(t, "turnover24h")?,
                })
            })
            .collect()
    }

    async fn get_instruments(&self) -> EngineResult<Vec<InstrumentSpec>> {
        let body = self
            .signed_get("/v5/market/instruments-info", &format!("category={CATEGORY}"))
            .await?;
        let list = body["result"]["list"].as_array().cloned().unwrap_or_default();
        list.iter()
            .map(|i| {
                let symbol = i["symbol"].as_str().unwrap_or_default().to_string();
                let base_asset = i["baseCoin"].as_str().unwrap_or_default().to_string();
                Ok(InstrumentSpec {
                    symbol,
                    base_asset,
                    min_qty: Self::parse_decimal(&i["lotSizeFilter"], "minOrderQty")?,
                    qty_step: Self::parse_decimal(&i["lotSizeFilter"], "qtyStep")?,
                    tick_size: Self::parse_decimal(&i["priceFilter"], "tickSize")?,
                })
            })
            .collect()
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> EngineResult<Vec<Candle>> {
        let query = format!("category={CATEGORY}&symbol={symbol}&interval={interval}&limit={limit}");
        let body = self.signed_get("/v5/market/kline", &query).await?;
        let list = body["result"]["list"].as_array().cloned().unwrap_or_default();

        let mut candles: Vec<Candle> = list
            .iter()
            .map(|row| {
                let row = row.as_array().ok_or_else(|| {
                    EngineError::Other(anyhow::anyhow!("kline row is not an array"))
                })?;
                let get = |idx: usize| -> EngineResult<Decimal> {
                    row.get(idx)
                        .and_then(Value::as_str)
                        .ok_or_else(|| EngineError::Other(anyhow::anyhow!("missing kline field")))
                        .and_then(|s| {
                            Decimal::from_str(s).map_err(|e| EngineError::Other(anyhow::anyhow!(e)))
                        })
                };
                let timestamp_ms = row
                    .first()
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| EngineError::Other(anyhow::anyhow!("missing kline start")))?;

                Ok(Candle {
                    timestamp_ms,
                    open: get(1)?,
                    high: get(2)?,
                    low: get(3)?,
                    close: get(4)?,
                    volume: get(5)?,
                    confirmed: true,
                })
            })
            .collect::<EngineResult<_>>()?;

        candles.reverse(); // Bybit returns newest-first.
        Ok(candles)
    }

    async fn get_orderbook_top(&self, symbol: &str) -> EngineResult<OrderBookTop> {
        let query = format!("category={CATEGORY}&symbol={symbol}&limit=1");
        let body = self.signed_get("/v5/market/orderbook", &query).await?;
        let result = &body["result"];
        let best_bid = result["b"]
            .get(0)
            .and_then(|lvl| lvl.get(0))
            .and_then(Value::as_str)
            .and_then(|s| Decimal::from_str(s).ok())
            .ok_or_else(|| EngineError::Other(anyhow::anyhow!("empty bid book for {symbol}")))?;
        let best_ask = result["a"]
            .get(0)
            .and_then(|lvl| lvl.get(0))
            .and_then(Value::as_str)
            .and_then(|s| Decimal::from_str(s).ok())
            .ok_or_else(|| EngineError::Other(anyhow::anyhow!("empty ask book for {symbol}")))?;

        Ok(OrderBookTop { best_bid, best_ask })
    }

    async fn place_order(&self, req: PlaceOrderRequest) -> EngineResult<PlaceOrderResponse> {
        let side = match req.side {
            Side::Long => "Buy",
            Side::Short => "Sell",
        };
        let tif = match req.tif {
            crate::domain::ports::TimeInForce::PostOnly => "PostOnly",
            crate::domain::ports::TimeInForce::Gtc => "GTC",
        };

        let body = json!({
            "category": CATEGORY,
            "symbol": req.symbol,
            "side": side,
            "orderType": "Limit",
            "qty": req.qty.to_string(),
            "price": req.price.to_string(),
            "timeInForce": tif,
            "reduceOnly": req.reduce_only,
        });

        let result = self.signed_post("/v5/order/create", &body).await?;
        Ok(PlaceOrderResponse {
            order_id: result["result"]["orderId"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            ret_code: result["retCode"].as_i64().unwrap_or(0),
            ret_msg: result["retMsg"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> EngineResult<()> {
        let body = json!({
            "category": CATEGORY,
            "symbol": symbol,
            "orderId": order_id,
        });
        self.signed_post("/v5/order/cancel", &body).await?;
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> EngineResult<()> {
        let body = json!({
            "category": CATEGORY,
            "symbol": symbol,
        });
        self.signed_post("/v5/order/cancel-all", &body).await?;
        Ok(())
    }

    async fn get_open_orders(&self, symbol: &str) -> EngineResult<Vec<OpenOrder>> {
        let query = format!("category={CATEGORY}&symbol={symbol}");
        let body = self.signed_get("/v5/order/realtime", &query).await?;
        let list = body["result"]["list"].as_array().cloned().unwrap_or_default();

        #[derive(Deserialize)]
        struct Row {
            #[serde(rename = "orderId")]
            order_id: String,
            symbol: String,
            #[serde(rename = "orderStatus")]
            order_status: String,
        }

        list.into_iter()
            .map(|v| serde_json::from_value::<Row>(v))
            .map(|r| {
                let r = r.map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?;
                let status = match r.order_status.as_str() {
                    "New" => OrderStatus::New,
                    "PartiallyFilled" => OrderStatus::PartiallyFilled,
                    "Filled" => OrderStatus::Filled,
                    "Cancelled" => OrderStatus::Cancelled,
                    "Rejected" => OrderStatus::Rejected,
                    "Deactivated" => OrderStatus::Deactivated,
                    other => {
                        warn!(status = other, "unrecognised Bybit order status, treating as New");
                        OrderStatus::New
                    }
                };
                Ok(OpenOrder {
                    order_id: r.order_id,
                    symbol: r.symbol,
                    status,
                })
            })
            .collect()
    }

    async fn set_trading_stop(&self, symbol: &str, sl_price: Decimal) -> EngineResult<()> {
        let body = json!({
            "category": CATEGORY,
            "symbol": symbol,
            "stopLoss": sl_price.to_string(),
        });
        self.signed_post("/v5/position/trading-stop", &body).await?;
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> EngineResult<()> {
        let body = json!({
            "category": CATEGORY,
            "symbol": symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });
        self.signed_post("/v5/position/set-leverage", &body).await?;
        Ok(())
    }

    async fn get_positions(&self) -> EngineResult<Vec<PositionSnapshot>> {
        let query = format!("category={CATEGORY}&settleCoin=USDT");
        let body = self.signed_get("/v5/position/list", &query).await?;
        let list = body["result"]["list"].as_array().cloned().unwrap_or_default();

        list.iter()
            .filter(|p| {
                p["size"]
                    .as_str()
                    .and_then(|s| Decimal::from_str(s).ok())
                    .map(|d| d != Decimal::ZERO)
                    .unwrap_or(false)
            })
            .map(|p| {
                let side = match p["side"].as_str().unwrap_or_default() {
                    "Sell" => Side::Short,
                    _ => Side::Long,
                };
                Ok(PositionSnapshot {
                    symbol: p["symbol"].as_str().unwrap_or_default().to_string(),
                    side,
                    size: Self::parse_decimal(p, "size")?,
                    unrealised_pnl: Self::parse_decimal(p, "unrealisedPnl")?,
                    cum_realised_pnl: Self::parse_decimal(p, "cumRealisedPnl")?,
                })
            })
            .collect()
    }

    async fn market_close(&self, symbol: &str, side: Side, qty: Decimal) -> EngineResult<()> {
        // `side` is already the side of the order to place (the caller has
        // resolved position side -> closing side); just map it to Bybit's enum.
        let closing_side = match side {
            Side::Long => "Buy",
            Side::Short => "Sell",
        };
        let body = json!({
            "category": CATEGORY,
            "symbol": symbol,
            "side": closing_side,
            "orderType": "Market",
            "qty": qty.to_string(),
            "reduceOnly": true,
        });
        self.signed_post("/v5/order/create", &body).await?;
        Ok(())
    }
}
