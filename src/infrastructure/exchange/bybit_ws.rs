//! Bybit V5 WebSocket transport. Runs two independent reconnect-with-backoff
//! loops — one against the public stream (klines, tickers) and one against
//! the private stream (position, execution), authenticated via a signed
//! login frame sent immediately after connect — and fans both out as typed
//! [`Event`]s on a single broadcast channel.

use crate::domain::candle::Candle;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ports::{Event, ExchangeStream, PositionSnapshot};
use crate::domain::signal::Side;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

type HmacSha256 = Hmac<Sha256>;
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PING_INTERVAL: Duration = Duration::from_secs(20);
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

enum SubCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

pub struct BybitWs {
    event_tx: broadcast::Sender<Event>,
    subscribed: Arc<RwLock<HashSet<String>>>,
    sub_tx: mpsc::UnboundedSender<SubCommand>,
    public_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    private_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BybitWs {
    pub fn new(public_url: String, private_url: String, api_key: String, api_secret: String) -> Self {
        let (event_tx, _rx) = broadcast::channel(4096);
        let (sub_tx, sub_rx) = mpsc::unbounded_channel();
        let subscribed = Arc::new(RwLock::new(HashSet::new()));

        let public_task = {
            let event_tx = event_tx.clone();
            let subscribed = subscribed.clone();
            tokio::spawn(run_public_loop(public_url, subscribed, sub_rx, event_tx))
        };
        let private_task = {
            let event_tx = event_tx.clone();
            tokio::spawn(run_private_loop(private_url, api_key, api_secret, event_tx))
        };

        Self {
            event_tx,
            subscribed,
            sub_tx,
            public_task: Arc::new(Mutex::new(Some(public_task))),
            private_task: Arc::new(Mutex::new(Some(private_task))),
        }
    }
}

#[async_trait]
impl ExchangeStream for BybitWs {
    async fn subscribe_symbols(&self, symbols: &[String]) -> EngineResult<()> {
        let mut guard = self.subscribed.write().await;
        for symbol in symbols {
            guard.insert(symbol.clone());
        }
        drop(guard);
        self.sub_tx
            .send(SubCommand::Subscribe(symbols.to_vec()))
            .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))
    }

    async fn unsubscribe_symbols(&self, symbols: &[String]) -> EngineResult<()> {
        let mut guard = self.subscribed.write().await;
        for symbol in symbols {
            guard.remove(symbol);
        }
        drop(guard);
        self.sub_tx
            .send(SubCommand::Unsubscribe(symbols.to_vec()))
            .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))
    }

    fn events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }
}

fn kline_topics(symbol: &str) -> [String; 3] {
    [
        format!("kline.240.{symbol}"),
        format!("kline.15.{symbol}"),
        format!("kline.5.{symbol}"),
    ]
}

fn ticker_topic(symbol: &str) -> String {
    format!("tickers.{symbol}")
}

fn topics_for(symbols: &[String]) -> Vec<String> {
    let mut topics = Vec::with_capacity(symbols.len() * 4);
    for symbol in symbols {
        topics.extend(kline_topics(symbol));
        topics.push(ticker_topic(symbol));
    }
    topics
}

async fn run_public_loop(
    url: String,
    subscribed: Arc<RwLock<HashSet<String>>>,
    mut sub_rx: mpsc::UnboundedReceiver<SubCommand>,
    event_tx: broadcast::Sender<Event>,
) {
    let mut backoff = MIN_BACKOFF;
    loop {
        info!(url, "connecting to Bybit public stream");
        match connect_async(&url).await {
            Ok((stream, _)) => {
                backoff = MIN_BACKOFF;
                let current: Vec<String> = subscribed.read().await.iter().cloned().collect();
                if let Err(e) =
                    run_public_session(stream, &current, &mut sub_rx, &subscribed, &event_tx).await
                {
                    warn!(error = %e, "public stream session ended");
                }
            }
            Err(e) => {
                error!(error = %e, "failed to connect to Bybit public stream");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn run_public_session(
    stream: WsStream,
    initial_symbols: &[String],
    sub_rx: &mut mpsc::UnboundedReceiver<SubCommand>,
    subscribed: &Arc<RwLock<HashSet<String>>>,
    event_tx: &broadcast::Sender<Event>,
) -> EngineResult<()> {
    let (mut write, mut read) = stream.split();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = writer_rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    if !initial_symbols.is_empty() {
        send_subscribe(&writer_tx, &topics_for(initial_symbols))?;
    }

    let ping_tx = writer_tx.clone();
    let ping_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        loop {
            interval.tick().await;
            if ping_tx
                .send(Message::Text(r#"{"op":"ping"}"#.into()))
                .is_err()
            {
                break;
            }
        }
    });

    let result = loop {
        tokio::select! {
            cmd = sub_rx.recv() => {
                match cmd {
                    Some(SubCommand::Subscribe(symbols)) => {
                        send_subscribe(&writer_tx, &topics_for(&symbols))?;
                    }
                    Some(SubCommand::Unsubscribe(symbols)) => {
                        let topics = topics_for(&symbols);
                        let frame = serde_json::json!({"op": "unsubscribe", "args": topics});
                        if writer_tx.send(Message::Text(frame.to_string().into())).is_err() {
                            break Err(EngineError::Transport {
                                endpoint: "bybit_ws_public".to_string(),
                                reason: "writer channel closed".to_string(),
                            });
                        }
                    }
                    None => break Ok(()),
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_public_message(&text, event_tx) {
                            debug!(error = %e, "ignoring unparsable public message");
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = writer_tx.send(Message::Pong(payload));
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break Ok(());
                    }
                    Some(Err(e)) => {
                        break Err(EngineError::Transport {
                            endpoint: "bybit_ws_public".to_string(),
                            reason: e.to_string(),
                        });
                    }
                    _ => {}
                }
            }
        }
    };

    ping_task.abort();
    writer_task.abort();
    let _ = subscribed; // subscription set is mutated by the trait methods, not here
    result
}

fn send_subscribe(writer_tx: &mpsc::UnboundedSender<Message>, topics: &[String]) -> EngineResult<()> {
    if topics.is_empty() {
        return Ok(());
    }
    let frame = serde_json::json!({"op": "subscribe", "args": topics});
    writer_tx
        .send(Message::Text(frame.to_string().into()))
        .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))
}

fn handle_public_message(text: &str, event_tx: &broadcast::Sender<Event>) -> EngineResult<()> {
    let value: Value = serde_json::from_str(text).map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?;
    let Some(topic) = value.get("topic").and_then(Value::as_str) else {
        return Ok(());
    };

    if let Some(symbol) = topic.strip_prefix("kline.240.") {
        if let Some(candle) = parse_kline(&value) {
            let _ = event_tx.send(Event::Kline4h { symbol: symbol.to_string(), candle });
        }
    } else if let Some(symbol) = topic.strip_prefix("kline.15.") {
        if let Some(candle) = parse_kline(&value) {
            let _ = event_tx.send(Event::Kline15m { symbol: symbol.to_string(), candle });
        }
    } else if let Some(symbol) = topic.strip_prefix("kline.5.") {
        if let Some(candle) = parse_kline(&value) {
            let _ = event_tx.send(Event::Kline5m { symbol: symbol.to_string(), candle });
        }
    } else if let Some(symbol) = topic.strip_prefix("tickers.") {
        if let Some(mark_price) = parse_ticker(&value) {
            let _ = event_tx.send(Event::Ticker { symbol: symbol.to_string(), mark_price });
        }
    }
    Ok(())
}

fn parse_kline(value: &Value) -> Option<Candle> {
    let row = value.get("data")?.as_array()?.first()?;
    let get_dec = |field: &str| -> Option<Decimal> {
        row.get(field).and_then(Value::as_str).and_then(|s| Decimal::from_str(s).ok())
    };
    Some(Candle {
        timestamp_ms: row.get("start")?.as_i64()?,
        open: get_dec("open")?,
        high: get_dec("high")?,
        low: get_dec("low")?,
        close: get_dec("close")?,
        volume: get_dec("volume")?,
        confirmed: row.get("confirm").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn parse_ticker(value: &Value) -> Option<Decimal> {
    let data = value.get("data")?;
    let raw = data
        .get("markPrice")
        .and_then(Value::as_str)
        .or_else(|| data.get("lastPrice").and_then(Value::as_str))?;
    Decimal::from_str(raw).ok()
}

async fn run_private_loop(
    url: String,
    api_key: String,
    api_secret: String,
    event_tx: broadcast::Sender<Event>,
) {
    let mut backoff = MIN_BACKOFF;
    loop {
        info!(url, "connecting to Bybit private stream");
        match connect_async(&url).await {
            Ok((stream, _)) => {
                backoff = MIN_BACKOFF;
                if let Err(e) = run_private_session(stream, &api_key, &api_secret, &event_tx).await {
                    warn!(error = %e, "private stream session ended");
                }
            }
            Err(e) => {
                error!(error = %e, "failed to connect to Bybit private stream");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

fn sign_ws_auth(api_secret: &str, expires_ms: i64) -> String {
    let payload = format!("GET/realtime{expires_ms}");
    let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

async fn run_private_session(
    stream: WsStream,
    api_key: &str,
    api_secret: &str,
    event_tx: &broadcast::Sender<Event>,
) -> EngineResult<()> {
    let (mut write, mut read) = stream.split();

    let expires_ms = Utc::now().timestamp_millis() + 10_000;
    let signature = sign_ws_auth(api_secret, expires_ms);
    let auth_frame = serde_json::json!({
        "op": "auth",
        "args": [api_key, expires_ms, signature],
    });
    write
        .send(Message::Text(auth_frame.to_string().into()))
        .await
        .map_err(|e| EngineError::Transport {
            endpoint: "bybit_ws_private".to_string(),
            reason: e.to_string(),
        })?;

    let subscribe_frame = serde_json::json!({"op": "subscribe", "args": ["position", "execution"]});
    write
        .send(Message::Text(subscribe_frame.to_string().into()))
        .await
        .map_err(|e| EngineError::Transport {
            endpoint: "bybit_ws_private".to_string(),
            reason: e.to_string(),
        })?;

    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = writer_rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    let ping_tx = writer_tx.clone();
    let ping_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        loop {
            interval.tick().await;
            if ping_tx.send(Message::Text(r#"{"op":"ping"}"#.into())).is_err() {
                break;
            }
        }
    });

    let result = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Err(e) = handle_private_message(&text, event_tx) {
                    debug!(error = %e, "ignoring unparsable private message");
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                let _ = writer_tx.send(Message::Pong(payload));
            }
            Some(Ok(Message::Close(_))) | None => break Ok(()),
            Some(Err(e)) => {
                break Err(EngineError::Transport {
                    endpoint: "bybit_ws_private".to_string(),
                    reason: e.to_string(),
                });
            }
            _ => {}
        }
    };

    ping_task.abort();
    writer_task.abort();
    result
}

fn handle_private_message(text: &str, event_tx: &broadcast::Sender<Event>) -> EngineResult<()> {
    let value: Value = serde_json::from_str(text).map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?;
    let Some(topic) = value.get("topic").and_then(Value::as_str) else {
        return Ok(());
    };

    match topic {
        "position" => {
            let Some(rows) = value.get("data").and_then(Value::as_array) else {
                return Ok(());
            };
            for row in rows {
                if let Some(snapshot) = parse_position(row) {
                    let _ = event_tx.send(Event::Position { snapshot });
                }
            }
        }
        "execution" => {
            let Some(rows) = value.get("data").and_then(Value::as_array) else {
                return Ok(());
            };
            for row in rows {
                let order_id = row.get("orderId").and_then(Value::as_str).unwrap_or_default();
                let fee = row
                    .get("execFee")
                    .and_then(Value::as_str)
                    .and_then(|s| Decimal::from_str(s).ok())
                    .unwrap_or(Decimal::ZERO);
                let _ = event_tx.send(Event::Execution { order_id: order_id.to_string(), fee });
            }
        }
        _ => {}
    }
    Ok(())
}

fn parse_position(row: &Value) -> Option<PositionSnapshot> {
    let get_dec = |field: &str| -> Option<Decimal> {
        row.get(field).and_then(Value::as_str).and_then(|s| Decimal::from_str(s).ok())
    };
    let side = match row.get("side").and_then(Value::as_str)? {
        "Sell" => Side::Short,
        _ => Side::Long,
    };
    Some(PositionSnapshot {
        symbol: row.get("symbol")?.as_str()?.to_string(),
        side,
        size: get_dec("size")?,
        unrealised_pnl: get_dec("unrealisedPnl").unwrap_or(Decimal::ZERO),
        cum_realised_pnl: get_dec("cumRealisedPnl").unwrap_or(Decimal::ZERO),
    })
}
