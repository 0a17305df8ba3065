//! Boot sequence and the single event-processing task that owns every
//! mutable engine component for the lifetime of the process.

use crate::config::Config;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ports::{ClosePnl, Event, ExchangeRest, ExchangeStream, Notifier};
use crate::domain::repositories::{SlotRepository, StateRepository, TradeRepository};
use crate::domain::trade::ExitReason;
use crate::engine::kill_switch::KillSwitch;
use crate::engine::order_executor::OrderExecutor;
use crate::engine::risk_manager::RiskManager;
use crate::engine::signal_engine::{SignalEngine, SignalEngineConfig};
use crate::engine::slot_manager::SlotManager;
use crate::infrastructure::exchange::{BybitRest, BybitWs};
use crate::infrastructure::notifier::TelegramNotifier;
use crate::infrastructure::observability::{Metrics, MetricsReporter};
use crate::infrastructure::persistence::{
    Database, SqliteSlotRepository, SqliteStateRepository, SqliteTradeRepository,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const HISTORY_LOAD_PACING: Duration = Duration::from_secs_f64(0.1);
const COIN_REFRESH_BOOTSTRAP_4H_CANDLES: u32 = 50;

fn exit_reason_label(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::SlHit => "sl_hit",
        ExitReason::TrailingSl => "trailing_sl",
        ExitReason::KillSwitch => "kill_switch",
        ExitReason::Manual => "manual",
        ExitReason::FillFailed => "fill_failed",
    }
}

fn side_label(side: crate::domain::signal::Side) -> &'static str {
    match side {
        crate::domain::signal::Side::Long => "long",
        crate::domain::signal::Side::Short => "short",
    }
}

fn format_status_summary(summary: &crate::engine::slot_manager::SlotStatusSummary) -> String {
    format!(
        "slots: {} available, {} in trade, {} cooldown, {} frozen\ntotal balance: {}\ntotal P&L: {}",
        summary.available,
        summary.in_trade,
        summary.cooldown,
        summary.frozen,
        summary.total_balance,
        summary.total_pnl,
    )
}

/// A fully wired, running engine. Constructed once via [`Application::build`]
/// and consumed by [`Application::run`], which returns only on shutdown.
pub struct Application {
    config: Config,
    rest: Arc<dyn ExchangeRest>,
    ws: Arc<dyn ExchangeStream>,
    notifier: Arc<dyn Notifier>,
    state_repo: Arc<dyn StateRepository>,
    signal_engine: SignalEngine,
    risk_manager: RiskManager,
    kill_switch: KillSwitch,
    kill_switch_executor: OrderExecutor,
    metrics: Metrics,
    metrics_reporter: MetricsReporter,
}

impl Application {
    /// Runs the strict boot sequence: open persistence, refuse to start if
    /// the kill switch is still tripped, rehydrate slots/trades/cooldowns,
    /// build the initial coin universe, load historical candles, subscribe
    /// the WS transport, and send the startup notification.
    pub async fn build(config: Config) -> EngineResult<Self> {
        let db = Database::new(&config.db_path).await?;
        let pool = db.pool.clone();

        let slot_repo: Arc<dyn SlotRepository> = Arc::new(SqliteSlotRepository::new(pool.clone()));
        let trade_repo: Arc<dyn TradeRepository> = Arc::new(SqliteTradeRepository::new(pool.clone()));
        let state_repo: Arc<dyn StateRepository> = Arc::new(SqliteStateRepository::new(pool));

        if KillSwitch::is_triggered_on_disk(state_repo.as_ref()).await? {
            error!("kill switch flag is set from a prior run; refusing to start");
            return Err(EngineError::KillSwitchStillTriggered);
        }

        let rest: Arc<dyn ExchangeRest> = Arc::new(BybitRest::new(
            config.api_key.clone(),
            config.api_secret.clone(),
            config.base_url.clone(),
            config.recv_window_ms,
        ));
        let ws: Arc<dyn ExchangeStream> = Arc::new(BybitWs::new(
            config.ws_public_url.clone(),
            config.ws_private_url.clone(),
            config.api_key.clone(),
            config.api_secret.clone(),
        ));
        let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(
            config.telegram_bot_token.clone(),
            config.telegram_chat_id.clone(),
            config.notifications_enabled,
        ));

        let mut slots = SlotManager::new(
            config.leverage,
            config.min_balance,
            config.cooldown_minutes,
            slot_repo,
        );
        slots.initialize(config.num_slots, config.initial_balance).await?;

        let mut risk_manager = RiskManager::new(config.to_risk_config(), trade_repo.clone());
        risk_manager.load_active_trades().await?;

        let mut coin_selector = config.new_coin_selector();
        coin_selector.refresh(rest.as_ref()).await?;

        let executor = OrderExecutor::new(config.to_executor_config());
        let mut signal_engine = SignalEngine::new(
            SignalEngineConfig {
                cooldown_minutes: config.cooldown_minutes,
                dry_run: config.dry_run,
            },
            config.atr_period,
            coin_selector,
            slots,
            executor,
            trade_repo,
            rest.clone(),
            notifier.clone(),
        );

        let tracked_symbols = signal_engine.coin_selector().symbols();
        for symbol in &tracked_symbols {
            let ha_history = rest
                .get_klines(symbol, "240", config.ha_history_candles)
                .await
                .unwrap_or_else(|e| {
                    warn!(symbol, error = %e, "failed to load 4h history, starting with empty HA series");
                    Vec::new()
                });
            let atr_history = rest
                .get_klines(symbol, "15", config.atr_period as u32 + 10)
                .await
                .unwrap_or_else(|e| {
                    warn!(symbol, error = %e, "failed to load 15m history, starting with empty ATR series");
                    Vec::new()
                });
            signal_engine.seed_history(symbol, &ha_history, &atr_history);
            tokio::time::sleep(HISTORY_LOAD_PACING).await;
        }
        signal_engine.rehydrate_cooldowns();

        ws.subscribe_symbols(&tracked_symbols).await?;

        let kill_switch = KillSwitch::new(config.kill_switch_threshold, state_repo.clone());
        let kill_switch_executor = OrderExecutor::new(config.to_executor_config());
        let metrics = Metrics::new().map_err(EngineError::Other)?;
        let metrics_reporter = MetricsReporter::new(metrics.clone());

        let summary = signal_engine.slots().get_status_summary();
        notifier
            .send_bot_status(&format!(
                "engine started: tracking {} coins, {} slots available",
                tracked_symbols.len(),
                summary.available
            ))
            .await;

        Ok(Self {
            config,
            rest,
            ws,
            notifier,
            state_repo,
            signal_engine,
            risk_manager,
            kill_switch,
            kill_switch_executor,
            metrics,
            metrics_reporter,
        })
    }

    /// Runs the WS dispatch loop alongside the kill-switch, coin-refresh,
    /// daily-summary and metrics timers until a shutdown signal arrives.
    /// All mutation of engine state happens on this single task, so no
    /// cross-task lock is needed to serialize signal processing.
    pub async fn run(mut self) -> EngineResult<()> {
        let mut ws_events = self.ws.events();
        let mut kill_switch_interval =
            tokio::time::interval(Duration::from_secs(self.config.kill_switch_check_interval_sec));
        let mut coin_refresh_interval = tokio::time::interval(Duration::from_secs(
            (self.config.coin_refresh_interval_hours.max(1) as u64) * 3600,
        ));
        let mut metrics_interval =
            tokio::time::interval(Duration::from_secs(self.config.metrics_push_interval_sec));
        let mut daily_summary_interval = tokio::time::interval(seconds_until_next_daily_summary());

        // The first tick of a `tokio::time::interval` fires immediately;
        // consume it so the loop doesn't refresh/report on startup twice.
        kill_switch_interval.tick().await;
        coin_refresh_interval.tick().await;
        metrics_interval.tick().await;
        daily_summary_interval.tick().await;

        let mut sigterm = unix_signal_stream(tokio::signal::unix::SignalKind::terminate());
        let mut sigint = unix_signal_stream(tokio::signal::unix::SignalKind::interrupt());

        loop {
            tokio::select! {
                event = ws_events.recv() => {
                    match event {
                        Ok(event) => self.handle_event(event).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "WS event channel lagged, dropping oldest events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            error!("WS event channel closed, shutting down");
                            break;
                        }
                    }
                }
                _ = kill_switch_interval.tick() => {
                    if let Err(e) = self.run_kill_switch_cycle().await {
                        error!(error = %e, "kill switch cycle failed");
                    }
                }
                _ = coin_refresh_interval.tick() => {
                    if let Err(e) = self.run_coin_refresh_cycle().await {
                        error!(error = %e, "coin refresh cycle failed");
                    }
                }
                _ = daily_summary_interval.tick() => {
                    self.send_daily_summary().await;
                }
                _ = metrics_interval.tick() => {
                    self.record_metrics().await;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    break;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    break;
                }
            }

            if self.kill_switch.is_triggered() {
                break;
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Kline4h { symbol, candle } => self.signal_engine.on_kline_4h(&symbol, candle),
            Event::Kline15m { symbol, candle } => self.signal_engine.on_kline_15m(&symbol, candle),
            Event::Kline5m { symbol, candle } => {
                if let Err(e) = self.signal_engine.release_expired_cooldowns().await {
                    warn!(error = %e, "failed to release expired cooldowns");
                }
                if let Some(signal) = self.signal_engine.on_kline_5m(&symbol, candle) {
                    self.metrics
                        .signals_total
                        .with_label_values(&[side_label(signal.side)])
                        .inc();
                    if let Err(e) = self.signal_engine.process_signal(signal, &mut self.risk_manager).await {
                        error!(symbol, error = %e, "signal processing failed");
                    }
                }
            }
            Event::Ticker { symbol, mark_price } => {
                if let Err(e) = self
                    .risk_manager
                    .check_price(&symbol, mark_price, self.rest.as_ref())
                    .await
                {
                    warn!(symbol, error = %e, "check_price failed");
                }
            }
            Event::Position { snapshot } => {
                if snapshot.size == Decimal::ZERO {
                    let close = ClosePnl { pnl: snapshot.cum_realised_pnl, closed_at: chrono::Utc::now() };
                    match self.risk_manager.handle_trade_closed(&snapshot.symbol, close).await {
                        Ok(Some(trade)) => {
                            if let Some(reason) = trade.exit_reason {
                                self.metrics
                                    .trades_total
                                    .with_label_values(&[exit_reason_label(reason)])
                                    .inc();
                                info!(symbol = %trade.symbol, reason = exit_reason_label(reason), "trade closed");
                            }
                            if let Err(e) = self.signal_engine.on_trade_closed(&trade).await {
                                error!(symbol = %trade.symbol, error = %e, "post-close bookkeeping failed");
                            }
                        }
                        Ok(None) => {}
                        Err(e) => error!(symbol = %snapshot.symbol, error = %e, "handle_trade_closed failed"),
                    }
                }
            }
            Event::Execution { order_id, fee } => {
                if let Err(e) = self.risk_manager.accumulate_fee(&order_id, fee).await {
                    warn!(order_id, error = %e, "accumulate_fee failed");
                }
            }
        }
    }

    async fn run_kill_switch_cycle(&mut self) -> EngineResult<()> {
        let triggered = self
            .kill_switch
            .run_cycle(
                self.rest.as_ref(),
                self.signal_engine.slots(),
                &mut self.risk_manager,
                &self.kill_switch_executor,
                self.notifier.as_ref(),
            )
            .await?;
        if triggered {
            self.notifier
                .send_bot_status("CRITICAL: kill switch triggered, all positions closed")
                .await;
        }
        Ok(())
    }

    async fn run_coin_refresh_cycle(&mut self) -> EngineResult<()> {
        let (added, removed) = self
            .signal_engine
            .coin_selector_mut()
            .refresh(self.rest.as_ref())
            .await?;

        if !added.is_empty() {
            if let Err(e) = self.ws.subscribe_symbols(&added).await {
                warn!(error = %e, "failed to subscribe newly added symbols");
            }
            for symbol in &added {
                let ha_history = self
                    .rest
                    .get_klines(symbol, "240", COIN_REFRESH_BOOTSTRAP_4H_CANDLES)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(symbol, error = %e, "failed to load bootstrap 4h history");
                        Vec::new()
                    });
                let atr_history = self
                    .rest
                    .get_klines(symbol, "15", self.config.atr_period as u32 + 10)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(symbol, error = %e, "failed to load bootstrap 15m history");
                        Vec::new()
                    });
                self.signal_engine.seed_history(symbol, &ha_history, &atr_history);
            }
        }

        let mut still_unsubscribable = Vec::new();
        for symbol in &removed {
            match self.signal_engine.get_coin(symbol) {
                Some(coin) if coin.in_active_trade => {
                    info!(symbol, "symbol left top-N universe but is in an active trade, keeping subscription");
                }
                _ => {
                    self.signal_engine.remove_symbol_state(symbol);
                    still_unsubscribable.push(symbol.clone());
                }
            }
        }
        if !still_unsubscribable.is_empty() {
            if let Err(e) = self.ws.unsubscribe_symbols(&still_unsubscribable).await {
                warn!(error = %e, "failed to unsubscribe removed symbols");
            }
        }

        Ok(())
    }

    async fn send_daily_summary(&self) {
        let summary = self.signal_engine.slots().get_status_summary();
        self.notifier.send_daily_summary(&format_status_summary(&summary)).await;
    }

    async fn record_metrics(&self) {
        let unrealised: Decimal = match self.rest.get_positions().await {
            Ok(positions) => positions.iter().map(|p| p.unrealised_pnl).sum(),
            Err(e) => {
                warn!(error = %e, "failed to fetch positions for metrics, using zero unrealised P&L");
                Decimal::ZERO
            }
        };
        let summary = self.signal_engine.slots().get_status_summary();
        let tracked = self.signal_engine.coin_selector().symbols().len();
        self.metrics_reporter
            .record_cycle(&summary, tracked, unrealised, self.kill_switch.is_triggered());
    }

    async fn shutdown(&self) {
        info!("engine shutting down");
        self.notifier.send_bot_status("engine stopped").await;
    }
}

fn seconds_until_next_daily_summary() -> Duration {
    use chrono::{Duration as ChronoDuration, NaiveTime, Utc};

    let now = Utc::now();
    let target_time = NaiveTime::from_hms_opt(0, 5, 0).expect("valid constant time");
    let mut next = now.date_naive().and_time(target_time).and_utc();
    if next <= now {
        next += ChronoDuration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::from_secs(86_400))
}

fn unix_signal_stream(kind: tokio::signal::unix::SignalKind) -> tokio::signal::unix::Signal {
    tokio::signal::unix::signal(kind).expect("failed to install signal handler")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_summary_delay_is_bounded_by_a_day() {
        let delay = seconds_until_next_daily_summary();
        assert!(delay <= Duration::from_secs(86_400));
        assert!(delay > Duration::ZERO);
    }

    #[test]
    fn exit_reason_labels_are_stable() {
        assert_eq!(exit_reason_label(ExitReason::SlHit), "sl_hit");
        assert_eq!(exit_reason_label(ExitReason::KillSwitch), "kill_switch");
    }

    #[test]
    fn side_labels_are_stable() {
        assert_eq!(side_label(crate::domain::signal::Side::Long), "long");
        assert_eq!(side_label(crate::domain::signal::Side::Short), "short");
    }
}
