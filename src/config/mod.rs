//! Configuration loading from environment variables, organized by domain:
//! strategy, slots, execution, risk, coins, exchange, notifications,
//! storage, and observability.

mod coins_config;
mod exchange_config;
mod execution_config;
mod notifications_config;
mod observability_config;
mod risk_env_config;
mod slots_config;
mod storage_config;
mod strategy_config;

pub use coins_config::CoinsEnvConfig;
pub use exchange_config::ExchangeEnvConfig;
pub use execution_config::ExecutionEnvConfig;
pub use notifications_config::NotificationsEnvConfig;
pub use observability_config::ObservabilityEnvConfig;
pub use risk_env_config::RiskEnvConfig;
pub use slots_config::SlotsEnvConfig;
pub use storage_config::StorageEnvConfig;
pub use strategy_config::StrategyEnvConfig;

use crate::engine::coin_selector::CoinSelector;
use crate::engine::order_executor::ExecutorConfig;
use crate::engine::risk_manager::RiskConfig;
use anyhow::Result;
use rust_decimal::Decimal;

/// Aggregates every sub-config into one flat, immutable settings object.
/// Loaded once at process start and never mutated again.
#[derive(Debug, Clone)]
pub struct Config {
    // Strategy
    pub ha_timeframe: u32,
    pub atr_timeframe: u32,
    pub atr_period: usize,
    pub tp_levels: u8,
    pub initial_sl_pct: Decimal,

    // Slots
    pub num_slots: u32,
    pub initial_balance: Decimal,
    pub min_balance: Decimal,
    pub leverage: u32,

    // Execution
    pub fill_timeout_sec: u64,
    pub max_fill_retries: u32,
    pub cooldown_minutes: i64,
    pub post_only_retries: u32,
    pub dry_run: bool,

    // Risk
    pub kill_switch_threshold: Decimal,
    pub kill_switch_check_interval_sec: u64,

    // Coins
    pub num_coins: usize,
    pub coin_refresh_interval_hours: i64,
    pub ha_history_candles: u32,
    pub excluded_stablecoins: Vec<String>,

    // Exchange
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub ws_public_url: String,
    pub ws_private_url: String,
    pub recv_window_ms: u64,

    // Notifications
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub notifications_enabled: bool,

    // Storage
    pub db_path: String,

    // Observability
    pub log_format: String,
    pub log_level: String,
    pub metrics_push_interval_sec: u64,
}

impl Config {
    /// Loads and validates configuration from environment variables
    /// (optionally populated from a `.env` file by the caller). Fails fast
    /// if required exchange credentials are missing.
    pub fn from_env() -> Result<Self> {
        let strategy = StrategyEnvConfig::from_env()?;
        let slots = SlotsEnvConfig::from_env()?;
        let execution = ExecutionEnvConfig::from_env()?;
        let risk = RiskEnvConfig::from_env()?;
        let coins = CoinsEnvConfig::from_env()?;
        let exchange = ExchangeEnvConfig::from_env()?;
        let notifications = NotificationsEnvConfig::from_env();
        let storage = StorageEnvConfig::from_env();
        let observability = ObservabilityEnvConfig::from_env()?;

        Ok(Self {
            ha_timeframe: strategy.ha_timeframe,
            atr_timeframe: strategy.atr_timeframe,
            atr_period: strategy.atr_period,
            tp_levels: strategy.tp_levels,
            initial_sl_pct: strategy.initial_sl_pct,

            num_slots: slots.num_slots,
            initial_balance: slots.initial_balance,
            min_balance: slots.min_balance,
            leverage: slots.leverage,

            fill_timeout_sec: execution.fill_timeout_sec,
            max_fill_retries: execution.max_fill_retries,
            cooldown_minutes: execution.cooldown_minutes,
            post_only_retries: execution.post_only_retries,
            dry_run: execution.dry_run,

            kill_switch_threshold: risk.kill_switch_threshold,
            kill_switch_check_interval_sec: risk.kill_switch_check_interval_sec,

            num_coins: coins.num_coins,
            coin_refresh_interval_hours: coins.coin_refresh_interval_hours,
            ha_history_candles: coins.ha_history_candles,
            excluded_stablecoins: coins.excluded_stablecoins.into_iter().collect(),

            api_key: exchange.api_key,
            api_secret: exchange.api_secret,
            base_url: exchange.base_url,
            ws_public_url: exchange.ws_public_url,
            ws_private_url: exchange.ws_private_url,
            recv_window_ms: exchange.recv_window_ms,

            telegram_bot_token: notifications.telegram_bot_token,
            telegram_chat_id: notifications.telegram_chat_id,
            notifications_enabled: notifications.enabled,

            db_path: storage.db_path,

            log_format: observability.log_format,
            log_level: observability.log_level,
            metrics_push_interval_sec: observability.metrics_push_interval_sec,
        })
    }

    pub fn to_risk_config(&self) -> RiskConfig {
        RiskConfig {
            initial_sl_pct: self.initial_sl_pct,
            tp_levels: self.tp_levels,
        }
    }

    pub fn to_executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            fill_timeout_sec: self.fill_timeout_sec,
            max_fill_retries: self.max_fill_retries,
            post_only_retries: self.post_only_retries,
        }
    }

    pub fn new_coin_selector(&self) -> CoinSelector {
        CoinSelector::new(self.num_coins, self.excluded_stablecoins.clone())
    }
}
