use rust_decimal::Decimal;
use thiserror::Error;

/// Crate-wide error taxonomy, grouped by kind rather than by originating
/// module so callers can `match` on policy (see the error handling design).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport error calling {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("exchange rejected {action} for {symbol}: retCode={ret_code} msg={msg}")]
    ExchangeBusiness {
        action: String,
        symbol: String,
        ret_code: i64,
        msg: String,
    },

    #[error("postonly reject for {symbol} on tier {tier}: {reason}")]
    PostOnlyReject {
        symbol: String,
        tier: u8,
        reason: String,
    },

    #[error("fill timeout for {symbol} after {waited_secs}s on tier {tier}")]
    FillTimeout {
        symbol: String,
        tier: u8,
        waited_secs: u64,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("refusing startup: kill switch flag is set; clear bot_state.kill_switch_triggered")]
    KillSwitchStillTriggered,

    #[error("critical trade state for trade {trade_id} on {symbol}: {reason}")]
    CriticalTradeState {
        trade_id: uuid::Uuid,
        symbol: String,
        reason: String,
    },

    #[error("no slot available")]
    NoSlotAvailable,

    #[error("symbol {0} already has an active trade")]
    SymbolAlreadyActive(String),

    #[error("symbol {0} is in cooldown")]
    SymbolInCooldown(String),

    #[error("symbol {0} is not in the tracked coin universe")]
    SymbolNotTracked(String),

    #[error("insufficient quantity for {symbol}: computed {computed} < min_qty {min_qty}")]
    QtyBelowMinimum {
        symbol: String,
        computed: Decimal,
        min_qty: Decimal,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
