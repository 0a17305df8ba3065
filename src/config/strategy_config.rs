//! Strategy timeframe and TP-ladder parameters.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct StrategyEnvConfig {
    pub ha_timeframe: u32,
    pub atr_timeframe: u32,
    pub atr_period: usize,
    pub tp_levels: u8,
    pub initial_sl_pct: Decimal,
}

impl StrategyEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            ha_timeframe: Self::parse_u32("HA_TIMEFRAME", 240)?,
            atr_timeframe: Self::parse_u32("ATR_TIMEFRAME", 15)?,
            atr_period: Self::parse_usize("ATR_PERIOD", 14)?,
            tp_levels: Self::parse_u32("TP_LEVELS", 10)? as u8,
            initial_sl_pct: Self::parse_decimal("INITIAL_SL_PCT", "0.025")?,
        })
    }

    fn parse_usize(key: &str, default: usize) -> Result<usize> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<usize>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_u32(key: &str, default: u32) -> Result<u32> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u32>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_decimal(key: &str, default: &str) -> Result<Decimal> {
        let raw = env::var(key).unwrap_or_else(|_| default.to_string());
        Decimal::from_str(&raw).context(format!("Failed to parse {}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let cfg = StrategyEnvConfig::from_env().expect("should parse with defaults");
        assert_eq!(cfg.atr_period, 14);
        assert_eq!(cfg.tp_levels, 10);
    }
}
