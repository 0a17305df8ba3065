//! Capital-slot sizing parameters.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct SlotsEnvConfig {
    pub num_slots: u32,
    pub initial_balance: Decimal,
    pub min_balance: Decimal,
    pub leverage: u32,
}

impl SlotsEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            num_slots: Self::parse_u32("NUM_SLOTS", 8)?,
            initial_balance: Self::parse_decimal("INITIAL_BALANCE", "10.0")?,
            min_balance: Self::parse_decimal("MIN_BALANCE", "5.0")?,
            leverage: Self::parse_u32("LEVERAGE", 8)?,
        })
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
        let cfg = SlotsEnvConfig::from_env().expect("should parse with defaults");
        assert_eq!(cfg.num_slots, 8);
        assert_eq!(cfg.leverage, 8);
    }
}
