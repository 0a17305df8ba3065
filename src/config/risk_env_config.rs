//! Kill-switch threshold and monitoring interval.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    pub kill_switch_threshold: Decimal,
    pub kill_switch_check_interval_sec: u64,
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            kill_switch_threshold: Self::parse_decimal("KILL_SWITCH_THRESHOLD", "30.0")?,
            kill_switch_check_interval_sec: Self::parse_u64("KILL_SWITCH_CHECK_INTERVAL", 60)?,
        })
    }

    fn parse_u64(key: &str, default: u64) -> Result<u64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u64>()
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
        let cfg = RiskEnvConfig::from_env().expect("should parse with defaults");
        assert_eq!(cfg.kill_switch_check_interval_sec, 60);
    }
}
