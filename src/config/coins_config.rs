//! Coin-universe sizing and stablecoin exclusion.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::env;

#[derive(Debug, Clone)]
pub struct CoinsEnvConfig {
    pub num_coins: usize,
    pub coin_refresh_interval_hours: i64,
    pub ha_history_candles: u32,
    pub excluded_stablecoins: HashSet<String>,
}

impl CoinsEnvConfig {
    pub fn from_env() -> Result<Self> {
        let excluded_default = "USDT,USDC,DAI,TUSD,FDUSD,USDE";
        let excluded_str =
            env::var("EXCLUDED_STABLECOINS").unwrap_or_else(|_| excluded_default.to_string());
        let excluded_stablecoins = excluded_str
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            num_coins: Self::parse_usize("NUM_COINS", 20)?,
            coin_refresh_interval_hours: Self::parse_i64("COIN_REFRESH_INTERVAL_HOURS", 4)?,
            ha_history_candles: Self::parse_u32("HA_HISTORY_CANDLES", 200)?,
            excluded_stablecoins,
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

    fn parse_i64(key: &str, default: i64) -> Result<i64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<i64>()
            .context(format!("Failed to parse {}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let cfg = CoinsEnvConfig::from_env().expect("should parse with defaults");
        assert_eq!(cfg.num_coins, 20);
        assert!(cfg.excluded_stablecoins.contains("USDT"));
    }
}
