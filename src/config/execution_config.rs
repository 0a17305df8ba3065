//! Order-fill protocol and cooldown timing.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct ExecutionEnvConfig {
    pub fill_timeout_sec: u64,
    pub max_fill_retries: u32,
    pub cooldown_minutes: i64,
    pub post_only_retries: u32,
    pub dry_run: bool,
}

impl ExecutionEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            fill_timeout_sec: Self::parse_u64("FILL_TIMEOUT_SEC", 15)?,
            max_fill_retries: Self::parse_u32("MAX_FILL_RETRIES", 3)?,
            cooldown_minutes: Self::parse_i64("COOLDOWN_MINUTES", 30)?,
            post_only_retries: Self::parse_u32("POST_ONLY_RETRIES", 2)?,
            dry_run: Self::parse_bool("DRY_RUN", true),
        })
    }

    fn parse_u64(key: &str, default: u64) -> Result<u64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u64>()
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

    fn parse_bool(key: &str, default: bool) -> bool {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<bool>()
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let cfg = ExecutionEnvConfig::from_env().expect("should parse with defaults");
        assert_eq!(cfg.max_fill_retries, 3);
        assert!(cfg.dry_run);
    }
}
