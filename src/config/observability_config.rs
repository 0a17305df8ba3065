//! Logging format/level and metrics push cadence.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub log_format: String,
    pub log_level: String,
    pub metrics_push_interval_sec: u64,
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            metrics_push_interval_sec: Self::parse_u64("METRICS_PUSH_INTERVAL_SEC", 30)?,
        })
    }

    fn parse_u64(key: &str, default: u64) -> Result<u64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u64>()
            .context(format!("Failed to parse {}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let cfg = ObservabilityEnvConfig::from_env().expect("should parse with defaults");
        assert_eq!(cfg.metrics_push_interval_sec, 30);
    }
}
