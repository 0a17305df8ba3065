//! Exchange REST/WS endpoints and credentials.
//!
//! `api_key`/`api_secret` are required; everything else has a mainnet
//! default so a fresh checkout only needs two environment variables to
//! boot against the real exchange.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct ExchangeEnvConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub ws_public_url: String,
    pub ws_private_url: String,
    pub recv_window_ms: u64,
}

impl ExchangeEnvConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("BYBIT_API_KEY").context("BYBIT_API_KEY is required")?;
        let api_secret = env::var("BYBIT_API_SECRET").context("BYBIT_API_SECRET is required")?;
        let testnet = Self::parse_bool("BYBIT_TESTNET", false);

        let (default_base, default_ws_public, default_ws_private) = if testnet {
            (
                "https://api-testnet.bybit.com",
                "wss://stream-testnet.bybit.com/v5/public/linear",
                "wss://stream-testnet.bybit.com/v5/private",
            )
        } else {
            (
                "https://api.bybit.com",
                "wss://stream.bybit.com/v5/public/linear",
                "wss://stream.bybit.com/v5/private",
            )
        };

        Ok(Self {
            api_key,
            api_secret,
            base_url: env::var("BYBIT_BASE_URL").unwrap_or_else(|_| default_base.to_string()),
            ws_public_url: env::var("BYBIT_WS_PUBLIC_URL")
                .unwrap_or_else(|_| default_ws_public.to_string()),
            ws_private_url: env::var("BYBIT_WS_PRIVATE_URL")
                .unwrap_or_else(|_| default_ws_private.to_string()),
            recv_window_ms: Self::parse_u64("BYBIT_RECV_WINDOW_MS", 5000)?,
        })
    }

    fn parse_u64(key: &str, default: u64) -> Result<u64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u64>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_bool(key: &str, default: bool) -> bool {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<bool>()
            .unwrap_or(default)
    }
}
