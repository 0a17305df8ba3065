//! Telegram notifier credentials.

use std::env;

#[derive(Debug, Clone)]
pub struct NotificationsEnvConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub enabled: bool,
}

impl NotificationsEnvConfig {
    pub fn from_env() -> Self {
        let telegram_bot_token = env::var("TELEGRAM_BOT_TOKEN").ok();
        let telegram_chat_id = env::var("TELEGRAM_CHAT_ID").ok();
        let requested = Self::parse_bool("NOTIFICATIONS_ENABLED", true);
        let enabled = requested && telegram_bot_token.is_some() && telegram_chat_id.is_some();

        Self {
            telegram_bot_token,
            telegram_chat_id,
            enabled,
        }
    }

    fn parse_bool(key: &str, default: bool) -> bool {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<bool>()
            .unwrap_or(default)
    }
}
