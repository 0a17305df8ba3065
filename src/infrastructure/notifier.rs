//! Telegram notifier: a fire-and-forget sink of human-readable strings.
//! Failures to notify are logged, never propagated as a trading error.

use crate::domain::ports::Notifier;
use crate::infrastructure::http_client_factory::build_client;
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use tracing::warn;

pub struct TelegramNotifier {
    client: ClientWithMiddleware,
    bot_token: String,
    chat_id: String,
    enabled: bool,
}

impl TelegramNotifier {
    pub fn new(bot_token: Option<String>, chat_id: Option<String>, enabled: bool) -> Self {
        Self {
            client: build_client(),
            bot_token: bot_token.unwrap_or_default(),
            chat_id: chat_id.unwrap_or_default(),
            enabled,
        }
    }

    async fn deliver(&self, text: &str) {
        if !self.enabled {
            return;
        }
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let result = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await;

        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "telegram notification rejected");
            }
            Err(e) => {
                warn!(error = %e, "failed to deliver telegram notification");
            }
            Ok(_) => {}
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) {
        self.deliver(text).await;
    }

    async fn send_bot_status(&self, text: &str) {
        self.deliver(&format!("🤖 {text}")).await;
    }

    async fn send_daily_summary(&self, text: &str) {
        self.deliver(&format!("📊 Daily summary\n{text}")).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_notifier_never_calls_out() {
        let notifier = TelegramNotifier::new(None, None, false);
        notifier.send("should be a no-op").await;
        notifier.send_bot_status("should be a no-op").await;
        notifier.send_daily_summary("should be a no-op").await;
    }
}
