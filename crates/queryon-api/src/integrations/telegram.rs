// Telegram Bot API client - outbound message sending

use serde_json::json;
use std::time::Duration;

use super::chunk_message;

/// Sends replies through the Telegram Bot API
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        TelegramClient {
            http: reqwest::Client::new(),
            base: format!("https://api.telegram.org/bot{token}"),
        }
    }

    /// Send `text` to `chat_id`, splitting into chunks if needed
    pub async fn send_message(&self, chat_id: &str, text: &str) {
        for chunk in chunk_message(text) {
            let result = self
                .http
                .post(format!("{}/sendMessage", self.base))
                .timeout(Duration::from_secs(15))
                .json(&json!({"chat_id": chat_id, "text": chunk}))
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    tracing::warn!(
                        chat = %chat_id,
                        status = %resp.status(),
                        "TelegramClient: sendMessage failed"
                    );
                }
                Err(e) => {
                    tracing::warn!(chat = %chat_id, "TelegramClient: sendMessage failed: {e}");
                }
            }
        }
    }
}
