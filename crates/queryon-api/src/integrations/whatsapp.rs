// WhatsApp Business (Meta Cloud API) client - outbound message sending

use serde_json::json;
use std::time::Duration;

use super::chunk_message;

/// Sends replies through the Meta Cloud API
#[derive(Clone)]
pub struct WhatsAppClient {
    http: reqwest::Client,
    url: String,
    access_token: String,
}

impl WhatsAppClient {
    pub fn new(access_token: &str, phone_number_id: &str) -> Self {
        WhatsAppClient {
            http: reqwest::Client::new(),
            url: format!("https://graph.facebook.com/v21.0/{phone_number_id}/messages"),
            access_token: access_token.to_string(),
        }
    }

    /// Send `text` to `to` (E.164 phone number), splitting if needed
    pub async fn send_message(&self, to: &str, text: &str) {
        for chunk in chunk_message(text) {
            let payload = json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "text",
                "text": {"body": chunk},
            });
            let result = self
                .http
                .post(&self.url)
                .timeout(Duration::from_secs(15))
                .bearer_auth(&self.access_token)
                .json(&payload)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    tracing::warn!(
                        to = %to,
                        status = %resp.status(),
                        "WhatsAppClient: send failed"
                    );
                }
                Err(e) => {
                    tracing::warn!(to = %to, "WhatsAppClient: send failed: {e}");
                }
            }
        }
    }
}
