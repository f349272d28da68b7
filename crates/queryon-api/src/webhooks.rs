// Public webhook endpoints for Telegram and WhatsApp
//
// These routes live under /webhooks/ (not /v1/) so they sit outside the
// admin surface - the providers do not know our internal key. Both handlers
// validate the payload, return HTTP 200 immediately, and hand the turn to a
// detached task: WhatsApp requires an ack within 20 s, Telegram within 60 s,
// and an LLM turn can take longer than either.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use queryon_core::traits::{ConversationStore, NewConversation};
use queryon_storage::PgConversationStore;

use crate::integrations::{TelegramClient, WhatsAppClient};
use crate::services::OrchestratorService;

/// Channel credentials resolved once at startup from the environment
#[derive(Clone, Default)]
pub struct ChannelConfig {
    pub telegram_bot_token: Option<String>,
    pub whatsapp_access_token: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
    pub whatsapp_verify_token: Option<String>,
}

impl ChannelConfig {
    pub fn from_env() -> Self {
        fn non_empty(key: &str) -> Option<String> {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }
        ChannelConfig {
            telegram_bot_token: non_empty("TELEGRAM_BOT_TOKEN"),
            whatsapp_access_token: non_empty("WHATSAPP_ACCESS_TOKEN"),
            whatsapp_phone_number_id: non_empty("WHATSAPP_PHONE_NUMBER_ID"),
            whatsapp_verify_token: non_empty("WHATSAPP_VERIFY_TOKEN"),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PgConversationStore>,
    pub orchestrator: Arc<OrchestratorService>,
    pub channels: ChannelConfig,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/telegram", post(telegram_inbound))
        .route("/webhooks/whatsapp", get(whatsapp_verify).post(whatsapp_inbound))
        .with_state(state)
}

async fn resolve_conversation(
    store: &PgConversationStore,
    platform: &str,
    channel_id: &str,
    contact_name: Option<String>,
    contact_phone: Option<String>,
    contact_username: Option<String>,
) -> queryon_core::Result<Uuid> {
    if let Some(existing) = store.get_active_by_channel(platform, channel_id).await? {
        return Ok(existing.id);
    }
    let info = store
        .start(NewConversation {
            platform: platform.to_string(),
            channel_id: Some(channel_id.to_string()),
            contact_name,
            contact_phone,
            contact_username,
            ..Default::default()
        })
        .await?;
    Ok(info.id)
}

// ── Telegram ─────────────────────────────────────────────────────────────────

/// POST /webhooks/telegram - receive Telegram Update objects
async fn telegram_inbound(
    State(state): State<AppState>,
    Json(update): Json<Value>,
) -> impl IntoResponse {
    let Some(token) = state.channels.telegram_bot_token.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"detail": "Telegram integration not configured"})),
        )
            .into_response();
    };

    // Non-text updates (photos, joins, edits) are acked and dropped
    let message = update.get("message");
    let Some(text) = message
        .and_then(|m| m.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        return StatusCode::OK.into_response();
    };
    let Some(chat_id) = message
        .and_then(|m| m.get("chat"))
        .and_then(|c| c.get("id"))
        .map(|id| id.to_string())
    else {
        tracing::warn!("webhooks: Telegram payload missing chat id");
        return StatusCode::OK.into_response();
    };
    let from = message.and_then(|m| m.get("from"));
    let contact_name = from
        .and_then(|f| f.get("first_name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    // Stored as @username; Telegram usernames are unique identifiers
    let contact_username = from
        .and_then(|f| f.get("username"))
        .and_then(Value::as_str)
        .map(|u| format!("@{u}"));

    let store = state.store.clone();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let client = TelegramClient::new(&token);
        let conversation_id = match resolve_conversation(
            &store,
            "telegram",
            &chat_id,
            contact_name,
            None,
            contact_username,
        )
        .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("webhooks: Telegram conversation setup failed: {e}");
                return;
            }
        };
        match orchestrator
            .orchestrator()
            .process_with_tracking(&text, conversation_id)
            .await
        {
            Ok(result) => {
                client
                    .send_message(&chat_id, result.answer.as_deref().unwrap_or(""))
                    .await;
            }
            Err(e) => {
                tracing::error!(chat = %chat_id, "webhooks: Telegram turn failed: {e}");
            }
        }
    });

    StatusCode::OK.into_response()
}

// ── WhatsApp ─────────────────────────────────────────────────────────────────

/// Handshake decision: the challenge to echo back, or None for 403
fn verify_handshake(verify_token: &str, params: &HashMap<String, String>) -> Option<String> {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    if mode == Some("subscribe") && token == Some(verify_token) {
        Some(params.get("hub.challenge").cloned().unwrap_or_default())
    } else {
        None
    }
}

/// GET /webhooks/whatsapp - Meta webhook verification handshake
async fn whatsapp_verify(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(verify_token) = &state.channels.whatsapp_verify_token else {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"detail": "WHATSAPP_VERIFY_TOKEN not configured"})),
        )
            .into_response();
    };

    match verify_handshake(verify_token, &params) {
        Some(challenge) => {
            tracing::info!("webhooks: WhatsApp verification succeeded");
            challenge.into_response()
        }
        None => {
            tracing::warn!("webhooks: WhatsApp verification failed (token mismatch or wrong mode)");
            (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({"detail": "Verification failed"})),
            )
                .into_response()
        }
    }
}

/// POST /webhooks/whatsapp - receive WhatsApp Business messages
async fn whatsapp_inbound(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let (Some(access_token), Some(phone_number_id)) = (
        state.channels.whatsapp_access_token.clone(),
        state.channels.whatsapp_phone_number_id.clone(),
    ) else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"detail": "WhatsApp integration not configured"})),
        )
            .into_response();
    };

    // entry[0].changes[0].value.messages[0]; anything else is acked silently
    let value = body
        .get("entry")
        .and_then(|e| e.get(0))
        .and_then(|e| e.get("changes"))
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("value"));
    let Some(message) = value
        .and_then(|v| v.get("messages"))
        .and_then(|m| m.get(0))
    else {
        return StatusCode::OK.into_response();
    };
    if message.get("type").and_then(Value::as_str) != Some("text") {
        return StatusCode::OK.into_response();
    }
    let (Some(from), Some(text)) = (
        message.get("from").and_then(Value::as_str).map(str::to_string),
        message
            .get("text")
            .and_then(|t| t.get("body"))
            .and_then(Value::as_str)
            .map(str::to_string),
    ) else {
        tracing::warn!("webhooks: WhatsApp payload parse error");
        return StatusCode::OK.into_response();
    };
    let contact_name = value
        .and_then(|v| v.get("contacts"))
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("profile"))
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let store = state.store.clone();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let client = WhatsAppClient::new(&access_token, &phone_number_id);
        // The sender's E.164 number is both the channel id and the contact
        let conversation_id = match resolve_conversation(
            &store,
            "whatsapp",
            &from,
            contact_name,
            Some(from.clone()),
            Some(from.clone()),
        )
        .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("webhooks: WhatsApp conversation setup failed: {e}");
                return;
            }
        };
        match orchestrator
            .orchestrator()
            .process_with_tracking(&text, conversation_id)
            .await
        {
            Ok(result) => {
                client
                    .send_message(&from, result.answer.as_deref().unwrap_or(""))
                    .await;
            }
            Err(e) => {
                tracing::error!(to = %from, "webhooks: WhatsApp turn failed: {e}");
            }
        }
    });

    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn handshake_echoes_challenge_on_matching_token() {
        let p = params(&[
            ("hub.mode", "subscribe"),
            ("hub.verify_token", "sekrit"),
            ("hub.challenge", "CH"),
        ]);
        assert_eq!(verify_handshake("sekrit", &p), Some("CH".to_string()));
    }

    #[test]
    fn handshake_rejects_wrong_token_or_mode() {
        let wrong_token = params(&[
            ("hub.mode", "subscribe"),
            ("hub.verify_token", "guess"),
            ("hub.challenge", "CH"),
        ]);
        assert_eq!(verify_handshake("sekrit", &wrong_token), None);

        let wrong_mode = params(&[
            ("hub.mode", "unsubscribe"),
            ("hub.verify_token", "sekrit"),
            ("hub.challenge", "CH"),
        ]);
        assert_eq!(verify_handshake("sekrit", &wrong_mode), None);
    }
}
