// Chat routes: send messages, manage conversations

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use queryon_core::traits::{ConversationStore, NewConversation};
use queryon_core::QueryonError;
use queryon_storage::Database;

use crate::error::{ApiError, ApiResult};
use crate::services::OrchestratorService;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub orchestrator: Arc<OrchestratorService>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatRequest {
    pub query: String,
    pub conversation_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatResponse {
    pub answer: String,
    pub intent: String,
    pub confidence: Option<f64>,
    pub classifier_layer: Option<String>,
    pub rule_matched: Option<String>,
    pub tool_called: Option<String>,
    pub fallback_used: bool,
    pub fallback_from_intent: Option<String>,
    pub needs_clarification: bool,
    pub total_ms: Option<f64>,
    pub conversation_id: Uuid,
    pub reasoning: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConversationCreateRequest {
    #[serde(default = "default_platform")]
    pub platform: String,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
}

fn default_platform() -> String {
    "web".to_string()
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConversationResponse {
    pub conversation_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListConversationsParams {
    pub status: Option<String>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConversationListItem {
    pub conversation_id: Uuid,
    pub platform: String,
    pub status: String,
    pub message_count: i32,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageSchema {
    pub id: Uuid,
    pub role: String,
    pub content: String,
    pub intent: Option<String>,
    pub confidence: Option<f64>,
    pub classifier_layer: Option<String>,
    pub rule_matched: Option<String>,
    pub fallback_used: bool,
    pub total_ms: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConversationHistoryResponse {
    pub conversation_id: Uuid,
    pub messages: Vec<MessageSchema>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat", post(chat))
        .route(
            "/v1/chat/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route(
            "/v1/chat/conversations/:conversation_id",
            get(get_conversation_history).delete(close_conversation),
        )
        .with_state(state)
}

/// POST /v1/chat - run one orchestrated turn
#[utoipa::path(
    post,
    path = "/v1/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Assistant reply", body = ChatResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "chat"
)]
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    if req.query.trim().is_empty() {
        return Err(ApiError(QueryonError::validation("query must not be empty")));
    }

    let orchestrator = state.orchestrator.orchestrator();
    let store = queryon_storage::PgConversationStore::new((*state.db).clone());

    // Create a conversation if none was provided, or the given one no longer
    // exists.
    let conversation_id = match req.conversation_id {
        Some(id) if store.get(id).await?.is_some() => id,
        _ => {
            store
                .start(NewConversation {
                    platform: "web".into(),
                    ..Default::default()
                })
                .await?
                .id
        }
    };

    let result = orchestrator
        .process_with_tracking(&req.query, conversation_id)
        .await?;

    Ok(Json(ChatResponse {
        answer: result.answer.unwrap_or_default(),
        intent: result.intent.as_str().to_string(),
        confidence: result.classification.as_ref().map(|c| c.confidence),
        classifier_layer: result
            .classification
            .as_ref()
            .and_then(|c| c.classifier_layer.clone()),
        rule_matched: result.rule_matched,
        tool_called: result.tool_called,
        fallback_used: result.fallback_used,
        fallback_from_intent: result.fallback_from_intent.map(|i| i.as_str().to_string()),
        needs_clarification: result.needs_clarification,
        total_ms: result.metrics.map(|m| m.total_ms),
        conversation_id,
        reasoning: result.classification.and_then(|c| c.reasoning),
    }))
}

/// POST /v1/chat/conversations - create a tracked conversation
#[utoipa::path(
    post,
    path = "/v1/chat/conversations",
    request_body = ConversationCreateRequest,
    responses(
        (status = 201, description = "Conversation created", body = ConversationResponse)
    ),
    tag = "chat"
)]
pub async fn create_conversation(
    State(state): State<AppState>,
    Json(req): Json<ConversationCreateRequest>,
) -> ApiResult<(StatusCode, Json<ConversationResponse>)> {
    let store = queryon_storage::PgConversationStore::new((*state.db).clone());
    let info = store
        .start(NewConversation {
            platform: req.platform,
            contact_name: req.contact_name,
            contact_phone: req.contact_phone,
            contact_email: req.contact_email,
            ..Default::default()
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse {
            conversation_id: info.id,
        }),
    ))
}

/// GET /v1/chat/conversations - recent conversations for the admin panel
#[utoipa::path(
    get,
    path = "/v1/chat/conversations",
    responses(
        (status = 200, description = "Conversations ordered by last activity", body = Vec<ConversationListItem>)
    ),
    tag = "chat"
)]
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(params): Query<ListConversationsParams>,
) -> ApiResult<Json<Vec<ConversationListItem>>> {
    let rows = state
        .db
        .list_conversations(params.status.as_deref(), params.skip, params.limit.min(500))
        .await?;
    Ok(Json(
        rows.into_iter()
            .map(|c| ConversationListItem {
                conversation_id: c.id,
                platform: c.platform,
                status: c.status,
                message_count: c.message_count,
                contact_name: c.contact_name,
                contact_phone: c.contact_phone,
                contact_email: c.contact_email,
                last_message_at: c.last_message_at,
                created_at: c.created_at,
            })
            .collect(),
    ))
}

/// GET /v1/chat/conversations/:id - full message history
#[utoipa::path(
    get,
    path = "/v1/chat/conversations/{conversation_id}",
    params(("conversation_id" = Uuid, Path, description = "Conversation ID")),
    responses(
        (status = 200, description = "Conversation history", body = ConversationHistoryResponse),
        (status = 404, description = "Conversation not found")
    ),
    tag = "chat"
)]
pub async fn get_conversation_history(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<ConversationHistoryResponse>> {
    let conversation = state
        .db
        .get_conversation(conversation_id)
        .await?
        .ok_or_else(|| ApiError(QueryonError::not_found("conversation not found")))?;

    let messages = state.db.list_messages(conversation.id).await?;
    Ok(Json(ConversationHistoryResponse {
        conversation_id,
        messages: messages
            .into_iter()
            .map(|m| MessageSchema {
                id: m.id,
                role: m.role,
                content: m.content,
                intent: m.intent,
                confidence: m.confidence,
                classifier_layer: m.classifier_layer,
                rule_matched: m.rule_matched,
                fallback_used: m.fallback_used,
                total_ms: m.total_ms,
                created_at: m.created_at,
            })
            .collect(),
    }))
}

/// DELETE /v1/chat/conversations/:id - close a conversation
#[utoipa::path(
    delete,
    path = "/v1/chat/conversations/{conversation_id}",
    params(("conversation_id" = Uuid, Path, description = "Conversation ID")),
    responses(
        (status = 204, description = "Conversation closed"),
        (status = 404, description = "Conversation not found")
    ),
    tag = "chat"
)]
pub async fn close_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let closed = state.db.close_conversation(conversation_id).await?;
    if !closed {
        return Err(ApiError(QueryonError::not_found("conversation not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}
