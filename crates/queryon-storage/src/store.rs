// ConversationStore implementation over Postgres

use async_trait::async_trait;
use serde_json::{json, Value};
use std::str::FromStr;
use uuid::Uuid;

use queryon_core::error::{QueryonError, Result};
use queryon_core::traits::{ConversationInfo, ConversationStore, NewConversation};
use queryon_core::types::{IntentType, OrchestratorResult, Turn, TurnRole};

use crate::models::{CreateAssistantMessage, CreateConversation};
use crate::repositories::Database;

/// Durable conversation log backed by the shared `Database` facade.
/// Message inserts and the conversation counters commit in one transaction,
/// so per-conversation ordering is serialised by the storage layer.
#[derive(Clone)]
pub struct PgConversationStore {
    db: Database,
}

impl PgConversationStore {
    pub fn new(db: Database) -> Self {
        PgConversationStore { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn storage_err(e: anyhow::Error) -> QueryonError {
    QueryonError::storage(e.to_string())
}

fn info_of(row: crate::models::ConversationRow) -> ConversationInfo {
    ConversationInfo {
        id: row.id,
        platform: row.platform,
        channel_id: row.channel_id,
        status: row.status,
        message_count: row.message_count,
    }
}

/// Structured events extracted from an orchestrator result
fn build_events(result: &OrchestratorResult) -> Vec<(String, Option<Value>)> {
    let mut events = Vec::new();

    if let Some(classification) = &result.classification {
        events.push((
            "classification_result".to_string(),
            Some(json!({
                "intent": classification.intent.as_str(),
                "confidence": classification.confidence,
                "layer": classification.classifier_layer,
                "reasoning": classification.reasoning,
            })),
        ));
    }

    if let Some(rule_name) = &result.rule_matched {
        events.push((
            "rule_matched".to_string(),
            Some(json!({"rule_name": rule_name})),
        ));
    }

    if result.fallback_used {
        events.push((
            "fallback_triggered".to_string(),
            Some(json!({
                "from_intent": result
                    .fallback_from_intent
                    .map(|i| i.as_str())
                    .unwrap_or("rag"),
                "to_intent": result.intent.as_str(),
            })),
        ));
    }

    if result.needs_clarification {
        events.push((
            "low_confidence".to_string(),
            Some(json!({
                "confidence": result.classification.as_ref().map(|c| c.confidence),
            })),
        ));
    }

    if !result.sources.is_empty() {
        events.push((
            "rag_search".to_string(),
            Some(json!({"source_count": result.sources.len()})),
        ));
    }

    if let Some(metrics) = &result.metrics {
        events.push((
            "metrics".to_string(),
            Some(json!({
                "classification_ms": metrics.classification_ms,
                "handler_ms": metrics.handler_ms,
                "total_ms": metrics.total_ms,
                "llm_calls_count": metrics.llm_calls_count,
            })),
        ));
    }

    events
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn start(&self, attrs: NewConversation) -> Result<ConversationInfo> {
        let row = self
            .db
            .create_conversation(CreateConversation {
                platform: attrs.platform,
                channel_id: attrs.channel_id,
                contact_name: attrs.contact_name,
                contact_surname: attrs.contact_surname,
                contact_phone: attrs.contact_phone,
                contact_email: attrs.contact_email,
                contact_username: attrs.contact_username,
            })
            .await
            .map_err(storage_err)?;
        tracing::info!(conversation = %row.id, platform = %row.platform, "conversation started");
        Ok(info_of(row))
    }

    async fn close(&self, id: Uuid) -> Result<bool> {
        self.db.close_conversation(id).await.map_err(storage_err)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ConversationInfo>> {
        Ok(self
            .db
            .get_conversation(id)
            .await
            .map_err(storage_err)?
            .map(info_of))
    }

    async fn get_active_by_channel(
        &self,
        platform: &str,
        channel_id: &str,
    ) -> Result<Option<ConversationInfo>> {
        Ok(self
            .db
            .get_active_conversation_by_channel(platform, channel_id)
            .await
            .map_err(storage_err)?
            .map(info_of))
    }

    async fn history_as_turns(&self, id: Uuid, max_turns: usize) -> Result<Vec<Turn>> {
        let limit = (max_turns * 2) as i64;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = self
            .db
            .list_recent_messages(id, limit)
            .await
            .map_err(storage_err)?;
        Ok(rows
            .into_iter()
            .filter_map(|m| {
                let role = match m.role.as_str() {
                    "user" => TurnRole::User,
                    "assistant" => TurnRole::Assistant,
                    _ => return None,
                };
                Some(Turn {
                    role,
                    content: m.content,
                })
            })
            .collect())
    }

    async fn last_assistant_intent(&self, id: Uuid) -> Result<Option<IntentType>> {
        let intent = self
            .db
            .get_last_assistant_intent(id)
            .await
            .map_err(storage_err)?;
        Ok(intent.and_then(|s| IntentType::from_str(&s).ok()))
    }

    async fn get_flow_state(&self, id: Uuid) -> Result<Option<Value>> {
        self.db.get_flow_state(id).await.map_err(storage_err)
    }

    async fn update_flow_state(&self, id: Uuid, flow_state: Option<Value>) -> Result<()> {
        self.db
            .update_flow_state(id, flow_state)
            .await
            .map_err(storage_err)
    }

    async fn record_user_message(&self, id: Uuid, content: &str) -> Result<Uuid> {
        self.db
            .add_user_message(id, content)
            .await
            .map_err(storage_err)
    }

    async fn record_assistant_message(
        &self,
        id: Uuid,
        result: &OrchestratorResult,
    ) -> Result<Uuid> {
        let classification = result.classification.as_ref();
        let metrics = result.metrics.as_ref();

        let sources = if result.sources.is_empty() {
            None
        } else {
            serde_json::to_value(&result.sources).ok()
        };
        let extra_metadata = if result.metadata.is_empty() {
            None
        } else {
            serde_json::to_value(&result.metadata).ok()
        };

        let input = CreateAssistantMessage {
            content: result.answer.clone().unwrap_or_default(),
            intent: Some(result.intent.as_str().to_string()),
            confidence: classification.map(|c| c.confidence),
            classifier_layer: classification
                .and_then(|c| c.classifier_layer.clone())
                .or_else(|| metrics.and_then(|m| m.classifier_layer.clone())),
            rule_matched: result.rule_matched.clone(),
            fallback_used: result.fallback_used,
            needs_clarification: result.needs_clarification,
            total_ms: metrics.map(|m| m.total_ms),
            llm_calls_count: metrics.map(|m| m.llm_calls_count as i32).unwrap_or(0),
            sources,
            extra_metadata,
        };

        let events = build_events(result);
        self.db
            .add_assistant_message(id, input, events)
            .await
            .map_err(storage_err)
    }
}
