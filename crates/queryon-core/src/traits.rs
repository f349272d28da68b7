// Core traits for pluggable backends
//
// These traits allow the orchestrator to be used with different backends:
// - In-memory implementations for tests
// - Database / HTTP-provider implementations for production

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{IntentType, OrchestratorResult, Source, Turn};

// ============================================================================
// LlmClient - chat-completion provider
// ============================================================================

/// A single message in a chat-completion request
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// "system" | "user" | "assistant"
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Trait for LLM completion providers
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single-prompt completion
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Multi-message chat completion. The default flattens the transcript
    /// into one prompt for providers that only expose `complete`.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let prompt = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        self.complete(&prompt).await
    }
}

// ============================================================================
// EmbeddingClient - vector embedding provider
// ============================================================================

/// Trait for text-embedding providers
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a single query string
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }
}

// ============================================================================
// RagService - opaque retrieval pipeline
// ============================================================================

/// Answer produced by the retrieval pipeline
#[derive(Debug, Clone, Default)]
pub struct RagAnswer {
    pub answer: Option<String>,
    pub sources: Vec<Source>,
}

/// Trait for the knowledge-base question-answering pipeline
#[async_trait]
pub trait RagService: Send + Sync {
    async fn ask(&self, query: &str) -> Result<RagAnswer>;

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Source>>;
}

// ============================================================================
// FreeBusyProvider - external calendar busy-times
// ============================================================================

/// Trait over the external calendar provider's freebusy query.
///
/// Implementations return busy intervals (local times) for the requested
/// window. Failures should be logged by the caller and degrade to "no
/// additional busy" — never fatal to the turn.
#[async_trait]
pub trait FreeBusyProvider: Send + Sync {
    async fn freebusy(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(NaiveTime, NaiveTime)>>;
}

// ============================================================================
// ConversationStore - durable conversation log
// ============================================================================

/// Attributes for creating a conversation
#[derive(Debug, Clone, Default)]
pub struct NewConversation {
    pub platform: String,
    pub channel_id: Option<String>,
    pub contact_name: Option<String>,
    pub contact_surname: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub contact_username: Option<String>,
}

/// Minimal conversation view the orchestrator needs
#[derive(Debug, Clone)]
pub struct ConversationInfo {
    pub id: Uuid,
    pub platform: String,
    pub channel_id: Option<String>,
    pub status: String,
    pub message_count: i32,
}

/// Trait for the durable conversation log consumed by the orchestrator.
///
/// All operations are transactional in the backing implementation; the
/// orchestrator never attempts partial persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn start(&self, attrs: NewConversation) -> Result<ConversationInfo>;

    async fn close(&self, id: Uuid) -> Result<bool>;

    async fn get(&self, id: Uuid) -> Result<Option<ConversationInfo>>;

    async fn get_active_by_channel(
        &self,
        platform: &str,
        channel_id: &str,
    ) -> Result<Option<ConversationInfo>>;

    /// Last `max_turns` user/assistant pairs, oldest first
    async fn history_as_turns(&self, id: Uuid, max_turns: usize) -> Result<Vec<Turn>>;

    /// Intent of the most recent assistant message, if any
    async fn last_assistant_intent(&self, id: Uuid) -> Result<Option<IntentType>>;

    async fn get_flow_state(&self, id: Uuid) -> Result<Option<Value>>;

    /// Persist a new flow_state, or clear it by passing None
    async fn update_flow_state(&self, id: Uuid, flow_state: Option<Value>) -> Result<()>;

    /// Record a user message (also bumps message_count / last_message_at)
    async fn record_user_message(&self, id: Uuid, content: &str) -> Result<Uuid>;

    /// Record the orchestrator result as an assistant message with events
    async fn record_assistant_message(
        &self,
        id: Uuid,
        result: &OrchestratorResult,
    ) -> Result<Uuid>;
}

// ============================================================================
// FlowBackend - durable side effects of completed flows
// ============================================================================

/// A saved appointment, as reported back to the flow engine
#[derive(Debug, Clone)]
pub struct SavedAppointment {
    pub id: Uuid,
    pub appt_number: String,
}

/// Outcome of a cancel/reschedule request made through the chat surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    Ok,
    NotFound,
    Unauthorized,
    AlreadyCancelled,
    Conflict,
}

/// Trait for the intake side effects the orchestrator triggers when a flow
/// confirms: saving appointments/orders, cancel/reschedule by reference
/// number, and availability lookups for slot injection.
#[async_trait]
pub trait FlowBackend: Send + Sync {
    async fn save_appointment(
        &self,
        conversation_id: Uuid,
        collected: &Map<String, Value>,
    ) -> Result<SavedAppointment>;

    async fn save_order(
        &self,
        conversation_id: Uuid,
        collected: &Map<String, Value>,
    ) -> Result<Uuid>;

    async fn cancel_appointment(
        &self,
        conversation_id: Uuid,
        appt_number: &str,
    ) -> Result<IntakeOutcome>;

    /// Apply date/time/artist updates to an existing appointment. Returns
    /// `Conflict` when the target slot is already busy.
    async fn reschedule_appointment(
        &self,
        conversation_id: Uuid,
        appt_number: &str,
        updates: &Map<String, Value>,
    ) -> Result<IntakeOutcome>;

    /// Free slot start times ("HH:MM") for an artist on a date
    async fn availability_slots(
        &self,
        artist: &str,
        date: NaiveDate,
        service: Option<&str>,
    ) -> Result<Vec<String>>;
}
