// In-memory backends for tests and examples
//
// These mirror the production implementations closely enough to exercise the
// orchestrator's full per-turn path without a database or a live provider.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{QueryonError, Result};
use crate::traits::{
    ChatMessage, ConversationInfo, ConversationStore, EmbeddingClient, FlowBackend,
    FreeBusyProvider, IntakeOutcome, LlmClient, NewConversation, RagAnswer, RagService,
    SavedAppointment,
};
use crate::types::{IntentType, OrchestratorResult, Source, Turn, TurnRole};

// ============================================================================
// ScriptedLlm - returns canned responses in order
// ============================================================================

/// LLM stub that pops pre-loaded responses; panics-free (errors when empty)
#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ScriptedLlm {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| QueryonError::external("ScriptedLlm: no responses left"))
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let flat = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        self.complete(&flat).await
    }
}

// ============================================================================
// StaticRag - fixed answer (possibly empty)
// ============================================================================

pub struct StaticRag {
    pub answer: Option<String>,
    pub sources: Vec<Source>,
}

impl StaticRag {
    pub fn empty() -> Self {
        StaticRag {
            answer: None,
            sources: Vec::new(),
        }
    }

    pub fn with_answer(answer: impl Into<String>) -> Self {
        StaticRag {
            answer: Some(answer.into()),
            sources: Vec::new(),
        }
    }
}

#[async_trait]
impl RagService for StaticRag {
    async fn ask(&self, _query: &str) -> Result<RagAnswer> {
        Ok(RagAnswer {
            answer: self.answer.clone(),
            sources: self.sources.clone(),
        })
    }

    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<Source>> {
        Ok(self.sources.clone())
    }
}

// ============================================================================
// InMemoryConversationStore
// ============================================================================

#[derive(Clone)]
struct StoredMessage {
    role: TurnRole,
    content: String,
    intent: Option<IntentType>,
}

#[derive(Default)]
struct StoredConversation {
    info: Option<ConversationInfo>,
    messages: Vec<StoredMessage>,
    flow_state: Option<Value>,
}

/// Conversation store backed by a mutex-guarded map
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<Uuid, StoredConversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flow_state_of(&self, id: Uuid) -> Option<Value> {
        self.conversations
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|c| c.flow_state.clone())
    }

    pub fn message_count(&self, id: Uuid) -> usize {
        self.conversations
            .lock()
            .unwrap()
            .get(&id)
            .map(|c| c.messages.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn start(&self, attrs: NewConversation) -> Result<ConversationInfo> {
        let info = ConversationInfo {
            id: Uuid::now_v7(),
            platform: attrs.platform,
            channel_id: attrs.channel_id,
            status: "active".into(),
            message_count: 0,
        };
        self.conversations.lock().unwrap().insert(
            info.id,
            StoredConversation {
                info: Some(info.clone()),
                ..Default::default()
            },
        );
        Ok(info)
    }

    async fn close(&self, id: Uuid) -> Result<bool> {
        let mut map = self.conversations.lock().unwrap();
        match map.get_mut(&id).and_then(|c| c.info.as_mut()) {
            Some(info) => {
                info.status = "closed".into();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<ConversationInfo>> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|c| c.info.clone()))
    }

    async fn get_active_by_channel(
        &self,
        platform: &str,
        channel_id: &str,
    ) -> Result<Option<ConversationInfo>> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .values()
            .filter_map(|c| c.info.clone())
            .find(|i| {
                i.platform == platform
                    && i.channel_id.as_deref() == Some(channel_id)
                    && i.status == "active"
            }))
    }

    async fn history_as_turns(&self, id: Uuid, max_turns: usize) -> Result<Vec<Turn>> {
        let map = self.conversations.lock().unwrap();
        let Some(conv) = map.get(&id) else {
            return Ok(Vec::new());
        };
        let limit = max_turns * 2;
        let skip = conv.messages.len().saturating_sub(limit);
        Ok(conv.messages[skip..]
            .iter()
            .map(|m| Turn {
                role: m.role,
                content: m.content.clone(),
            })
            .collect())
    }

    async fn last_assistant_intent(&self, id: Uuid) -> Result<Option<IntentType>> {
        let map = self.conversations.lock().unwrap();
        Ok(map.get(&id).and_then(|c| {
            c.messages
                .iter()
                .rev()
                .find(|m| m.role == TurnRole::Assistant)
                .and_then(|m| m.intent)
        }))
    }

    async fn get_flow_state(&self, id: Uuid) -> Result<Option<Value>> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|c| c.flow_state.clone()))
    }

    async fn update_flow_state(&self, id: Uuid, flow_state: Option<Value>) -> Result<()> {
        if let Some(conv) = self.conversations.lock().unwrap().get_mut(&id) {
            conv.flow_state = flow_state;
        }
        Ok(())
    }

    async fn record_user_message(&self, id: Uuid, content: &str) -> Result<Uuid> {
        let mut map = self.conversations.lock().unwrap();
        let conv = map.entry(id).or_default();
        conv.messages.push(StoredMessage {
            role: TurnRole::User,
            content: content.to_string(),
            intent: None,
        });
        if let Some(info) = conv.info.as_mut() {
            info.message_count += 1;
        }
        Ok(Uuid::now_v7())
    }

    async fn record_assistant_message(
        &self,
        id: Uuid,
        result: &OrchestratorResult,
    ) -> Result<Uuid> {
        let mut map = self.conversations.lock().unwrap();
        let conv = map.entry(id).or_default();
        conv.messages.push(StoredMessage {
            role: TurnRole::Assistant,
            content: result.answer.clone().unwrap_or_default(),
            intent: Some(result.intent),
        });
        if let Some(info) = conv.info.as_mut() {
            info.message_count += 1;
        }
        Ok(Uuid::now_v7())
    }
}

// ============================================================================
// RecordingFlowBackend
// ============================================================================

/// Flow backend that records calls and returns scripted outcomes
pub struct RecordingFlowBackend {
    pub saved_appointments: Mutex<Vec<Map<String, Value>>>,
    pub saved_orders: Mutex<Vec<Map<String, Value>>>,
    pub cancels: Mutex<Vec<String>>,
    pub reschedules: Mutex<Vec<(String, Map<String, Value>)>>,
    pub appt_number: String,
    pub reschedule_outcome: IntakeOutcome,
    pub slots: Vec<String>,
}

impl Default for RecordingFlowBackend {
    fn default() -> Self {
        RecordingFlowBackend {
            saved_appointments: Mutex::new(Vec::new()),
            saved_orders: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            reschedules: Mutex::new(Vec::new()),
            appt_number: "RND-2026-0001".into(),
            reschedule_outcome: IntakeOutcome::Ok,
            slots: Vec::new(),
        }
    }
}

#[async_trait]
impl FlowBackend for RecordingFlowBackend {
    async fn save_appointment(
        &self,
        _conversation_id: Uuid,
        collected: &Map<String, Value>,
    ) -> Result<SavedAppointment> {
        self.saved_appointments.lock().unwrap().push(collected.clone());
        Ok(SavedAppointment {
            id: Uuid::now_v7(),
            appt_number: self.appt_number.clone(),
        })
    }

    async fn save_order(
        &self,
        _conversation_id: Uuid,
        collected: &Map<String, Value>,
    ) -> Result<Uuid> {
        self.saved_orders.lock().unwrap().push(collected.clone());
        Ok(Uuid::now_v7())
    }

    async fn cancel_appointment(
        &self,
        _conversation_id: Uuid,
        appt_number: &str,
    ) -> Result<IntakeOutcome> {
        self.cancels.lock().unwrap().push(appt_number.to_string());
        Ok(IntakeOutcome::Ok)
    }

    async fn reschedule_appointment(
        &self,
        _conversation_id: Uuid,
        appt_number: &str,
        updates: &Map<String, Value>,
    ) -> Result<IntakeOutcome> {
        self.reschedules
            .lock()
            .unwrap()
            .push((appt_number.to_string(), updates.clone()));
        Ok(self.reschedule_outcome.clone())
    }

    async fn availability_slots(
        &self,
        _artist: &str,
        _date: NaiveDate,
        _service: Option<&str>,
    ) -> Result<Vec<String>> {
        Ok(self.slots.clone())
    }
}

// ============================================================================
// Misc stubs
// ============================================================================

/// Embedding stub producing a constant vector
pub struct ConstantEmbedder(pub Vec<f32>);

#[async_trait]
impl EmbeddingClient for ConstantEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(self.0.clone())
    }
}

/// FreeBusy stub with fixed busy ranges
pub struct StaticFreeBusy(pub Vec<(NaiveTime, NaiveTime)>);

#[async_trait]
impl FreeBusyProvider for StaticFreeBusy {
    async fn freebusy(
        &self,
        _calendar_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<(NaiveTime, NaiveTime)>> {
        Ok(self.0.clone())
    }
}
