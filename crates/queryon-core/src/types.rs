// Core data structures for the orchestrator layer

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::rules::FlowContext;

// ============================================
// Intents and strategies
// ============================================

/// Routing categories used to pick a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    Rag,
    Direct,
    Rule,
    Tool,
    Character,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Rag => "rag",
            IntentType::Direct => "direct",
            IntentType::Rule => "rule",
            IntentType::Tool => "tool",
            IntentType::Character => "character",
        }
    }

    /// The four classifiable intents (character is routing-selected)
    pub fn classifiable() -> [IntentType; 4] {
        [
            IntentType::Rag,
            IntentType::Direct,
            IntentType::Rule,
            IntentType::Tool,
        ]
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rag" => Ok(IntentType::Rag),
            "direct" => Ok(IntentType::Direct),
            "rule" => Ok(IntentType::Rule),
            "tool" => Ok(IntentType::Tool),
            "character" => Ok(IntentType::Character),
            _ => Err(()),
        }
    }
}

/// What to do when classification confidence is below the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowConfidenceStrategy {
    #[default]
    Fallback,
    AskUser,
}

/// What to do when a RAG turn arrives but no RAG service is wired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhenRagUnavailable {
    #[default]
    Direct,
    AskUser,
}

// ============================================
// Conversation turns
// ============================================

/// A single prior turn passed to classifiers and handlers as context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Turn {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Turn {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::System => "system",
        }
    }
}

// ============================================
// Classification output
// ============================================

/// Output of an intent classifier layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent: IntentType,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// "pre" | "embedding" | "llm" | "cache" | "flow_rule" | "rules_first" | "character"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_layer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl ClassificationResult {
    pub fn new(intent: IntentType, confidence: f64, layer: &str) -> Self {
        ClassificationResult {
            intent,
            confidence,
            reasoning: None,
            classifier_layer: Some(layer.to_string()),
            thinking: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

// ============================================
// Metrics
// ============================================

/// Timing and cost metrics for a single orchestrator call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorMetrics {
    pub classification_ms: f64,
    pub handler_ms: f64,
    pub total_ms: f64,
    pub llm_calls_count: u32,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_layer: Option<String>,
}

// ============================================
// Sources (RAG citations)
// ============================================

/// A knowledge-base citation attached to a RAG answer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

// ============================================
// Result metadata
// ============================================

/// A cancel or reschedule request detected on a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentAction {
    pub appt_number: String,
    /// "cancel" | "reschedule"
    pub action: String,
}

/// Structured side-channel data produced by handlers.
///
/// Handlers only *propose* here; the orchestrator is the sole writer of
/// durable state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Flow transition proposed by the rule engine (wins over any other source)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_flow_context: Option<FlowContext>,
    /// Fields newly captured for the appointment mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_update: Option<Map<String, Value>>,
    /// Fields newly captured for the order mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_update: Option<Map<String, Value>>,
    /// Fields newly captured for the reschedule mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reschedule_update: Option<Map<String, Value>>,
    /// Cancel request detected on this turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_cancel: Option<AppointmentAction>,
    /// Reschedule request detected on this turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reschedule_intent: Option<AppointmentAction>,
    /// Handler-level error note (timeout, provider failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Anything else (tool listings, diagnostics)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ResultMetadata {
    pub fn is_empty(&self) -> bool {
        self.next_flow_context.is_none()
            && self.appointment_update.is_none()
            && self.order_update.is_none()
            && self.reschedule_update.is_none()
            && self.appointment_cancel.is_none()
            && self.reschedule_intent.is_none()
            && self.error.is_none()
            && self.extra.is_empty()
    }

    pub fn with_error(msg: impl Into<String>) -> Self {
        ResultMetadata {
            error: Some(msg.into()),
            ..Default::default()
        }
    }
}

// ============================================
// Orchestrator result
// ============================================

/// Final output returned by the orchestrator for one turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorResult {
    pub query: String,
    pub intent: IntentType,
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_matched: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_called: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<OrchestratorMetrics>,
    pub needs_clarification: bool,
    pub fallback_used: bool,
    /// The intent the answer was rerouted away from (e.g. "rag" after an
    /// empty RAG answer fell back to direct)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_from_intent: Option<IntentType>,
    #[serde(default)]
    pub metadata: ResultMetadata,
}

impl OrchestratorResult {
    pub fn new(query: impl Into<String>, intent: IntentType) -> Self {
        OrchestratorResult {
            query: query.into(),
            intent,
            answer: None,
            sources: Vec::new(),
            rule_matched: None,
            tool_called: None,
            classification: None,
            metrics: None,
            needs_clarification: false,
            fallback_used: false,
            fallback_from_intent: None,
            metadata: ResultMetadata::default(),
        }
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }
}

// ============================================
// Field-collection schema
// ============================================

/// Typed validation applied to a collected field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldValidation {
    #[default]
    Text,
    Phone,
    Email,
    Date,
    Time,
    Number,
}

/// Conditional visibility: the field is only asked when the dependency
/// field's collected value matches one of the trigger values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowIf {
    pub field: String,
    #[serde(default)]
    pub value: ShowIfValue,
}

/// `show_if.value` accepts a single string or a list of strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShowIfValue {
    One(String),
    Many(Vec<String>),
}

impl Default for ShowIfValue {
    fn default() -> Self {
        ShowIfValue::Many(Vec::new())
    }
}

impl ShowIfValue {
    pub fn as_slice(&self) -> Vec<&str> {
        match self {
            ShowIfValue::One(v) => vec![v.as_str()],
            ShowIfValue::Many(vs) => vs.iter().map(|v| v.as_str()).collect(),
        }
    }
}

/// One entry in `appointment_fields` / `order_fields`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldDef {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<FieldValidation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_if: Option<ShowIf>,
}

impl FieldDef {
    pub fn label_or_key(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.key)
    }
}

// ============================================
// Orchestrator configuration
// ============================================

fn default_enabled_intents() -> Vec<IntentType> {
    vec![
        IntentType::Rag,
        IntentType::Direct,
        IntentType::Rule,
        IntentType::Tool,
    ]
}

fn default_intent() -> IntentType {
    IntentType::Rag
}

fn default_true() -> bool {
    true
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_embedding_threshold() -> f64 {
    0.85
}

fn default_llm_timeout() -> Option<f64> {
    Some(60.0)
}

fn default_max_turns() -> usize {
    10
}

/// User-configurable orchestrator behaviour, persisted as a single JSON row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub enabled_intents: Vec<IntentType>,
    pub default_intent: IntentType,
    pub rules_first: bool,
    pub fallback_to_direct: bool,

    pub min_confidence: f64,
    pub low_confidence_strategy: LowConfidenceStrategy,
    pub embedding_confidence_threshold: f64,
    pub when_rag_unavailable: WhenRagUnavailable,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification_prompt_override: Option<String>,

    /// Timeout for LLM calls (classification, direct answer, rule matching).
    /// None = no timeout.
    pub llm_timeout_seconds: Option<f64>,

    /// Max user+assistant pairs included as classification context. 0 = none.
    pub max_conversation_turns: usize,

    /// Route non-rule turns through the persona handler
    pub character_enabled: bool,
    pub character_system_prompt: String,
    /// Free text appended to the character prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<String>,

    pub appointment_fields: Vec<FieldDef>,
    pub order_mode_enabled: bool,
    pub order_fields: Vec<FieldDef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_webhook_secret: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            enabled_intents: default_enabled_intents(),
            default_intent: default_intent(),
            rules_first: default_true(),
            fallback_to_direct: default_true(),
            min_confidence: default_min_confidence(),
            low_confidence_strategy: LowConfidenceStrategy::Fallback,
            embedding_confidence_threshold: default_embedding_threshold(),
            when_rag_unavailable: WhenRagUnavailable::Direct,
            classification_prompt_override: None,
            llm_timeout_seconds: default_llm_timeout(),
            max_conversation_turns: default_max_turns(),
            character_enabled: false,
            character_system_prompt: String::new(),
            restrictions: None,
            appointment_fields: Vec::new(),
            order_mode_enabled: false,
            order_fields: Vec::new(),
            appointment_webhook_url: None,
            appointment_webhook_secret: None,
        }
    }
}

const KNOWN_CONFIG_KEYS: &[&str] = &[
    "enabled_intents",
    "default_intent",
    "rules_first",
    "fallback_to_direct",
    "min_confidence",
    "low_confidence_strategy",
    "embedding_confidence_threshold",
    "when_rag_unavailable",
    "classification_prompt_override",
    "llm_timeout_seconds",
    "max_conversation_turns",
    "character_enabled",
    "character_system_prompt",
    "restrictions",
    "appointment_fields",
    "order_mode_enabled",
    "order_fields",
    "appointment_webhook_url",
    "appointment_webhook_secret",
];

impl OrchestratorConfig {
    /// Serialize for JSON persistence
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Load from a JSON value. Missing keys use defaults; unknown keys are
    /// ignored but logged.
    pub fn from_value(data: Option<&Value>) -> Self {
        let Some(data) = data else {
            return OrchestratorConfig::default();
        };
        if let Some(obj) = data.as_object() {
            for key in obj.keys() {
                if !KNOWN_CONFIG_KEYS.contains(&key.as_str()) {
                    tracing::debug!(key = %key, "OrchestratorConfig: ignoring unknown key");
                }
            }
        }
        serde_json::from_value(data.clone()).unwrap_or_else(|e| {
            tracing::warn!("OrchestratorConfig: invalid payload, using defaults: {e}");
            OrchestratorConfig::default()
        })
    }

    pub fn llm_timeout(&self) -> Option<std::time::Duration> {
        self.llm_timeout_seconds
            .filter(|s| *s > 0.0)
            .map(std::time::Duration::from_secs_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let mut cfg = OrchestratorConfig::default();
        cfg.default_intent = IntentType::Direct;
        cfg.rules_first = false;
        cfg.min_confidence = 0.55;
        cfg.low_confidence_strategy = LowConfidenceStrategy::AskUser;
        cfg.llm_timeout_seconds = Some(12.5);
        cfg.appointment_webhook_url = Some("https://example.com/hook".into());
        cfg.appointment_fields = vec![FieldDef {
            key: "phone".into(),
            label: Some("Telefon".into()),
            required: true,
            validation: Some(FieldValidation::Phone),
            ..Default::default()
        }];

        let value = cfg.to_value();
        let back = OrchestratorConfig::from_value(Some(&value));
        assert_eq!(back.default_intent, IntentType::Direct);
        assert!(!back.rules_first);
        assert_eq!(back.min_confidence, 0.55);
        assert_eq!(back.low_confidence_strategy, LowConfidenceStrategy::AskUser);
        assert_eq!(back.llm_timeout_seconds, Some(12.5));
        assert_eq!(
            back.appointment_webhook_url.as_deref(),
            Some("https://example.com/hook")
        );
        assert_eq!(back.appointment_fields.len(), 1);
        assert_eq!(back.appointment_fields[0].key, "phone");
        assert_eq!(
            back.appointment_fields[0].validation,
            Some(FieldValidation::Phone)
        );
    }

    #[test]
    fn config_unknown_and_missing_keys() {
        let value = serde_json::json!({
            "default_intent": "direct",
            "some_future_field": 42,
        });
        let cfg = OrchestratorConfig::from_value(Some(&value));
        assert_eq!(cfg.default_intent, IntentType::Direct);
        // everything else defaulted
        assert!(cfg.rules_first);
        assert_eq!(cfg.max_conversation_turns, 10);
    }

    #[test]
    fn invalid_enum_values_fall_back_to_defaults() {
        let value = serde_json::json!({ "default_intent": "telepathy" });
        let cfg = OrchestratorConfig::from_value(Some(&value));
        assert_eq!(cfg.default_intent, IntentType::Rag);
    }

    #[test]
    fn show_if_value_accepts_string_or_list() {
        let one: ShowIf =
            serde_json::from_value(serde_json::json!({"field": "location", "value": "Şehir Dışı"}))
                .unwrap();
        assert_eq!(one.value.as_slice(), vec!["Şehir Dışı"]);

        let many: ShowIf = serde_json::from_value(
            serde_json::json!({"field": "location", "value": ["Stüdyo", "Otel / Ev"]}),
        )
        .unwrap();
        assert_eq!(many.value.as_slice().len(), 2);
    }
}
