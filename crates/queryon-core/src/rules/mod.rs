// Deterministic rule matching and multi-step flows

mod engine;

pub use engine::{RuleEngine, RuleMatch};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A deterministic rule that can override LLM-based classification.
///
/// When a user message matches one of the `trigger_patterns`, the
/// orchestrator returns the rendered `response_template` immediately without
/// calling the LLM or RAG pipeline.
///
/// Rules with `flow_id` and `step_key` participate in stateful multi-step
/// flows. `required_step` gates the rule so it only fires when the user is at
/// a specific step; `next_steps` maps user choices to the next step key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    /// Also fed to the LLM classifier so it understands when this rule fires
    pub description: String,
    /// Plain substrings by default; `r:` prefix marks a regex; `*` matches
    /// any non-empty input
    pub trigger_patterns: Vec<String>,
    /// Answer template with `{variable}` placeholders filled from `variables`
    pub response_template: String,
    pub variables: Map<String, Value>,
    /// Higher priority rules are checked first
    pub priority: i32,
    pub is_active: bool,
    /// Which flow this rule belongs to. None = standalone rule.
    pub flow_id: Option<String>,
    /// This rule's step name within the flow
    pub step_key: Option<String>,
    /// The step the user must be at for this rule to fire.
    /// None = entry point (no prerequisite).
    pub required_step: Option<String>,
    /// Maps user choices to the next step_key; `*` is a catch-all.
    /// None = flow ends after this rule.
    pub next_steps: Option<BTreeMap<String, String>>,
}

impl Rule {
    pub fn is_flow_rule(&self) -> bool {
        self.flow_id.is_some()
    }
}

/// Snapshot of the user's current position inside a multi-step flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowContext {
    pub flow_id: Option<String>,
    pub current_step: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Maps step_key -> user's raw answer at that step
    #[serde(default)]
    pub selections: BTreeMap<String, String>,
}

impl FlowContext {
    pub fn active(&self) -> bool {
        self.flow_id.is_some()
    }

    /// Serialize to the persisted form; an inactive context serializes to None
    pub fn to_value(&self) -> Option<Value> {
        if !self.active() {
            return None;
        }
        serde_json::to_value(self).ok()
    }

    /// Read a flow context from a persisted flow_state map
    pub fn from_map(map: &Map<String, Value>) -> FlowContext {
        let value = Value::Object(map.clone());
        FlowContext::from_value(Some(&value))
    }

    /// Read the context back from a persisted flow_state object (which may
    /// also carry mode-collection keys this type does not know about)
    pub fn from_value(value: Option<&Value>) -> FlowContext {
        let Some(value) = value else {
            return FlowContext::default();
        };
        let Some(obj) = value.as_object() else {
            return FlowContext::default();
        };
        FlowContext {
            flow_id: obj
                .get("flow_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            current_step: obj
                .get("current_step")
                .and_then(Value::as_str)
                .map(str::to_string),
            data: obj
                .get("data")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            selections: obj
                .get("selections")
                .and_then(Value::as_object)
                .map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_context_serializes_to_none() {
        assert_eq!(FlowContext::default().to_value(), None);
    }

    #[test]
    fn flow_context_round_trips() {
        let mut ctx = FlowContext {
            flow_id: Some("hizmet".into()),
            current_step: Some("start".into()),
            ..Default::default()
        };
        ctx.data
            .insert("last_query".into(), Value::String("hizmet".into()));
        ctx.selections.insert("start".into(), "A".into());

        let value = ctx.to_value().expect("active context serializes");
        let back = FlowContext::from_value(Some(&value));
        assert_eq!(back, ctx);
    }

    #[test]
    fn from_value_ignores_mode_keys() {
        let value = serde_json::json!({
            "flow_id": "hizmet",
            "current_step": "start",
            "active_mode": "appointment",
            "appointment": {"name": "Ada"},
        });
        let ctx = FlowContext::from_value(Some(&value));
        assert_eq!(ctx.flow_id.as_deref(), Some("hizmet"));
        assert_eq!(ctx.current_step.as_deref(), Some("start"));
        assert!(ctx.data.is_empty());
    }
}
