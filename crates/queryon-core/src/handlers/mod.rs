// Intent handlers
//
// One handler per intent. Handlers are pure with respect to persistence -
// they return a result (answer + proposed metadata) and the orchestrator is
// the sole writer of durable state.

mod character;
mod direct;
mod rag;
mod rule;
mod tool;

pub use character::CharacterHandler;
pub use direct::DirectHandler;
pub use rag::RagHandler;
pub use rule::RuleHandler;
pub use tool::{ToolDefinition, ToolHandler, ToolRegistry};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::flow::Mode;
use crate::types::{OrchestratorResult, Turn};

/// Per-turn context passed to every handler
#[derive(Default)]
pub struct HandlerContext<'a> {
    pub conversation_history: Option<&'a [Turn]>,
    /// Mode-context block computed by the flow engine (character handler)
    pub mode_context: Option<&'a str>,
    pub active_mode: Option<Mode>,
    pub appt_collected: Option<&'a Map<String, Value>>,
    pub order_collected: Option<&'a Map<String, Value>>,
    pub reschedule_collected: Option<&'a Map<String, Value>>,
    /// field key -> live availability slots to inject ("HH:MM" strings)
    pub availability_slots: HashMap<String, Vec<String>>,
}

/// Every intent handler implements `handle` and returns a result
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, query: &str, ctx: &HandlerContext<'_>) -> OrchestratorResult;
}
