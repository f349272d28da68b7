// RuleHandler: match user queries against deterministic rules

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::handlers::{Handler, HandlerContext};
use crate::rules::RuleEngine;
use crate::traits::LlmClient;
use crate::types::{IntentType, OrchestratorResult};

const LLM_MATCH_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Try keyword match, then optionally LLM-based match
pub struct RuleHandler {
    engine: Arc<RuleEngine>,
    llm: Option<Arc<dyn LlmClient>>,
    timeout: Option<Duration>,
}

impl RuleHandler {
    pub fn new(
        engine: Arc<RuleEngine>,
        llm: Option<Arc<dyn LlmClient>>,
        timeout: Option<Duration>,
    ) -> Self {
        RuleHandler {
            engine,
            llm,
            timeout,
        }
    }
}

#[async_trait]
impl Handler for RuleHandler {
    async fn handle(&self, query: &str, _ctx: &HandlerContext<'_>) -> OrchestratorResult {
        let matched = match &self.llm {
            Some(llm) => {
                self.engine
                    .match_with_llm(
                        query,
                        llm.as_ref(),
                        LLM_MATCH_CONFIDENCE_THRESHOLD,
                        self.timeout,
                        None,
                    )
                    .await
            }
            None => self.engine.matches(query, None),
        };

        let Some(m) = matched else {
            return OrchestratorResult::new(query, IntentType::Rule);
        };

        tracing::info!(rule = %m.rule_name, id = %m.rule_id, "RuleHandler: matched rule");
        let mut result =
            OrchestratorResult::new(query, IntentType::Rule).with_answer(m.rendered_answer);
        result.rule_matched = Some(m.rule_name);
        result.metadata.next_flow_context = m.next_flow_context;
        result
    }
}
