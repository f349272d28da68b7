// DirectHandler: plain LLM response without RAG context

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::handlers::{Handler, HandlerContext};
use crate::traits::LlmClient;
use crate::types::{IntentType, OrchestratorResult, ResultMetadata, Turn};

/// Send the query directly to the LLM and return the answer
pub struct DirectHandler {
    llm: Arc<dyn LlmClient>,
    timeout: Option<Duration>,
}

impl DirectHandler {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Option<Duration>) -> Self {
        DirectHandler { llm, timeout }
    }

    fn build_prompt(query: &str, history: Option<&[Turn]>) -> String {
        let Some(history) = history.filter(|h| !h.is_empty()) else {
            return query.to_string();
        };
        let mut lines: Vec<String> = history
            .iter()
            .filter(|t| !t.content.trim().is_empty())
            .map(|t| format!("{}: {}", t.role.as_str(), t.content.trim()))
            .collect();
        lines.push(format!("user: {query}"));
        lines.join("\n")
    }
}

#[async_trait]
impl Handler for DirectHandler {
    async fn handle(&self, query: &str, ctx: &HandlerContext<'_>) -> OrchestratorResult {
        let prompt = Self::build_prompt(query, ctx.conversation_history);

        let call = self.llm.complete(&prompt);
        let answer = match self.timeout {
            Some(t) => match tokio::time::timeout(t, call).await {
                Ok(r) => r,
                Err(_) => {
                    tracing::warn!("DirectHandler: LLM call timed out ({:.0}s)", t.as_secs_f64());
                    let mut result = OrchestratorResult::new(query, IntentType::Direct);
                    result.metadata = ResultMetadata::with_error("timeout");
                    return result;
                }
            },
            None => call.await,
        };

        match answer {
            Ok(answer) => OrchestratorResult::new(query, IntentType::Direct).with_answer(answer),
            Err(e) => {
                tracing::error!("DirectHandler: LLM call failed: {e}");
                let mut result = OrchestratorResult::new(query, IntentType::Direct);
                result.metadata = ResultMetadata::with_error(e.to_string());
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TurnRole;

    #[test]
    fn prompt_includes_flat_transcript() {
        let history = vec![
            Turn::user("merhaba"),
            Turn {
                role: TurnRole::Assistant,
                content: "Merhaba! Nasıl yardımcı olabilirim?".into(),
            },
        ];
        let prompt = DirectHandler::build_prompt("fiyat nedir", Some(&history));
        assert_eq!(
            prompt,
            "user: merhaba\nassistant: Merhaba! Nasıl yardımcı olabilirim?\nuser: fiyat nedir"
        );
    }

    #[test]
    fn prompt_without_history_is_the_query() {
        assert_eq!(DirectHandler::build_prompt("selam", None), "selam");
    }
}
