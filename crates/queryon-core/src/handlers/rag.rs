// RagHandler: delegates to the opaque retrieval pipeline

use async_trait::async_trait;
use std::sync::Arc;

use crate::handlers::{Handler, HandlerContext};
use crate::traits::RagService;
use crate::types::{IntentType, OrchestratorResult, ResultMetadata, Turn};

/// Wrap `RagService::ask` and return an `OrchestratorResult`.
///
/// An empty answer is reported as-is; the orchestrator decides whether to
/// fall back to the direct handler.
pub struct RagHandler {
    rag: Arc<dyn RagService>,
}

impl RagHandler {
    pub fn new(rag: Arc<dyn RagService>) -> Self {
        RagHandler { rag }
    }

    /// Prepend recent conversation turns so the retrieval pipeline can
    /// resolve pronouns and follow-up references.
    fn enrich_query(query: &str, history: Option<&[Turn]>) -> String {
        let Some(history) = history.filter(|h| !h.is_empty()) else {
            return query.to_string();
        };
        let context_lines: Vec<String> = history
            .iter()
            .rev()
            .take(4)
            .rev()
            .filter(|t| !t.content.trim().is_empty())
            .map(|t| {
                let content: String = t.content.trim().chars().take(200).collect();
                format!("{}: {}", t.role.as_str(), content)
            })
            .collect();
        if context_lines.is_empty() {
            return query.to_string();
        }
        format!(
            "Previous conversation:\n{}\n\nCurrent question: {query}",
            context_lines.join("\n")
        )
    }
}

#[async_trait]
impl Handler for RagHandler {
    async fn handle(&self, query: &str, ctx: &HandlerContext<'_>) -> OrchestratorResult {
        let enriched = Self::enrich_query(query, ctx.conversation_history);
        match self.rag.ask(&enriched).await {
            Ok(rag_answer) => {
                let mut result = OrchestratorResult::new(query, IntentType::Rag);
                result.answer = rag_answer.answer.filter(|a| !a.trim().is_empty());
                result.sources = rag_answer.sources;
                result
            }
            Err(e) => {
                tracing::error!("RagHandler: pipeline failed: {e}");
                let mut result = OrchestratorResult::new(query, IntentType::Rag);
                result.metadata = ResultMetadata::with_error(e.to_string());
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enriched_query_keeps_last_four_turns() {
        let history: Vec<Turn> = (0..6).map(|i| Turn::user(format!("mesaj {i}"))).collect();
        let enriched = RagHandler::enrich_query("onun fiyatı ne", Some(&history));
        assert!(!enriched.contains("mesaj 0"));
        assert!(!enriched.contains("mesaj 1"));
        assert!(enriched.contains("mesaj 2"));
        assert!(enriched.contains("mesaj 5"));
        assert!(enriched.ends_with("Current question: onun fiyatı ne"));
    }
}
