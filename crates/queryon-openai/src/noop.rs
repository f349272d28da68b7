// Noop LLM for deployments without a configured model

use async_trait::async_trait;

use queryon_core::error::Result;
use queryon_core::traits::{ChatMessage, LlmClient};

const NOOP_ANSWER: &str =
    "Şu anda yapılandırılmış bir dil modeli yok. Lütfen yönetim panelinden bir model etkinleştirin.";

/// Returns a fixed notice instead of calling a provider. Keeps the chat
/// surface alive while no model is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopLlm;

#[async_trait]
impl LlmClient for NoopLlm {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(NOOP_ANSWER.to_string())
    }

    async fn chat(&self, _messages: &[ChatMessage]) -> Result<String> {
        Ok(NOOP_ANSWER.to_string())
    }
}
