// OpenAI-compatible providers
//
// Implements the core LlmClient / EmbeddingClient traits over the
// /chat/completions and /embeddings JSON endpoints. Any provider speaking
// the OpenAI wire format works by pointing base_url somewhere else.

mod client;
mod embedding;
mod noop;

pub use client::OpenAiClient;
pub use embedding::OpenAiEmbeddingClient;
pub use noop::NoopLlm;

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
