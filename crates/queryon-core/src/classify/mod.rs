// Three-layer classification cascade:
//   Layer 1  PreClassifier       - keyword/pattern matching      (no LLM)
//   Layer 2  EmbeddingClassifier - cosine similarity prototypes  (no LLM)
//   Layer 3  LlmClassifier       - full LLM classification, cached

mod cache;
mod embedding;
mod llm;
mod pre;

pub use cache::ClassificationCache;
pub use embedding::EmbeddingClassifier;
pub use llm::{parse_classification, ClassifyRequest, LlmClassifier};
pub use pre::PreClassifier;
