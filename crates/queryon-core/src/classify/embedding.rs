// Layer 2: embedding-based intent classifier - cosine similarity against
// prototype queries per intent type. Fast and LLM-free.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::traits::EmbeddingClient;
use crate::types::{ClassificationResult, IntentType};

fn default_examples() -> Vec<(IntentType, Vec<&'static str>)> {
    vec![
        (
            IntentType::Rag,
            vec![
                "Dokümanlarda bu konu hakkında ne yazıyor?",
                "Bilgi tabanında bu konuyla ilgili bilgi var mı?",
                "Yüklenen dosyalara göre cevap ver.",
                "What does the documentation say about this?",
                "Search the knowledge base for this topic.",
            ],
        ),
        (
            IntentType::Direct,
            vec![
                "Python'da list comprehension nasıl yazılır?",
                "Merhaba, nasılsın?",
                "Bu cümleyi İngilizce'ye çevir.",
                "Özet çıkar.",
                "What is the capital of France?",
                "Explain quantum computing simply.",
            ],
        ),
        (
            IntentType::Rule,
            vec![
                "Randevu almak istiyorum.",
                "Çalışma saatleriniz nedir?",
                "Fiyat listesi nedir?",
                "İletişim bilgileriniz nelerdir?",
                "What are your business hours?",
            ],
        ),
        (
            IntentType::Tool,
            vec![
                "Bu veriyi analiz et.",
                "Grafik oluştur.",
                "Veritabanını sorgula.",
                "Run this query.",
                "Execute the report.",
            ],
        ),
    ]
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm_a < 1e-12 || norm_b < 1e-12 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Classify intent by comparing the query embedding against prototype
/// embeddings. Prototypes are built once via `build_prototypes` and reused
/// for every call.
pub struct EmbeddingClassifier {
    embedder: Arc<dyn EmbeddingClient>,
    prototypes: HashMap<IntentType, Vec<Vec<f32>>>,
    ready: bool,
}

impl EmbeddingClassifier {
    pub fn new(embedder: Arc<dyn EmbeddingClient>) -> Self {
        EmbeddingClassifier {
            embedder,
            prototypes: HashMap::new(),
            ready: false,
        }
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    /// Embed example queries for each intent type
    pub async fn build_prototypes(
        &mut self,
        examples: Option<Vec<(IntentType, Vec<String>)>>,
    ) -> Result<()> {
        let examples = examples.unwrap_or_else(|| {
            default_examples()
                .into_iter()
                .map(|(i, texts)| (i, texts.into_iter().map(str::to_string).collect()))
                .collect()
        });
        for (intent, texts) in examples {
            let vecs = self.embedder.embed_batch(&texts).await?;
            self.prototypes.insert(intent, vecs);
        }
        self.ready = true;
        tracing::info!(
            intents = self.prototypes.len(),
            examples = self.prototypes.values().map(Vec::len).sum::<usize>(),
            "EmbeddingClassifier: prototypes built"
        );
        Ok(())
    }

    /// Mean cosine similarity per intent; argmax wins. Confidence is the mean
    /// similarity (the orchestrator compares it against its own threshold).
    pub async fn classify(&self, query: &str) -> ClassificationResult {
        if !self.ready {
            return ClassificationResult::new(IntentType::Direct, 0.0, "embedding")
                .with_reasoning("prototypes not built");
        }

        let q_vec = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("EmbeddingClassifier: embed failed: {e}");
                return ClassificationResult::new(IntentType::Direct, 0.0, "embedding")
                    .with_reasoning(format!("embedding error: {e}"));
            }
        };

        let mut scores: Vec<(IntentType, f64)> = self
            .prototypes
            .iter()
            .map(|(intent, protos)| {
                let sum: f64 = protos.iter().map(|p| cosine_similarity(&q_vec, p)).sum();
                (*intent, sum / protos.len().max(1) as f64)
            })
            .collect();
        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (best_intent, best_score) = scores[0];
        let second = scores.get(1).map(|(_, s)| *s).unwrap_or(0.0);
        let margin = best_score - second;

        tracing::debug!(
            intent = %best_intent,
            mean = best_score,
            margin,
            "EmbeddingClassifier: classified"
        );
        ClassificationResult::new(best_intent, (best_score * 10_000.0).round() / 10_000.0, "embedding")
            .with_reasoning(format!(
                "mean cosine similarity: {best_score:.4}, margin: {margin:.4}"
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Deterministic embedder: maps known phrases onto fixed axes
    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingClient for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let t = text.to_lowercase();
            let mut v = vec![0.0f32; 4];
            if t.contains("doküman") || t.contains("document") || t.contains("knowledge") {
                v[0] = 1.0;
            } else if t.contains("randevu") || t.contains("saat") || t.contains("hours") {
                v[2] = 1.0;
            } else if t.contains("çalıştır") || t.contains("run") || t.contains("execute") {
                v[3] = 1.0;
            } else {
                v[1] = 1.0;
            }
            Ok(v)
        }
    }

    fn examples() -> Vec<(IntentType, Vec<String>)> {
        vec![
            (IntentType::Rag, vec!["dokümanda ne yazıyor".into()]),
            (IntentType::Direct, vec!["merhaba".into()]),
            (IntentType::Rule, vec!["randevu istiyorum".into()]),
            (IntentType::Tool, vec!["raporu çalıştır".into()]),
        ]
    }

    #[tokio::test]
    async fn classifies_by_nearest_prototype() {
        let mut c = EmbeddingClassifier::new(Arc::new(AxisEmbedder));
        c.build_prototypes(Some(examples())).await.unwrap();
        assert!(c.ready());

        let r = c.classify("bu dokümanda geçiyor mu").await;
        assert_eq!(r.intent, IntentType::Rag);
        assert!(r.confidence > 0.9);

        let r = c.classify("randevu alabilir miyim").await;
        assert_eq!(r.intent, IntentType::Rule);
    }

    #[tokio::test]
    async fn unready_classifier_reports_zero_confidence() {
        let c = EmbeddingClassifier::new(Arc::new(AxisEmbedder));
        let r = c.classify("her şey").await;
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.intent, IntentType::Direct);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[1.0, 1.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
