// Layer 1: keyword/pattern pre-classifier - no LLM calls

use std::collections::{HashMap, HashSet};

use crate::types::{ClassificationResult, IntentType};

/// Default in-document / knowledge-base phrases signalling a RAG intent
const DEFAULT_RAG_SIGNALS: &[&str] = &[
    "dosyada",
    "belgede",
    "dokümanda",
    "dosyaya göre",
    "kaynağa göre",
    "ne yazıyor",
    "hangi dokümanda",
    "yüklenen",
    "bilgi tabanı",
    "in the document",
    "according to the file",
    "knowledge base",
];

/// Fast deterministic classifier using keyword sets.
///
/// Returns a `ClassificationResult` when confident, or None to hand off to
/// the next classification layer. Rule-keyword hits win over RAG signals.
pub struct PreClassifier {
    rule_keywords: HashSet<String>,
    rag_signals: Vec<String>,
    tool_triggers: HashMap<String, Vec<String>>,
}

impl PreClassifier {
    pub fn new(
        rule_keywords: HashSet<String>,
        rag_signals: Option<Vec<String>>,
        tool_triggers: HashMap<String, Vec<String>>,
    ) -> Self {
        PreClassifier {
            rule_keywords: rule_keywords.into_iter().map(|k| k.to_lowercase()).collect(),
            rag_signals: rag_signals
                .unwrap_or_else(|| DEFAULT_RAG_SIGNALS.iter().map(|s| s.to_string()).collect())
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
            tool_triggers: tool_triggers
                .into_iter()
                .map(|(name, triggers)| {
                    (name, triggers.into_iter().map(|t| t.to_lowercase()).collect())
                })
                .collect(),
        }
    }

    pub fn try_classify(&self, query: &str) -> Option<ClassificationResult> {
        let q_lower = query.to_lowercase();

        for kw in &self.rule_keywords {
            if q_lower.contains(kw.as_str()) {
                tracing::debug!(keyword = %kw, "PreClassifier: matched rule keyword");
                return Some(
                    ClassificationResult::new(IntentType::Rule, 0.95, "pre")
                        .with_reasoning(format!("keyword match: {kw}")),
                );
            }
        }

        for (tool_name, triggers) in &self.tool_triggers {
            for t in triggers {
                if q_lower.contains(t.as_str()) {
                    tracing::debug!(trigger = %t, tool = %tool_name, "PreClassifier: matched tool trigger");
                    return Some(
                        ClassificationResult::new(IntentType::Tool, 0.90, "pre")
                            .with_reasoning(format!("tool trigger: {t} → {tool_name}")),
                    );
                }
            }
        }

        for signal in &self.rag_signals {
            if q_lower.contains(signal.as_str()) {
                tracing::debug!(signal = %signal, "PreClassifier: matched RAG signal");
                return Some(
                    ClassificationResult::new(IntentType::Rag, 0.85, "pre")
                        .with_reasoning(format!("RAG signal: {signal}")),
                );
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(rule_keywords: &[&str]) -> PreClassifier {
        PreClassifier::new(
            rule_keywords.iter().map(|s| s.to_string()).collect(),
            None,
            HashMap::from([(
                "report".to_string(),
                vec!["raporu çalıştır".to_string(), "run the report".to_string()],
            )]),
        )
    }

    #[test]
    fn rule_keyword_hit_has_confidence_095() {
        let c = classifier(&["çalışma saati"]);
        let r = c.try_classify("Çalışma saati nedir?").unwrap();
        assert_eq!(r.intent, IntentType::Rule);
        assert_eq!(r.confidence, 0.95);
        assert_eq!(r.classifier_layer.as_deref(), Some("pre"));
    }

    #[test]
    fn tool_trigger_hit_has_confidence_090() {
        let c = classifier(&[]);
        let r = c.try_classify("lütfen raporu çalıştır").unwrap();
        assert_eq!(r.intent, IntentType::Tool);
        assert_eq!(r.confidence, 0.90);
    }

    #[test]
    fn rag_signal_hit_has_confidence_085() {
        let c = classifier(&[]);
        let r = c.try_classify("Dosyada bu konu hakkında ne yazıyor?").unwrap();
        assert_eq!(r.intent, IntentType::Rag);
        assert_eq!(r.confidence, 0.85);
    }

    #[test]
    fn rule_keyword_wins_over_rag_signal() {
        let c = classifier(&["fiyat"]);
        let r = c.try_classify("dosyada fiyat var mı").unwrap();
        assert_eq!(r.intent, IntentType::Rule);
    }

    #[test]
    fn no_match_returns_none() {
        let c = classifier(&["fiyat"]);
        assert!(c.try_classify("bugün hava nasıl").is_none());
    }
}
