// Layer 3: LLM-based intent classifier - most accurate, highest latency

use regex::Regex;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::rules::FlowContext;
use crate::traits::LlmClient;
use crate::types::{ClassificationResult, IntentType, OrchestratorConfig, Turn};

const CLASSIFICATION_PROMPT: &str = r#"You are an intent classifier. Think step-by-step through the query, then output your classification.

Intent categories:
1. "rag"    — The user needs information from uploaded documents / knowledge base.
2. "direct" — General knowledge, conversation, translation, summarisation (no documents needed).
3. "rule"   — The message matches one of the fixed rules listed below.
4. "tool"   — An external tool or function should be invoked.

{rules_section}
{tools_section}
{context_section}

Current user message: "{query}"

Think through the following inside <thinking> tags (be concise, 2–4 sentences):
- What is the user asking or trying to do?
- Does the message match any listed rule? If yes, which one?
- Is a tool call required? If yes, which tool?
- Does the user need information from uploaded documents?
- Or is this general conversation / knowledge the LLM can answer directly?

Confidence calibration guide:
- 0.95–1.0: Very clear match, only one intent makes sense.
- 0.80–0.94: Strong match, minor ambiguity possible.
- 0.65–0.79: Probable match but another intent is plausible.
- 0.50–0.64: Uncertain — two intents are nearly equally likely.
- Below 0.50: Very unclear; prefer the most conservative guess.

Then output ONLY the JSON on a new line (no markdown):
<thinking>
[your reasoning here]
</thinking>
{"intent": "<rag|direct|rule|tool>", "confidence": <0.0-1.0>, "reasoning": "<one sentence summary>"}"#;

fn thinking_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<thinking>(.*?)</thinking>").unwrap())
}

fn json_fallback_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)\{[^{}]*"intent"[^{}]*\}"#).unwrap())
}

/// Inputs assembled by the orchestrator for an LLM classification
#[derive(Default)]
pub struct ClassifyRequest<'a> {
    pub rule_descriptions: &'a [String],
    pub tool_descriptions: &'a [String],
    pub conversation_history: Option<&'a [Turn]>,
    pub last_intent: Option<IntentType>,
    pub flow_ctx: Option<&'a FlowContext>,
}

/// Ask the LLM to classify user intent. Last resort when faster classifiers
/// are not confident enough.
pub struct LlmClassifier {
    config: OrchestratorConfig,
}

impl LlmClassifier {
    pub fn new(config: OrchestratorConfig) -> Self {
        LlmClassifier { config }
    }

    pub async fn classify(
        &self,
        llm: &dyn LlmClient,
        query: &str,
        req: ClassifyRequest<'_>,
    ) -> ClassificationResult {
        let prompt = self.build_prompt(query, &req);

        let call = llm.complete(&prompt);
        let raw = match self.config.llm_timeout() {
            Some(t) => match tokio::time::timeout(t, call).await {
                Ok(r) => r,
                Err(_) => {
                    tracing::warn!(
                        "LlmClassifier: classification timed out ({:.0}s)",
                        t.as_secs_f64()
                    );
                    return ClassificationResult::new(self.config.default_intent, 0.0, "llm")
                        .with_reasoning("LLM timeout");
                }
            },
            None => call.await,
        };

        match raw {
            Ok(raw) => parse_classification(&raw),
            Err(e) => {
                tracing::error!("LlmClassifier: classification failed: {e}");
                ClassificationResult::new(self.config.default_intent, 0.0, "llm")
                    .with_reasoning(format!("LLM error: {e}"))
            }
        }
    }

    fn build_prompt(&self, query: &str, req: &ClassifyRequest<'_>) -> String {
        let rules_section = if req.rule_descriptions.is_empty() {
            "Active rules: (none)".to_string()
        } else {
            format!(
                "Active rules:\n{}",
                req.rule_descriptions
                    .iter()
                    .map(|d| format!("- {d}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        };

        let tools_section = if req.tool_descriptions.is_empty() {
            "Available tools: (none)".to_string()
        } else {
            format!(
                "Available tools:\n{}",
                req.tool_descriptions
                    .iter()
                    .map(|d| format!("- {d}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        };

        let mut context_section = String::new();
        if let Some(history) = req.conversation_history {
            let lines: Vec<String> = history
                .iter()
                .filter(|t| !t.content.trim().is_empty())
                .map(|t| {
                    let content: String = t.content.trim().chars().take(200).collect();
                    format!("{}: {}", t.role.as_str(), content)
                })
                .collect();
            if !lines.is_empty() {
                context_section = format!("Recent conversation:\n{}\n\n", lines.join("\n"));
            }
        }
        if let Some(last) = req.last_intent {
            context_section.push_str(&format!(
                "(Previous reply was from intent: {last}. If this is a follow-up, prefer the same intent.)\n\n"
            ));
        }
        if let Some(ctx) = req.flow_ctx.filter(|c| c.active()) {
            let step = ctx.current_step.as_deref().unwrap_or("unknown");
            let collected_info = if ctx.data.is_empty() {
                String::new()
            } else {
                let fields = ctx
                    .data
                    .iter()
                    .take(5)
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(", collected={{{fields}}}")
            };
            context_section.push_str(&format!(
                "(User is currently inside a multi-step flow: flow_id='{}', step='{step}'{collected_info}. Prefer 'rule' if the message is a response to the current flow step.)\n\n",
                ctx.flow_id.as_deref().unwrap_or("")
            ));
        }

        let template = self
            .config
            .classification_prompt_override
            .as_deref()
            .filter(|t| {
                // A custom prompt missing the expected placeholders would
                // render uselessly; fall back to the default template.
                let ok = t.contains("{query}");
                if !ok {
                    tracing::warn!(
                        "LlmClassifier: classification_prompt_override is missing expected placeholders; using the default template"
                    );
                }
                ok
            })
            .unwrap_or(CLASSIFICATION_PROMPT);

        template
            .replace("{rules_section}", &rules_section)
            .replace("{tools_section}", &tools_section)
            .replace("{context_section}", &context_section)
            .replace("{query}", query)
    }
}

/// Parse the classifier's output with tolerance: extract the `<thinking>`
/// block, strip markdown fences, then parse the JSON line. On failure,
/// default to `direct` with confidence 0.
pub fn parse_classification(raw: &str) -> ClassificationResult {
    let (thinking, json_candidate) = match thinking_re().captures(raw) {
        Some(caps) => {
            let m = caps.get(0).unwrap();
            (
                Some(caps[1].trim().to_string()),
                raw[m.end()..].trim().to_string(),
            )
        }
        None => (None, raw.trim().to_string()),
    };

    let json_candidate = if json_candidate.starts_with("```") {
        json_candidate
            .lines()
            .filter(|l| !l.trim().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    } else {
        json_candidate
    };

    let data: serde_json::Value = serde_json::from_str(&json_candidate)
        .ok()
        .or_else(|| {
            json_fallback_re()
                .find(raw)
                .and_then(|m| serde_json::from_str(m.as_str()).ok())
        })
        .unwrap_or(serde_json::Value::Null);

    let Some(obj) = data.as_object() else {
        tracing::warn!(
            "LlmClassifier: could not parse JSON from: {}",
            raw.chars().take(300).collect::<String>()
        );
        let mut r = ClassificationResult::new(IntentType::Direct, 0.0, "llm")
            .with_reasoning("JSON parse error");
        r.thinking = thinking;
        return r;
    };

    let intent = obj
        .get("intent")
        .and_then(|v| v.as_str())
        .and_then(|s| IntentType::from_str(s).ok())
        .unwrap_or(IntentType::Direct);
    let confidence = obj
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);
    let reasoning = obj
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut result =
        ClassificationResult::new(intent, confidence, "llm").with_reasoning(reasoning);
    result.thinking = thinking;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_thinking_plus_json() {
        let raw = "<thinking>\nLooks like a rule.\n</thinking>\n{\"intent\": \"rule\", \"confidence\": 0.92, \"reasoning\": \"matches pricing rule\"}";
        let r = parse_classification(raw);
        assert_eq!(r.intent, IntentType::Rule);
        assert_eq!(r.confidence, 0.92);
        assert_eq!(r.thinking.as_deref(), Some("Looks like a rule."));
        assert_eq!(r.classifier_layer.as_deref(), Some("llm"));
    }

    #[test]
    fn strips_markdown_fences() {
        let raw = "```json\n{\"intent\": \"rag\", \"confidence\": 0.8, \"reasoning\": \"docs\"}\n```";
        let r = parse_classification(raw);
        assert_eq!(r.intent, IntentType::Rag);
        assert_eq!(r.confidence, 0.8);
    }

    #[test]
    fn finds_json_embedded_in_prose() {
        let raw = "Sure! Here is my answer: {\"intent\": \"tool\", \"confidence\": 0.7} hope that helps";
        let r = parse_classification(raw);
        assert_eq!(r.intent, IntentType::Tool);
    }

    #[test]
    fn garbage_defaults_to_direct_with_zero_confidence() {
        let r = parse_classification("no json here at all");
        assert_eq!(r.intent, IntentType::Direct);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.reasoning.as_deref(), Some("JSON parse error"));
    }

    #[test]
    fn unknown_intent_and_out_of_range_confidence_are_clamped() {
        let raw = "{\"intent\": \"telepathy\", \"confidence\": 7.5}";
        let r = parse_classification(raw);
        assert_eq!(r.intent, IntentType::Direct);
        assert_eq!(r.confidence, 1.0);
    }

    #[tokio::test]
    async fn timeout_returns_default_intent() {
        use crate::traits::LlmClient;
        use async_trait::async_trait;

        struct SlowLlm;
        #[async_trait]
        impl LlmClient for SlowLlm {
            async fn complete(&self, _prompt: &str) -> crate::error::Result<String> {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok(String::new())
            }
        }

        let config = OrchestratorConfig {
            llm_timeout_seconds: Some(0.01),
            default_intent: IntentType::Direct,
            ..Default::default()
        };
        let classifier = LlmClassifier::new(config);
        let r = classifier
            .classify(&SlowLlm, "soru", ClassifyRequest::default())
            .await;
        assert_eq!(r.intent, IntentType::Direct);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.reasoning.as_deref(), Some("LLM timeout"));
    }
}
