// RuleEngine: deterministic keyword/regex matching with optional LLM fallback

use regex::{Regex, RegexBuilder};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use std::time::Duration;
use uuid::Uuid;

use crate::rules::{FlowContext, Rule};
use crate::traits::LlmClient;

const REGEX_PREFIX: &str = "r:";
const WILDCARD: &str = "*";

const LLM_RULE_MATCH_PROMPT: &str = "You are a rule matcher. Given the user message and a list of rules, \
determine which rule (if any) best matches the user's intent.\n\n\
Rules:\n{rules}\n\n\
User message: \"{query}\"\n\n\
If a rule matches, respond with ONLY the JSON: \
{\"rule_id\": \"<id>\", \"confidence\": 0.0-1.0}\n\
If no rule matches, respond with: \
{\"rule_id\": null, \"confidence\": 0.0}";

fn safe_placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_]*)\}").unwrap())
}

/// Match result carrying the rendered answer and flow-transition metadata
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub rendered_answer: String,
    pub next_flow_context: Option<FlowContext>,
}

/// Match user queries against deterministic rules.
///
/// Rules are checked in priority-descending order (stable on ties). Trigger
/// patterns are plain substring matches, regex patterns (prefixed `r:`), or
/// the wildcard `*`.
///
/// The engine is an immutable snapshot: rule edits build a new engine and the
/// holder swaps the pointer, so readers never observe a half-updated set.
pub struct RuleEngine {
    rules: Vec<Rule>,
    compiled: HashMap<String, Regex>,
}

impl RuleEngine {
    pub fn new(mut rules: Vec<Rule>) -> Self {
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        let mut compiled = HashMap::new();
        for rule in &rules {
            for pat in &rule.trigger_patterns {
                if let Some(expr) = pat.strip_prefix(REGEX_PREFIX) {
                    match RegexBuilder::new(expr).case_insensitive(true).build() {
                        Ok(re) => {
                            compiled.insert(pat.clone(), re);
                        }
                        Err(e) => {
                            tracing::warn!(rule = %rule.id, pattern = %pat, "Invalid regex in rule: {e}");
                        }
                    }
                }
            }
        }
        RuleEngine { rules, compiled }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// All plain-text (non-regex) trigger keywords of active rules, lowercased
    pub fn keywords(&self) -> HashSet<String> {
        let mut kws = HashSet::new();
        for rule in self.rules.iter().filter(|r| r.is_active) {
            for pat in &rule.trigger_patterns {
                if !pat.starts_with(REGEX_PREFIX) && pat != WILDCARD {
                    kws.insert(pat.to_lowercase());
                }
            }
        }
        kws
    }

    /// Descriptions of active rules, fed to the LLM classifier
    pub fn descriptions(&self) -> Vec<String> {
        self.rules
            .iter()
            .filter(|r| r.is_active)
            .map(|r| format!("{}: {}", r.name, r.description))
            .collect()
    }

    // ── Primary match (keyword/regex, flow-aware) ──────────────────

    /// Deterministic match, no LLM call.
    ///
    /// When `flow_ctx` is active the engine first resolves step choices, then
    /// tries rules gated on the current flow + step, then standalone rules so
    /// the user can still trigger global commands (e.g. "iptal") mid-flow.
    pub fn matches(&self, query: &str, flow_ctx: Option<&FlowContext>) -> Option<RuleMatch> {
        if query.is_empty() {
            return None;
        }
        if let Some(ctx) = flow_ctx.filter(|c| c.active()) {
            return self
                .match_flow_entry_by_choice(query, ctx)
                .or_else(|| self.match_flow_rules(query, ctx))
                .or_else(|| self.match_standalone_rules(query));
        }
        self.match_standalone_rules(query)
            .or_else(|| self.match_flow_entry_rules(query))
    }

    // ── LLM-assisted match ─────────────────────────────────────────

    /// Try keyword match first, then ask the LLM to pick among standalone
    /// non-flow rules by name/description. A confidence threshold gates
    /// acceptance; timeouts and parse failures return None.
    pub async fn match_with_llm(
        &self,
        query: &str,
        llm: &dyn LlmClient,
        confidence_threshold: f64,
        timeout: Option<Duration>,
        flow_ctx: Option<&FlowContext>,
    ) -> Option<RuleMatch> {
        if let Some(m) = self.matches(query, flow_ctx) {
            return Some(m);
        }

        let active: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|r| r.is_active && !r.is_flow_rule())
            .collect();
        if active.is_empty() {
            return None;
        }

        let rules_text = active
            .iter()
            .map(|r| format!("- id={} | name=\"{}\" | description=\"{}\"", r.id, r.name, r.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = LLM_RULE_MATCH_PROMPT
            .replace("{rules}", &rules_text)
            .replace("{query}", query);

        let raw = match call_with_timeout(llm, &prompt, timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("RuleEngine: LLM rule matching failed: {e}");
                return None;
            }
        };

        let parsed: serde_json::Value = match serde_json::from_str(raw.trim()) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("RuleEngine: LLM rule match response unparseable: {e}");
                return None;
            }
        };
        let rule_id = parsed.get("rule_id").and_then(|v| v.as_str())?.to_string();
        let confidence = parsed
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        if confidence < confidence_threshold {
            return None;
        }

        let matched = active.iter().find(|r| r.id.to_string() == rule_id)?;
        tracing::debug!(rule = %matched.name, confidence, "RuleEngine: LLM matched rule");
        Some(RuleMatch {
            rule_id: matched.id,
            rule_name: matched.name.clone(),
            rendered_answer: self.render(matched),
            next_flow_context: build_next_ctx(matched, query, None),
        })
    }

    // ── Internal matching helpers ──────────────────────────────────

    fn match_standalone_rules(&self, query: &str) -> Option<RuleMatch> {
        let q_lower = query.to_lowercase();
        for rule in &self.rules {
            if !rule.is_active || rule.is_flow_rule() {
                continue;
            }
            if self.patterns_hit(rule, query, &q_lower) {
                return Some(RuleMatch {
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    rendered_answer: self.render(rule),
                    next_flow_context: None,
                });
            }
        }
        None
    }

    /// Match flow entry-point rules (flow_id set, required_step is None)
    fn match_flow_entry_rules(&self, query: &str) -> Option<RuleMatch> {
        let q_lower = query.to_lowercase();
        for rule in &self.rules {
            if !rule.is_active || !rule.is_flow_rule() || rule.required_step.is_some() {
                continue;
            }
            if self.patterns_hit(rule, query, &q_lower) {
                return Some(RuleMatch {
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    rendered_answer: self.render(rule),
                    next_flow_context: build_next_ctx(rule, query, None),
                });
            }
        }
        None
    }

    /// Match rules gated by the user's current flow + step
    fn match_flow_rules(&self, query: &str, ctx: &FlowContext) -> Option<RuleMatch> {
        let q_lower = query.to_lowercase();
        for rule in &self.rules {
            if !rule.is_active || !rule.is_flow_rule() {
                continue;
            }
            if rule.flow_id != ctx.flow_id || rule.required_step != ctx.current_step {
                continue;
            }
            if self.patterns_hit(rule, query, &q_lower) {
                return Some(RuleMatch {
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    rendered_answer: self.render(rule),
                    next_flow_context: build_next_ctx(rule, query, Some(ctx)),
                });
            }
        }
        None
    }

    /// When the user is inside a flow and the current step's rule has
    /// next_steps, resolve their answer to the target step's entry rule.
    /// `*` in next_steps is a catch-all fallback.
    fn match_flow_entry_by_choice(&self, query: &str, ctx: &FlowContext) -> Option<RuleMatch> {
        let parents: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|r| {
                r.is_active
                    && r.flow_id == ctx.flow_id
                    && r.step_key == ctx.current_step
                    && r.next_steps.as_ref().is_some_and(|m| !m.is_empty())
            })
            .collect();
        if parents.is_empty() {
            return None;
        }

        let q_lower = query.trim().to_lowercase();
        let q_words: HashSet<&str> = q_lower.split_whitespace().collect();
        for parent in parents {
            let next_steps = parent.next_steps.as_ref().unwrap();
            let wildcard_target = next_steps.get(WILDCARD);

            for (choice, target_step) in next_steps {
                if choice == WILDCARD {
                    continue;
                }
                if choice_matches(choice, &q_lower, &q_words) {
                    if let Some(m) = self.resolve_choice_target(query, ctx, target_step) {
                        return Some(m);
                    }
                }
            }

            if let Some(target) = wildcard_target {
                if let Some(m) = self.resolve_choice_target(query, ctx, target) {
                    return Some(m);
                }
            }
        }
        None
    }

    fn resolve_choice_target(
        &self,
        query: &str,
        ctx: &FlowContext,
        target_step: &str,
    ) -> Option<RuleMatch> {
        let flow_id = ctx.flow_id.as_deref()?;
        let target_rule = self.find_step_rule(flow_id, target_step)?;

        let mut new_selections = ctx.selections.clone();
        new_selections.insert(
            ctx.current_step.clone().unwrap_or_default(),
            query.trim().to_string(),
        );

        let next_flow_context = if target_rule.next_steps.as_ref().is_some_and(|m| !m.is_empty()) {
            let mut data = ctx.data.clone();
            data.insert(
                "last_query".into(),
                serde_json::Value::String(query.trim().to_string()),
            );
            Some(FlowContext {
                flow_id: ctx.flow_id.clone(),
                current_step: Some(target_step.to_string()),
                data,
                selections: new_selections,
            })
        } else {
            None
        };

        Some(RuleMatch {
            rule_id: target_rule.id,
            rule_name: target_rule.name.clone(),
            rendered_answer: self.render(target_rule),
            next_flow_context,
        })
    }

    /// Highest-priority rule for a specific step in a flow
    fn find_step_rule(&self, flow_id: &str, step_key: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| {
            r.is_active && r.flow_id.as_deref() == Some(flow_id) && r.step_key.as_deref() == Some(step_key)
        })
    }

    fn patterns_hit(&self, rule: &Rule, query: &str, q_lower: &str) -> bool {
        for pat in &rule.trigger_patterns {
            if pat == WILDCARD {
                return !query.is_empty();
            }
            if pat.starts_with(REGEX_PREFIX) {
                if self.compiled.get(pat).is_some_and(|re| re.is_match(query)) {
                    return true;
                }
            } else if q_lower.contains(&pat.to_lowercase()) {
                return true;
            }
        }
        false
    }

    // ── Template rendering ─────────────────────────────────────────

    /// Substitute variables into the response template.
    ///
    /// Only placeholders matching `{identifier}` are replaced, from the
    /// rule's `variables`. Unknown placeholders stay literal. No general
    /// format-string evaluation runs, so templates cannot be used for
    /// injection.
    fn render(&self, rule: &Rule) -> String {
        render_template(&rule.response_template, &rule.variables)
    }
}

/// `{identifier}`-only template substitution
pub fn render_template(template: &str, variables: &serde_json::Map<String, serde_json::Value>) -> String {
    if variables.is_empty() {
        return template.to_string();
    }
    safe_placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match variables.get(key) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Short choices (<= 2 chars, e.g. "A", "1") require exact or whole-word
/// match to avoid false positives like "a" in "merhaba". Longer choices use
/// substring matching.
fn choice_matches(choice: &str, q_lower: &str, q_words: &HashSet<&str>) -> bool {
    let c_lower = choice.to_lowercase();
    if c_lower.chars().count() <= 2 {
        q_words.contains(c_lower.as_str()) || c_lower == q_lower
    } else {
        q_lower.contains(&c_lower)
    }
}

fn build_next_ctx(rule: &Rule, query: &str, prev: Option<&FlowContext>) -> Option<FlowContext> {
    if !rule.is_flow_rule() {
        return None;
    }
    if !rule.next_steps.as_ref().is_some_and(|m| !m.is_empty()) {
        return None;
    }
    let mut selections = prev.map(|p| p.selections.clone()).unwrap_or_default();
    if let Some(step) = prev.and_then(|p| p.current_step.clone()) {
        selections.insert(step, query.trim().to_string());
    }
    let mut data = prev.map(|p| p.data.clone()).unwrap_or_default();
    data.insert(
        "last_query".into(),
        serde_json::Value::String(query.to_string()),
    );
    Some(FlowContext {
        flow_id: rule.flow_id.clone(),
        current_step: rule.step_key.clone(),
        data,
        selections,
    })
}

async fn call_with_timeout(
    llm: &dyn LlmClient,
    prompt: &str,
    timeout: Option<Duration>,
) -> crate::error::Result<String> {
    match timeout {
        Some(t) => tokio::time::timeout(t, llm.complete(prompt))
            .await
            .map_err(|_| crate::error::QueryonError::Timeout(t.as_secs_f64()))?,
        None => llm.complete(prompt).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn rule(name: &str, patterns: &[&str], template: &str) -> Rule {
        Rule {
            id: Uuid::now_v7(),
            name: name.into(),
            description: String::new(),
            trigger_patterns: patterns.iter().map(|s| s.to_string()).collect(),
            response_template: template.into(),
            variables: serde_json::Map::new(),
            priority: 0,
            is_active: true,
            flow_id: None,
            step_key: None,
            required_step: None,
            next_steps: None,
        }
    }

    fn flow_rule(
        name: &str,
        flow_id: &str,
        step_key: &str,
        required_step: Option<&str>,
        patterns: &[&str],
        next_steps: Option<&[(&str, &str)]>,
    ) -> Rule {
        let mut r = rule(name, patterns, name);
        r.flow_id = Some(flow_id.into());
        r.step_key = Some(step_key.into());
        r.required_step = required_step.map(str::to_string);
        r.next_steps = next_steps.map(|pairs| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>()
        });
        r
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let engine = RuleEngine::new(vec![rule("hours", &["çalışma saati"], "09-17")]);
        let m = engine.matches("Çalışma saati nedir?", None).unwrap();
        assert_eq!(m.rule_name, "hours");
    }

    #[test]
    fn regex_pattern_matches() {
        let engine = RuleEngine::new(vec![rule("greet", &[r"r:^(selam|merhaba)\b"], "hi")]);
        assert!(engine.matches("Merhaba, nasılsın?", None).is_some());
        assert!(engine.matches("iyi merhabalar olmayan", None).is_none());
    }

    #[test]
    fn wildcard_matches_any_nonempty_query() {
        let engine = RuleEngine::new(vec![rule("catch", &["*"], "hi")]);
        assert!(engine.matches("anything at all", None).is_some());
        assert!(engine.matches("", None).is_none());
    }

    #[test]
    fn priority_orders_matches() {
        let mut low = rule("low", &["fiyat"], "low");
        low.priority = 1;
        let mut high = rule("high", &["fiyat"], "high");
        high.priority = 10;
        let engine = RuleEngine::new(vec![low, high]);
        assert_eq!(engine.matches("fiyat", None).unwrap().rule_name, "high");
    }

    #[test]
    fn equal_priority_resolves_by_insertion_order() {
        let first = rule("first", &["fiyat"], "a");
        let second = rule("second", &["fiyat"], "b");
        let engine = RuleEngine::new(vec![first, second]);
        assert_eq!(engine.matches("fiyat", None).unwrap().rule_name, "first");
    }

    #[test]
    fn template_renders_known_placeholders_only() {
        let mut r = rule("hours", &["saat"], "Saatlerimiz: {hours} / {unknown}");
        r.variables = json!({"hours": "09:00-17:00"}).as_object().unwrap().clone();
        let engine = RuleEngine::new(vec![r]);
        let m = engine.matches("saat", None).unwrap();
        assert_eq!(m.rendered_answer, "Saatlerimiz: 09:00-17:00 / {unknown}");
    }

    #[test]
    fn template_rendering_is_idempotent_when_satisfied() {
        let vars = json!({"hours": "09:00-17:00"}).as_object().unwrap().clone();
        let once = render_template("Saatlerimiz: {hours}", &vars);
        let twice = render_template(&once, &vars);
        assert_eq!(once, twice);
    }

    #[test]
    fn dangerous_placeholders_stay_literal() {
        let vars = serde_json::Map::from_iter([("x".to_string(), json!("1"))]);
        let rendered = render_template("{0.__class__} {x}", &vars);
        assert_eq!(rendered, "{0.__class__} 1");
    }

    #[test]
    fn flow_entry_then_choice_advances_step() {
        let entry = flow_rule(
            "entry",
            "hizmet",
            "start",
            None,
            &["hizmet"],
            Some(&[("A", "danismanlik")]),
        );
        let step = flow_rule("danismanlik", "hizmet", "danismanlik", Some("start"), &["*"], None);
        let engine = RuleEngine::new(vec![entry, step]);

        // Turn 1: entry match produces a context at step "start"
        let m1 = engine.matches("hizmet", None).unwrap();
        assert_eq!(m1.rule_name, "entry");
        let ctx = m1.next_flow_context.unwrap();
        assert_eq!(ctx.current_step.as_deref(), Some("start"));

        // Turn 2: choice "A" resolves to the terminal step
        let m2 = engine.matches("A", Some(&ctx)).unwrap();
        assert_eq!(m2.rule_name, "danismanlik");
        assert!(m2.next_flow_context.is_none());
    }

    #[test]
    fn short_choice_requires_whole_word() {
        let entry = flow_rule(
            "entry",
            "hizmet",
            "start",
            None,
            &["hizmet"],
            Some(&[("a", "danismanlik")]),
        );
        // non-wildcard trigger so only choice resolution can reach this step
        let step = flow_rule(
            "danismanlik",
            "hizmet",
            "danismanlik",
            Some("start"),
            &["danışmanlık"],
            None,
        );
        let engine = RuleEngine::new(vec![entry, step]);
        let ctx = FlowContext {
            flow_id: Some("hizmet".into()),
            current_step: Some("start".into()),
            ..Default::default()
        };
        // "a" buried inside "merhaba" must not resolve the choice
        assert!(engine.matches("merhaba", Some(&ctx)).is_none());
        assert!(engine.matches("a", Some(&ctx)).is_some());
    }

    #[test]
    fn wildcard_choice_is_catch_all() {
        let entry = flow_rule(
            "entry",
            "hizmet",
            "start",
            None,
            &["hizmet"],
            Some(&[("A", "danismanlik"), ("*", "fallback")]),
        );
        let a_step = flow_rule("danismanlik", "hizmet", "danismanlik", Some("start"), &["*"], None);
        let fb_step = flow_rule("fallback", "hizmet", "fallback", Some("start"), &["*"], None);
        let engine = RuleEngine::new(vec![entry, a_step, fb_step]);
        let ctx = FlowContext {
            flow_id: Some("hizmet".into()),
            current_step: Some("start".into()),
            ..Default::default()
        };
        let m = engine.matches("something unrelated", Some(&ctx)).unwrap();
        assert_eq!(m.rule_name, "fallback");
    }

    #[test]
    fn standalone_rules_still_fire_mid_flow() {
        let cancel = rule("cancel", &["iptal"], "İptal edildi");
        let entry = flow_rule("entry", "hizmet", "start", None, &["hizmet"], Some(&[("A", "x")]));
        let engine = RuleEngine::new(vec![cancel, entry]);
        let ctx = FlowContext {
            flow_id: Some("hizmet".into()),
            current_step: Some("start".into()),
            ..Default::default()
        };
        let m = engine.matches("iptal istiyorum", Some(&ctx)).unwrap();
        assert_eq!(m.rule_name, "cancel");
    }

    #[test]
    fn choice_records_selection_for_previous_step() {
        let entry = flow_rule(
            "entry",
            "menu",
            "start",
            None,
            &["menü"],
            Some(&[("B", "branch")]),
        );
        let branch = flow_rule(
            "branch",
            "menu",
            "branch",
            Some("start"),
            &["*"],
            Some(&[("C", "leaf")]),
        );
        let leaf = flow_rule("leaf", "menu", "leaf", Some("branch"), &["*"], None);
        let engine = RuleEngine::new(vec![entry, branch, leaf]);

        let ctx = FlowContext {
            flow_id: Some("menu".into()),
            current_step: Some("start".into()),
            ..Default::default()
        };
        let m = engine.matches("B", Some(&ctx)).unwrap();
        let next = m.next_flow_context.unwrap();
        assert_eq!(next.current_step.as_deref(), Some("branch"));
        assert_eq!(next.selections.get("start").map(String::as_str), Some("B"));
    }

    #[test]
    fn inactive_rules_never_match() {
        let mut r = rule("off", &["fiyat"], "x");
        r.is_active = false;
        let engine = RuleEngine::new(vec![r]);
        assert!(engine.matches("fiyat", None).is_none());
    }

    #[test]
    fn keywords_collects_plain_patterns_only() {
        let engine = RuleEngine::new(vec![
            rule("a", &["Fiyat Listesi", "r:^selam", "*"], "x"),
            rule("b", &["çalışma saati"], "y"),
        ]);
        let kws = engine.keywords();
        assert!(kws.contains("fiyat listesi"));
        assert!(kws.contains("çalışma saati"));
        assert_eq!(kws.len(), 2);
    }
}
