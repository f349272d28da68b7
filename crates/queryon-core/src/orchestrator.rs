// Orchestrator: top-level router that classifies intent and dispatches to the
// correct handler (RAG, Direct LLM, Rule, Tool, or the Character persona).
//
// Classification uses a three-layer cascade:
//   Layer 1  PreClassifier       - keyword/pattern matching      (<1 ms, no LLM)
//   Layer 2  EmbeddingClassifier - cosine similarity prototypes  (~ms, no LLM)
//   Layer 3  LlmClassifier       - full LLM classification, cached

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use uuid::Uuid;

use crate::classify::{
    ClassificationCache, ClassifyRequest, EmbeddingClassifier, LlmClassifier, PreClassifier,
};
use crate::error::{QueryonError, Result};
use crate::flow::{
    collected_str, compute_mode_context, is_complete, mode_state, Mode, SKIP_SENTINEL,
};
use crate::handlers::{
    CharacterHandler, DirectHandler, Handler, HandlerContext, RagHandler, RuleHandler, ToolHandler,
    ToolRegistry,
};
use crate::rules::{FlowContext, RuleEngine, RuleMatch};
use crate::traits::{ConversationStore, FlowBackend, IntakeOutcome, LlmClient, RagService};
use crate::types::{
    ClassificationResult, IntentType, LowConfidenceStrategy, OrchestratorConfig,
    OrchestratorMetrics, OrchestratorResult, Turn, WhenRagUnavailable,
};
use crate::availability::parse_flexible_date;

const CLARIFICATION_MESSAGE: &str =
    "Tam olarak anlayamadım. Lütfen sorunuzu biraz daha açar mısınız?";
const RESCHEDULE_CONFLICT_MESSAGE: &str =
    "Maalesef seçtiğiniz tarih ve saat dolu görünüyor. Lütfen başka bir saat seçer misiniz?";

/// Per-turn inputs supplied by the caller (or loaded by tracking)
#[derive(Default)]
pub struct TurnContext<'a> {
    pub conversation_history: Option<&'a [Turn]>,
    pub last_intent: Option<IntentType>,
    /// Raw persisted flow_state object for the conversation
    pub flow_state: Option<&'a Map<String, Value>>,
}

/// What to do with the persisted flow_state after a turn
enum FlowWrite {
    Keep,
    Set(Value),
    Clear,
}

/// Central entry-point that takes a user query, classifies intent, dispatches
/// to the matching handler, and applies fallback logic.
///
/// All heavy components are injected; the orchestrator itself is stateless
/// between calls aside from the classification cache. The LLM client and RAG
/// service sit behind swappable pointers so admin edits apply without a
/// restart.
pub struct Orchestrator {
    llm: RwLock<Arc<dyn LlmClient>>,
    rag: RwLock<Option<Arc<dyn RagService>>>,
    config: OrchestratorConfig,
    rule_engine: Option<Arc<RuleEngine>>,
    pre_classifier: PreClassifier,
    llm_classifier: LlmClassifier,
    embedding_classifier: Option<EmbeddingClassifier>,
    tool_registry: Arc<ToolRegistry>,
    cache: ClassificationCache,
    store: Option<Arc<dyn ConversationStore>>,
    flow_backend: Option<Arc<dyn FlowBackend>>,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, config: OrchestratorConfig) -> Self {
        let llm_classifier = LlmClassifier::new(config.clone());
        let pre_classifier = PreClassifier::new(HashSet::new(), None, HashMap::new());
        Orchestrator {
            llm: RwLock::new(llm),
            rag: RwLock::new(None),
            config,
            rule_engine: None,
            pre_classifier,
            llm_classifier,
            embedding_classifier: None,
            tool_registry: Arc::new(ToolRegistry::new()),
            cache: ClassificationCache::default(),
            store: None,
            flow_backend: None,
        }
    }

    pub fn with_rag(mut self, rag: Arc<dyn RagService>) -> Self {
        *self.rag.get_mut().expect("fresh lock") = Some(rag);
        self
    }

    pub fn with_rule_engine(mut self, engine: Arc<RuleEngine>) -> Self {
        self.rule_engine = Some(engine);
        self.rebuild_pre_classifier();
        self
    }

    pub fn with_tool_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.tool_registry = registry;
        self.rebuild_pre_classifier();
        self
    }

    /// Attach a ready embedding classifier (prototypes already built)
    pub fn with_embedding_classifier(mut self, classifier: EmbeddingClassifier) -> Self {
        self.embedding_classifier = Some(classifier);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_flow_backend(mut self, backend: Arc<dyn FlowBackend>) -> Self {
        self.flow_backend = Some(backend);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Swap the LLM client in place (admin model change without restart)
    pub fn swap_llm(&self, llm: Arc<dyn LlmClient>) {
        *self.llm.write().expect("llm lock poisoned") = llm;
        self.cache.clear();
    }

    /// Swap the RAG service in place
    pub fn swap_rag(&self, rag: Option<Arc<dyn RagService>>) {
        *self.rag.write().expect("rag lock poisoned") = rag;
    }

    fn rebuild_pre_classifier(&mut self) {
        let rule_keywords = self
            .rule_engine
            .as_ref()
            .map(|e| e.keywords())
            .unwrap_or_default();
        self.pre_classifier =
            PreClassifier::new(rule_keywords, None, self.tool_registry.trigger_map());
    }

    fn llm_client(&self) -> Arc<dyn LlmClient> {
        self.llm.read().expect("llm lock poisoned").clone()
    }

    fn rag_service(&self) -> Option<Arc<dyn RagService>> {
        self.rag.read().expect("rag lock poisoned").clone()
    }

    // ========================================================================
    // Per-turn processing
    // ========================================================================

    /// Full orchestration cycle: classify, handle, fall back, return.
    pub async fn process(&self, query: &str, turn: TurnContext<'_>) -> OrchestratorResult {
        let t_start = Instant::now();
        let mut llm_calls: u32 = 0;

        let empty_state = Map::new();
        let flow_state = turn.flow_state.unwrap_or(&empty_state);
        let flow_ctx = FlowContext::from_map(flow_state);

        // Step 0: flow-aware rule match (always checked when a flow is active)
        if flow_ctx.active() {
            if let Some(engine) = &self.rule_engine {
                if let Some(m) = engine.matches(query, Some(&flow_ctx)) {
                    return build_rule_result(query, m, t_start, "flow_rule");
                }
            }
        }

        // Step 1: rules_first - keyword-only rule match (no LLM)
        if self.config.rules_first {
            if let Some(engine) = &self.rule_engine {
                if let Some(m) = engine.matches(query, Some(&flow_ctx)) {
                    return build_rule_result(query, m, t_start, "rules_first");
                }
            }
        }

        // Character routing: when the persona handler is enabled it owns every
        // non-rule turn, with mode context injected from the flow engine.
        if self.config.character_enabled {
            let result = self
                .run_character_turn(query, &turn, flow_state, t_start)
                .await;
            return result;
        }

        // Step 2: three-layer classification
        let t_classify = Instant::now();
        let mut classification = self
            .classify(query, turn.conversation_history, turn.last_intent, &flow_ctx)
            .await;
        let classify_ms = t_classify.elapsed().as_secs_f64() * 1000.0;
        if classification.classifier_layer.as_deref() == Some("llm") {
            llm_calls += 1;
        }

        // Step 3: confidence check
        if classification.confidence < self.config.min_confidence {
            if self.config.low_confidence_strategy == LowConfidenceStrategy::AskUser {
                return clarification_result(query, classification, t_start, classify_ms, llm_calls);
            }
            classification.intent = self.config.default_intent;
        }

        // Step 4: dispatch
        let mut intent = classification.intent;
        if !self.config.enabled_intents.contains(&intent) {
            intent = self.config.default_intent;
        }

        if intent == IntentType::Rag && self.rag_service().is_none() {
            match self.config.when_rag_unavailable {
                WhenRagUnavailable::Direct => intent = IntentType::Direct,
                WhenRagUnavailable::AskUser => {
                    return clarification_result(
                        query,
                        classification,
                        t_start,
                        classify_ms,
                        llm_calls,
                    );
                }
            }
        }

        let handler = self.handler_for(intent);
        let hctx = HandlerContext {
            conversation_history: turn.conversation_history,
            ..Default::default()
        };

        let t_handler = Instant::now();
        let mut result = handler.handle(query, &hctx).await;
        let mut handler_ms = t_handler.elapsed().as_secs_f64() * 1000.0;
        if matches!(intent, IntentType::Rag | IntentType::Direct) {
            llm_calls += 1;
        }

        // Step 5: empty-RAG fallback to Direct
        let mut fallback_used = false;
        if intent == IntentType::Rag
            && result.answer.as_deref().map_or(true, |a| a.trim().is_empty())
            && self.config.fallback_to_direct
        {
            let t_fb = Instant::now();
            let direct = DirectHandler::new(self.llm_client(), self.config.llm_timeout());
            result = direct.handle(query, &hctx).await;
            handler_ms += t_fb.elapsed().as_secs_f64() * 1000.0;
            fallback_used = true;
            llm_calls += 1;
            result.fallback_from_intent = Some(IntentType::Rag);
            // so the next turn's follow-up bias reflects the actual reply source
            result.intent = IntentType::Direct;
            tracing::info!("Orchestrator: RAG returned no answer, falling back to DIRECT");
        }

        // Step 6: assemble metrics
        let elapsed = t_start.elapsed().as_secs_f64() * 1000.0;
        let layer = classification.classifier_layer.clone();
        result.classification = Some(classification);
        result.fallback_used = fallback_used;
        result.metrics = Some(OrchestratorMetrics {
            classification_ms: classify_ms,
            handler_ms,
            total_ms: elapsed,
            llm_calls_count: llm_calls,
            fallback_used,
            classifier_layer: layer.clone(),
        });
        tracing::info!(
            intent = %result.intent,
            confidence = result.classification.as_ref().map(|c| c.confidence).unwrap_or(0.0),
            layer = layer.as_deref().unwrap_or(""),
            total_ms = elapsed as u64,
            fallback = fallback_used,
            "Orchestrator: turn complete"
        );
        result
    }

    async fn run_character_turn(
        &self,
        query: &str,
        turn: &TurnContext<'_>,
        flow_state: &Map<String, Value>,
        t_start: Instant,
    ) -> OrchestratorResult {
        let (active_mode, mode_context) = compute_mode_context(&self.config, flow_state);
        let availability_slots = self.collect_availability(active_mode, flow_state).await;

        let appt_state = mode_state(flow_state, Mode::Appointment);
        let order_state = mode_state(flow_state, Mode::Order);
        let reschedule_state = flatten_reschedule(&mode_state(flow_state, Mode::Reschedule));

        let mut system_prompt = self.config.character_system_prompt.clone();
        if let Some(restrictions) = self
            .config
            .restrictions
            .as_ref()
            .filter(|r| !r.trim().is_empty())
        {
            system_prompt.push_str("\n\n--- KISITLAMALAR ---\n");
            system_prompt.push_str(restrictions);
        }

        let handler = CharacterHandler::new(
            self.llm_client(),
            system_prompt,
            self.config.llm_timeout(),
            self.config.appointment_fields.clone(),
            self.config.order_fields.clone(),
        );
        let hctx = HandlerContext {
            conversation_history: turn.conversation_history,
            mode_context: mode_context.as_deref(),
            active_mode,
            appt_collected: Some(&appt_state),
            order_collected: Some(&order_state),
            reschedule_collected: Some(&reschedule_state),
            availability_slots,
        };

        let t_handler = Instant::now();
        let mut result = handler.handle(query, &hctx).await;
        let handler_ms = t_handler.elapsed().as_secs_f64() * 1000.0;

        let layer = match active_mode {
            Some(_) => "character_flow",
            None => "character",
        };
        let elapsed = t_start.elapsed().as_secs_f64() * 1000.0;
        result.classification = Some(ClassificationResult::new(IntentType::Character, 1.0, layer));
        result.metrics = Some(OrchestratorMetrics {
            classification_ms: 0.0,
            handler_ms,
            total_ms: elapsed,
            llm_calls_count: 1,
            fallback_used: false,
            classifier_layer: Some(layer.to_string()),
        });
        tracing::info!(
            mode = active_mode.map(|m| m.as_str()).unwrap_or("-"),
            total_ms = elapsed as u64,
            "Orchestrator: character turn complete"
        );
        result
    }

    /// Live slot options for the date the user picked, injected into the
    /// character prompt so the LLM only offers times that are actually free.
    /// Lookup failures degrade to "no injection", never fail the turn.
    async fn collect_availability(
        &self,
        active_mode: Option<Mode>,
        flow_state: &Map<String, Value>,
    ) -> HashMap<String, Vec<String>> {
        let mut out = HashMap::new();
        let Some(backend) = &self.flow_backend else {
            return out;
        };

        let (collected, service): (Map<String, Value>, Option<String>) = match active_mode {
            Some(Mode::Appointment) => {
                let appt = mode_state(flow_state, Mode::Appointment);
                let service = collected_str(&appt, "event_type").map(str::to_string);
                (appt, service)
            }
            Some(Mode::Reschedule) => {
                let rs = mode_state(flow_state, Mode::Reschedule);
                let updates = rs
                    .get("updates")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                (updates, None)
            }
            _ => return out,
        };

        if collected_str(&collected, "event_time").is_some() {
            return out;
        }
        let Some(artist) = collected_str(&collected, "artist").filter(|a| *a != SKIP_SENTINEL)
        else {
            return out;
        };
        let Some(date) = collected_str(&collected, "event_date").and_then(parse_flexible_date)
        else {
            return out;
        };

        match backend
            .availability_slots(artist, date, service.as_deref())
            .await
        {
            Ok(slots) if !slots.is_empty() => {
                out.insert("event_time".to_string(), slots);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Orchestrator: availability lookup failed: {e}");
            }
        }
        out
    }

    fn handler_for(&self, intent: IntentType) -> Box<dyn Handler> {
        let timeout = self.config.llm_timeout();
        match intent {
            IntentType::Rag => match self.rag_service() {
                Some(rag) => Box::new(RagHandler::new(rag)),
                None => Box::new(DirectHandler::new(self.llm_client(), timeout)),
            },
            IntentType::Rule => match &self.rule_engine {
                Some(engine) => Box::new(RuleHandler::new(
                    engine.clone(),
                    Some(self.llm_client()),
                    timeout,
                )),
                None => Box::new(DirectHandler::new(self.llm_client(), timeout)),
            },
            IntentType::Tool => Box::new(ToolHandler::new(self.tool_registry.clone())),
            IntentType::Direct | IntentType::Character => {
                Box::new(DirectHandler::new(self.llm_client(), timeout))
            }
        }
    }

    /// Run the three-layer classification cascade
    async fn classify(
        &self,
        query: &str,
        conversation_history: Option<&[Turn]>,
        last_intent: Option<IntentType>,
        flow_ctx: &FlowContext,
    ) -> ClassificationResult {
        // Layer 1: keyword pre-classifier
        if let Some(pre) = self.pre_classifier.try_classify(query) {
            if pre.confidence >= 0.9 {
                return pre;
            }
        }

        // Layer 2: embedding prototypes
        if let Some(emb) = self
            .embedding_classifier
            .as_ref()
            .filter(|c| c.ready())
        {
            let result = emb.classify(query).await;
            if result.confidence >= self.config.embedding_confidence_threshold {
                return result;
            }
        }

        // Layer 3: cache then LLM. The cache is bypassed when history is
        // present - context changes classification.
        if conversation_history.is_none() {
            if let Some(cached) = self.cache.get(query) {
                return cached;
            }
        }

        let max_turns = self.config.max_conversation_turns;
        let trimmed: Option<Vec<Turn>> = conversation_history.filter(|_| max_turns > 0).map(|h| {
            let limit = max_turns * 2;
            h[h.len().saturating_sub(limit)..].to_vec()
        });
        let rule_descriptions = self
            .rule_engine
            .as_ref()
            .map(|e| e.descriptions())
            .unwrap_or_default();
        let tool_descriptions = self.tool_registry.descriptions();

        let llm = self.llm_client();
        let result = self
            .llm_classifier
            .classify(
                llm.as_ref(),
                query,
                ClassifyRequest {
                    rule_descriptions: &rule_descriptions,
                    tool_descriptions: &tool_descriptions,
                    conversation_history: trimmed.as_deref(),
                    last_intent,
                    flow_ctx: Some(flow_ctx),
                },
            )
            .await;
        if conversation_history.is_none() {
            self.cache.put(query, result.clone());
        }
        result
    }

    // ========================================================================
    // Conversation-tracked processing
    // ========================================================================

    /// Full orchestration cycle with automatic persistence:
    /// load history + flow state, record the user message, process, apply
    /// flow effects, record the assistant message, persist flow state.
    pub async fn process_with_tracking(
        &self,
        query: &str,
        conversation_id: Uuid,
    ) -> Result<OrchestratorResult> {
        let store = self
            .store
            .clone()
            .ok_or_else(|| QueryonError::config("conversation store required for tracking"))?;

        let max_turns = self.config.max_conversation_turns;
        let history = store.history_as_turns(conversation_id, max_turns).await?;
        let last_intent = store.last_assistant_intent(conversation_id).await?;
        let flow_state_value = store.get_flow_state(conversation_id).await?;
        let flow_state: Map<String, Value> = flow_state_value
            .as_ref()
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        // The user message is committed before handlers run, so a parallel
        // provider webhook observes it.
        store.record_user_message(conversation_id, query).await?;

        let mut result = self
            .process(
                query,
                TurnContext {
                    conversation_history: if history.is_empty() {
                        None
                    } else {
                        Some(&history)
                    },
                    last_intent,
                    flow_state: Some(&flow_state),
                },
            )
            .await;

        // Rule-engine flow transitions win over anything a handler proposed.
        let flow_write = if result.intent == IntentType::Rule {
            match result
                .metadata
                .next_flow_context
                .as_ref()
                .and_then(FlowContext::to_value)
            {
                Some(v) => FlowWrite::Set(v),
                None => FlowWrite::Clear,
            }
        } else {
            self.apply_mode_effects(conversation_id, flow_state, &mut result)
                .await?
        };

        store
            .record_assistant_message(conversation_id, &result)
            .await?;

        match flow_write {
            FlowWrite::Keep => {}
            FlowWrite::Set(v) => store.update_flow_state(conversation_id, Some(v)).await?,
            FlowWrite::Clear => store.update_flow_state(conversation_id, None).await?,
        }

        Ok(result)
    }

    /// Merge handler-proposed mode updates into the flow state and run the
    /// durable side effects (save / cancel / reschedule) through the backend.
    async fn apply_mode_effects(
        &self,
        conversation_id: Uuid,
        mut flow_state: Map<String, Value>,
        result: &mut OrchestratorResult,
    ) -> Result<FlowWrite> {
        let mut changed = false;

        // Cancel by reference number
        if let Some(action) = result.metadata.appointment_cancel.clone() {
            if let Some(backend) = &self.flow_backend {
                let outcome = backend
                    .cancel_appointment(conversation_id, &action.appt_number)
                    .await?;
                result.metadata.extra.insert(
                    "cancel_outcome".into(),
                    Value::String(outcome_str(&outcome).into()),
                );
                if outcome == IntakeOutcome::Ok {
                    flow_state.remove("appointment");
                    flow_state.remove("active_mode");
                    changed = true;
                }
            }
        }

        // Reschedule request: open the reschedule sub-state
        if let Some(action) = result.metadata.reschedule_intent.clone() {
            let existing = mode_state(&flow_state, Mode::Reschedule);
            let same = collected_str(&existing, "appt_number") == Some(action.appt_number.as_str());
            if !same || collected_str(&existing, "appt_number").is_none() {
                let mut rs = Map::new();
                rs.insert("appt_number".into(), Value::String(action.appt_number));
                rs.insert("updates".into(), Value::Object(Map::new()));
                flow_state.insert("reschedule".into(), Value::Object(rs));
                changed = true;
            }
        }

        // Appointment field updates
        if let Some(update) = result.metadata.appointment_update.clone() {
            let mut appt = mode_state(&flow_state, Mode::Appointment);
            for (k, v) in update {
                appt.insert(k, v);
            }
            let confirmed = appt.get("confirmed").and_then(Value::as_bool).unwrap_or(false);
            let saved = appt.get("saved").and_then(Value::as_bool).unwrap_or(false);
            if !saved {
                flow_state.insert("active_mode".into(), Value::String("appointment".into()));
            }

            if confirmed && !saved && is_complete(&self.config.appointment_fields, &appt) {
                if let Some(backend) = &self.flow_backend {
                    let saved_appt = backend.save_appointment(conversation_id, &appt).await?;
                    appt.insert("saved".into(), Value::Bool(true));
                    appt.insert(
                        "appointment_id".into(),
                        Value::String(saved_appt.id.to_string()),
                    );
                    appt.insert(
                        "appt_number".into(),
                        Value::String(saved_appt.appt_number.clone()),
                    );
                    flow_state.remove("active_mode");
                    result.metadata.extra.insert(
                        "appointment_saved".into(),
                        serde_json::json!({
                            "id": saved_appt.id.to_string(),
                            "appt_number": saved_appt.appt_number,
                        }),
                    );
                    // Make sure the reference number reaches the user even if
                    // the LLM's confirmation reply omitted it.
                    let answer = result.answer.get_or_insert_with(String::new);
                    if !answer.contains(&saved_appt.appt_number) {
                        if !answer.is_empty() {
                            answer.push_str("\n\n");
                        }
                        answer.push_str(&format!("Randevu numaranız: {}", saved_appt.appt_number));
                    }
                }
            }

            flow_state.insert("appointment".into(), Value::Object(appt));
            changed = true;
        }

        // Order field updates
        if let Some(update) = result.metadata.order_update.clone() {
            if self.config.order_mode_enabled {
                let mut order = mode_state(&flow_state, Mode::Order);
                for (k, v) in update {
                    order.insert(k, v);
                }
                let confirmed = order.get("confirmed").and_then(Value::as_bool).unwrap_or(false);
                let saved = order.get("saved").and_then(Value::as_bool).unwrap_or(false);
                if !saved {
                    flow_state.insert("active_mode".into(), Value::String("order".into()));
                }

                if confirmed && !saved && is_complete(&self.config.order_fields, &order) {
                    if let Some(backend) = &self.flow_backend {
                        let order_id = backend.save_order(conversation_id, &order).await?;
                        order.insert("saved".into(), Value::Bool(true));
                        order.insert("order_id".into(), Value::String(order_id.to_string()));
                        flow_state.remove("active_mode");
                        result.metadata.extra.insert(
                            "order_saved".into(),
                            Value::String(order_id.to_string()),
                        );
                    }
                }

                flow_state.insert("order".into(), Value::Object(order));
                changed = true;
            }
        }

        // Reschedule field updates
        if let Some(update) = result.metadata.reschedule_update.clone() {
            let mut rs = mode_state(&flow_state, Mode::Reschedule);
            if let Some(appt_number) = collected_str(&rs, "appt_number").map(str::to_string) {
                let mut updates = rs
                    .get("updates")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                for (k, v) in update {
                    if k == "confirmed" {
                        rs.insert("confirmed".into(), v);
                    } else {
                        updates.insert(k, v);
                    }
                }

                let confirmed = rs.get("confirmed").and_then(Value::as_bool).unwrap_or(false);
                let saved = rs.get("saved").and_then(Value::as_bool).unwrap_or(false);
                let ready = collected_str(&updates, "event_date").is_some()
                    && collected_str(&updates, "event_time").is_some();

                if confirmed && !saved && ready {
                    if let Some(backend) = &self.flow_backend {
                        let outcome = backend
                            .reschedule_appointment(conversation_id, &appt_number, &updates)
                            .await?;
                        result.metadata.extra.insert(
                            "reschedule_outcome".into(),
                            Value::String(outcome_str(&outcome).into()),
                        );
                        match outcome {
                            IntakeOutcome::Ok => {
                                rs.insert("saved".into(), Value::Bool(true));
                            }
                            IntakeOutcome::Conflict => {
                                rs.remove("confirmed");
                                result.answer = Some(RESCHEDULE_CONFLICT_MESSAGE.to_string());
                            }
                            _ => {
                                // dead reference; drop the reschedule flow
                                flow_state.remove("reschedule");
                                rs.clear();
                            }
                        }
                    }
                }

                if !rs.is_empty() {
                    rs.insert("updates".into(), Value::Object(updates));
                    flow_state.insert("reschedule".into(), Value::Object(rs));
                }
                changed = true;
            }
        }

        if changed {
            Ok(FlowWrite::Set(Value::Object(flow_state)))
        } else {
            Ok(FlowWrite::Keep)
        }
    }
}

fn outcome_str(outcome: &IntakeOutcome) -> &'static str {
    match outcome {
        IntakeOutcome::Ok => "ok",
        IntakeOutcome::NotFound => "not_found",
        IntakeOutcome::Unauthorized => "unauthorized",
        IntakeOutcome::AlreadyCancelled => "already_cancelled",
        IntakeOutcome::Conflict => "conflict",
    }
}

/// Reschedule sub-state flattened for the character handler: reference
/// number + collected updates + confirmation flag
fn flatten_reschedule(rs: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(n) = rs.get("appt_number") {
        out.insert("appt_number".into(), n.clone());
    }
    if let Some(c) = rs.get("confirmed") {
        out.insert("confirmed".into(), c.clone());
    }
    if let Some(updates) = rs.get("updates").and_then(Value::as_object) {
        for (k, v) in updates {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

fn build_rule_result(
    query: &str,
    m: RuleMatch,
    t_start: Instant,
    layer: &str,
) -> OrchestratorResult {
    let elapsed = t_start.elapsed().as_secs_f64() * 1000.0;
    tracing::info!(layer, rule = %m.rule_name, total_ms = elapsed as u64, "Orchestrator: rule matched");
    let mut result =
        OrchestratorResult::new(query, IntentType::Rule).with_answer(m.rendered_answer);
    result.rule_matched = Some(m.rule_name);
    result.metadata.next_flow_context = m.next_flow_context;
    result.classification = Some(ClassificationResult::new(IntentType::Rule, 1.0, layer));
    result.metrics = Some(OrchestratorMetrics {
        total_ms: elapsed,
        classifier_layer: Some(layer.to_string()),
        ..Default::default()
    });
    result
}

fn clarification_result(
    query: &str,
    classification: ClassificationResult,
    t_start: Instant,
    classify_ms: f64,
    llm_calls: u32,
) -> OrchestratorResult {
    let elapsed = t_start.elapsed().as_secs_f64() * 1000.0;
    let layer = classification.classifier_layer.clone();
    let mut result = OrchestratorResult::new(query, classification.intent)
        .with_answer(CLARIFICATION_MESSAGE);
    result.needs_clarification = true;
    result.classification = Some(classification);
    result.metrics = Some(OrchestratorMetrics {
        classification_ms: classify_ms,
        total_ms: elapsed,
        llm_calls_count: llm_calls,
        classifier_layer: layer,
        ..Default::default()
    });
    result
}
