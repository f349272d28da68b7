// End-to-end orchestrator tests over in-memory backends

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use queryon_core::rules::Rule;
use queryon_core::testing::{
    InMemoryConversationStore, RecordingFlowBackend, ScriptedLlm, StaticRag,
};
use queryon_core::traits::{ConversationStore, NewConversation};
use queryon_core::{
    FieldDef, IntentType, LowConfidenceStrategy, Orchestrator, OrchestratorConfig, RuleEngine,
    TurnContext,
};

fn hours_rule() -> Rule {
    Rule {
        id: Uuid::now_v7(),
        name: "working-hours".into(),
        description: "Answers questions about business hours".into(),
        trigger_patterns: vec!["çalışma saati".into()],
        response_template: "Saatlerimiz: {hours}".into(),
        variables: json!({"hours": "09:00-17:00"}).as_object().cloned().unwrap(),
        priority: 10,
        is_active: true,
        flow_id: None,
        step_key: None,
        required_step: None,
        next_steps: None,
    }
}

fn flow_rules() -> Vec<Rule> {
    let entry = Rule {
        id: Uuid::now_v7(),
        name: "hizmet-entry".into(),
        description: "Service menu entry".into(),
        trigger_patterns: vec!["hizmet".into()],
        response_template: "Hangi hizmet? A) Danışmanlık".into(),
        variables: Default::default(),
        priority: 5,
        is_active: true,
        flow_id: Some("hizmet".into()),
        step_key: Some("start".into()),
        required_step: None,
        next_steps: Some(BTreeMap::from([("A".to_string(), "danismanlik".to_string())])),
    };
    let step = Rule {
        id: Uuid::now_v7(),
        name: "hizmet-danismanlik".into(),
        description: "Consulting branch".into(),
        trigger_patterns: vec!["*".into()],
        response_template: "Danışmanlık randevusu için teşekkürler.".into(),
        variables: Default::default(),
        priority: 5,
        is_active: true,
        flow_id: Some("hizmet".into()),
        step_key: Some("danismanlik".into()),
        required_step: Some("start".into()),
        next_steps: None,
    };
    vec![entry, step]
}

async fn start_conversation(store: &InMemoryConversationStore) -> Uuid {
    store
        .start(NewConversation {
            platform: "web".into(),
            ..Default::default()
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn pure_faq_match_without_llm() {
    let llm = Arc::new(ScriptedLlm::new(Vec::<String>::new()));
    let config = OrchestratorConfig {
        rules_first: true,
        ..Default::default()
    };
    let orch = Orchestrator::new(llm.clone(), config)
        .with_rule_engine(Arc::new(RuleEngine::new(vec![hours_rule()])));

    let result = orch
        .process("Çalışma saati nedir?", TurnContext::default())
        .await;

    assert_eq!(result.answer.as_deref(), Some("Saatlerimiz: 09:00-17:00"));
    assert_eq!(result.intent, IntentType::Rule);
    assert_eq!(result.rule_matched.as_deref(), Some("working-hours"));
    let classification = result.classification.unwrap();
    assert_eq!(classification.classifier_layer.as_deref(), Some("rules_first"));
    assert_eq!(llm.call_count(), 0);
    assert_eq!(result.metrics.unwrap().llm_calls_count, 0);
}

#[tokio::test]
async fn rag_empty_answer_falls_back_to_direct() {
    // First LLM call: classification -> rag 0.9. Second: direct answer.
    let llm = Arc::new(ScriptedLlm::new([
        "<thinking>docs question</thinking>\n{\"intent\": \"rag\", \"confidence\": 0.9, \"reasoning\": \"kb\"}",
        "Hello!",
    ]));
    let config = OrchestratorConfig {
        rules_first: true,
        fallback_to_direct: true,
        ..Default::default()
    };
    let orch = Orchestrator::new(llm.clone(), config)
        .with_rag(Arc::new(StaticRag::empty()))
        .with_rule_engine(Arc::new(RuleEngine::new(vec![hours_rule()])));

    let result = orch
        .process("what does the handbook say", TurnContext::default())
        .await;

    assert_eq!(result.answer.as_deref(), Some("Hello!"));
    assert_eq!(result.intent, IntentType::Direct);
    assert!(result.fallback_used);
    assert_eq!(result.fallback_from_intent, Some(IntentType::Rag));
    // classification is preserved as the original rag verdict
    let classification = result.classification.unwrap();
    assert_eq!(classification.intent, IntentType::Rag);
    assert_eq!(result.metrics.as_ref().unwrap().llm_calls_count, 3);
}

#[tokio::test]
async fn low_confidence_ask_user_returns_clarification() {
    let llm = Arc::new(ScriptedLlm::new([
        "{\"intent\": \"direct\", \"confidence\": 0.2, \"reasoning\": \"unclear\"}",
    ]));
    let config = OrchestratorConfig {
        rules_first: false,
        min_confidence: 0.7,
        low_confidence_strategy: LowConfidenceStrategy::AskUser,
        ..Default::default()
    };
    let orch = Orchestrator::new(llm, config);

    let result = orch.process("asdf qwer", TurnContext::default()).await;

    assert!(result.needs_clarification);
    assert!(result.answer.unwrap().contains("anlayamadım"));
}

#[tokio::test]
async fn flow_advances_by_choice_across_tracked_turns() {
    let llm = Arc::new(ScriptedLlm::new(Vec::<String>::new()));
    let store = Arc::new(InMemoryConversationStore::new());
    let config = OrchestratorConfig {
        rules_first: true,
        ..Default::default()
    };
    let orch = Orchestrator::new(llm, config)
        .with_rule_engine(Arc::new(RuleEngine::new(flow_rules())))
        .with_store(store.clone());

    let conversation_id = start_conversation(&store).await;

    // Turn 1: entry rule fires and the flow context is persisted
    let r1 = orch
        .process_with_tracking("hizmet", conversation_id)
        .await
        .unwrap();
    assert_eq!(r1.rule_matched.as_deref(), Some("hizmet-entry"));
    let state = store.flow_state_of(conversation_id).unwrap();
    assert_eq!(state["flow_id"], "hizmet");
    assert_eq!(state["current_step"], "start");

    // Turn 2: choice resolves to the terminal step and the flow is cleared
    let r2 = orch
        .process_with_tracking("A", conversation_id)
        .await
        .unwrap();
    assert_eq!(r2.rule_matched.as_deref(), Some("hizmet-danismanlik"));
    assert_eq!(
        r2.answer.as_deref(),
        Some("Danışmanlık randevusu için teşekkürler.")
    );
    assert!(store.flow_state_of(conversation_id).is_none());
    // 2 user + 2 assistant messages recorded
    assert_eq!(store.message_count(conversation_id), 4);
}

fn appt_fields() -> Vec<FieldDef> {
    vec![
        FieldDef {
            key: "name".into(),
            label: Some("Ad".into()),
            required: true,
            ..Default::default()
        },
        FieldDef {
            key: "phone".into(),
            label: Some("Telefon".into()),
            required: true,
            ..Default::default()
        },
    ]
}

#[tokio::test]
async fn character_flow_collects_then_saves_on_confirmation() {
    let llm = Arc::new(ScriptedLlm::new([
        // turn 1 (no active mode yet): persona reply, then the passive
        // extraction call captures both fields and opens the mode
        "Merhaba Ada! Bilgilerinizi aldım, onaylıyor musunuz?",
        "{\"name\": \"Ada\", \"phone\": \"05321234567\"}",
        // turn 2 (active appointment mode): single structured flow call
        "<extract>{\"confirmed\": true}</extract><response>Harika, kaydediyorum!</response>",
    ]));
    let store = Arc::new(InMemoryConversationStore::new());
    let backend = Arc::new(RecordingFlowBackend::default());
    let config = OrchestratorConfig {
        rules_first: false,
        character_enabled: true,
        character_system_prompt: "Sen bir güzellik salonu asistanısın.".into(),
        appointment_fields: appt_fields(),
        ..Default::default()
    };
    let orch = Orchestrator::new(llm, config)
        .with_store(store.clone())
        .with_flow_backend(backend.clone());

    let conversation_id = start_conversation(&store).await;

    let r1 = orch
        .process_with_tracking("Randevu: adım Ada, telefonum 0532 123 45 67", conversation_id)
        .await
        .unwrap();
    assert_eq!(r1.intent, IntentType::Character);
    let state = store.flow_state_of(conversation_id).unwrap();
    assert_eq!(state["active_mode"], "appointment");
    assert_eq!(state["appointment"]["name"], "Ada");

    let r2 = orch
        .process_with_tracking("evet onaylıyorum", conversation_id)
        .await
        .unwrap();
    assert_eq!(backend.saved_appointments.lock().unwrap().len(), 1);
    // reference number surfaced to the user
    assert!(r2.answer.unwrap().contains("RND-2026-0001"));
    let state = store.flow_state_of(conversation_id).unwrap();
    assert_eq!(state["appointment"]["saved"], Value::Bool(true));
    assert_eq!(state["appointment"]["appt_number"], "RND-2026-0001");
    assert!(state.get("active_mode").is_none());
}

#[tokio::test]
async fn cancel_with_reference_number_reaches_backend() {
    // persona reply, then "null" for the opportunistic extraction call
    let llm = Arc::new(ScriptedLlm::new(["Randevunuz iptal edildi.", "null"]));
    let store = Arc::new(InMemoryConversationStore::new());
    let backend = Arc::new(RecordingFlowBackend::default());
    let config = OrchestratorConfig {
        rules_first: false,
        character_enabled: true,
        character_system_prompt: "persona".into(),
        appointment_fields: appt_fields(),
        ..Default::default()
    };
    let orch = Orchestrator::new(llm, config)
        .with_store(store.clone())
        .with_flow_backend(backend.clone());

    let conversation_id = start_conversation(&store).await;
    let result = orch
        .process_with_tracking("RND-2026-0042 randevumu iptal et", conversation_id)
        .await
        .unwrap();

    assert_eq!(
        backend.cancels.lock().unwrap().as_slice(),
        ["RND-2026-0042"]
    );
    assert_eq!(
        result.metadata.extra.get("cancel_outcome").unwrap(),
        "ok"
    );
}
