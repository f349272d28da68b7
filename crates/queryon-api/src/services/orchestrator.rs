// OrchestratorService: build a fully-wired Orchestrator from DB state and
// hold it behind a swappable pointer for hot reload

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};

use queryon_core::classify::EmbeddingClassifier;
use queryon_core::handlers::{ToolDefinition, ToolRegistry};
use queryon_core::traits::LlmClient;
use queryon_core::{Orchestrator, OrchestratorConfig, RuleEngine};
use queryon_openai::{NoopLlm, OpenAiClient, OpenAiEmbeddingClient};
use queryon_storage::{rule_from_row, Database, PgConversationStore};

use crate::services::appointment::AppointmentService;
use crate::services::availability::AvailabilityService;

/// Holds the live orchestrator; admin edits rebuild and atomically swap the
/// pointer so in-flight turns keep their snapshot.
pub struct OrchestratorService {
    db: Database,
    inner: RwLock<Arc<Orchestrator>>,
}

impl OrchestratorService {
    pub async fn build(db: Database) -> Result<Arc<Self>> {
        let orchestrator = build_orchestrator(&db).await?;
        Ok(Arc::new(OrchestratorService {
            db,
            inner: RwLock::new(Arc::new(orchestrator)),
        }))
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.inner.read().expect("orchestrator lock poisoned").clone()
    }

    /// Reload config + rules + tools from the database and swap the live
    /// orchestrator
    pub async fn rebuild(&self) -> Result<()> {
        let orchestrator = build_orchestrator(&self.db).await?;
        *self.inner.write().expect("orchestrator lock poisoned") = Arc::new(orchestrator);
        tracing::info!("OrchestratorService: orchestrator rebuilt");
        Ok(())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn llm_from_env() -> Arc<dyn LlmClient> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(api_key) if !api_key.trim().is_empty() => {
            let model =
                std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
            let mut client = OpenAiClient::new(api_key, model);
            if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
                client = client.with_base_url(base_url);
            }
            Arc::new(client)
        }
        _ => {
            tracing::warn!("OPENAI_API_KEY not set; using noop LLM");
            Arc::new(NoopLlm)
        }
    }
}

async fn build_embedding_classifier() -> Option<EmbeddingClassifier> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    if api_key.trim().is_empty() {
        return None;
    }
    let model = std::env::var("OPENAI_EMBEDDING_MODEL")
        .unwrap_or_else(|_| "text-embedding-3-small".to_string());
    let mut client = OpenAiEmbeddingClient::new(api_key, model);
    if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
        client = client.with_base_url(base_url);
    }

    let mut classifier = EmbeddingClassifier::new(Arc::new(client));
    match classifier.build_prototypes(None).await {
        Ok(()) => Some(classifier),
        Err(e) => {
            tracing::warn!("embedding classifier unavailable: {e}");
            None
        }
    }
}

async fn build_orchestrator(db: &Database) -> Result<Orchestrator> {
    let config_value = db
        .get_orchestrator_config()
        .await
        .context("failed to load orchestrator config")?;
    let config = OrchestratorConfig::from_value(config_value.as_ref());

    let llm = llm_from_env();

    let rule_rows = db.list_active_rules().await.context("failed to load rules")?;
    let rule_count = rule_rows.len();
    let rule_engine = if rule_rows.is_empty() {
        None
    } else {
        Some(Arc::new(RuleEngine::new(
            rule_rows.into_iter().map(rule_from_row).collect(),
        )))
    };

    let mut tool_registry = ToolRegistry::new();
    for tool in db
        .list_enabled_tool_configs()
        .await
        .context("failed to load tool configs")?
    {
        tool_registry.register(ToolDefinition {
            name: tool.name,
            description: tool.description,
            parameters: tool.parameters,
            trigger_phrases: tool.trigger_phrases,
        });
    }

    let store = Arc::new(PgConversationStore::new(db.clone()));
    let availability = AvailabilityService::new(db.clone());
    let intake = Arc::new(AppointmentService::new(
        db.clone(),
        availability,
        config.appointment_webhook_url.clone(),
        config.appointment_webhook_secret.clone(),
    ));

    let mut orchestrator = Orchestrator::new(llm, config)
        .with_tool_registry(Arc::new(tool_registry))
        .with_store(store)
        .with_flow_backend(intake);
    if let Some(engine) = rule_engine {
        orchestrator = orchestrator.with_rule_engine(engine);
    }
    if let Some(classifier) = build_embedding_classifier().await {
        orchestrator = orchestrator.with_embedding_classifier(classifier);
    }

    tracing::info!(rules = rule_count, "OrchestratorService: orchestrator built");
    Ok(orchestrator)
}
