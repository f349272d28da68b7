// Orchestrator config API: single-row get/put with hot apply

use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use serde_json::Value;
use std::sync::Arc;

use queryon_core::OrchestratorConfig;
use queryon_storage::Database;

use crate::error::ApiResult;
use crate::services::OrchestratorService;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub orchestrator: Arc<OrchestratorService>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/orchestrator-config", get(get_config).put(put_config))
        .with_state(state)
}

/// GET /v1/orchestrator-config - the effective configuration (stored values
/// merged with defaults)
#[utoipa::path(
    get,
    path = "/v1/orchestrator-config",
    responses((status = 200, description = "Effective orchestrator configuration")),
    tag = "orchestrator-config"
)]
pub async fn get_config(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stored = state.db.get_orchestrator_config().await?;
    let config = OrchestratorConfig::from_value(stored.as_ref());
    Ok(Json(config.to_value()))
}

/// PUT /v1/orchestrator-config - persist and hot-apply a new configuration.
/// Unknown keys are ignored (and logged); invalid enum values fall back to
/// defaults rather than failing the request.
#[utoipa::path(
    put,
    path = "/v1/orchestrator-config",
    responses((status = 200, description = "Stored configuration")),
    tag = "orchestrator-config"
)]
pub async fn put_config(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    // Round-trip through the typed struct so only recognised fields persist
    let config = OrchestratorConfig::from_value(Some(&body));
    let normalised = config.to_value();
    state.db.put_orchestrator_config(&normalised).await?;
    state.orchestrator.rebuild().await?;
    Ok(Json(normalised))
}
