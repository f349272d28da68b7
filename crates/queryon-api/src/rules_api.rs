// Rules API: CRUD over deterministic rules
//
// Every mutation rebuilds the orchestrator so the new rule-engine snapshot
// swaps in atomically; readers never see a half-updated rule set.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use queryon_core::QueryonError;
use queryon_storage::{CreateRule, Database, RuleRow, UpdateRule};

use crate::error::{ApiError, ApiResult};
use crate::services::OrchestratorService;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub orchestrator: Arc<OrchestratorService>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RuleResponse {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub trigger_patterns: Vec<String>,
    pub response_template: String,
    pub variables: Value,
    pub priority: i32,
    pub is_active: bool,
    pub flow_id: Option<String>,
    pub step_key: Option<String>,
    pub required_step: Option<String>,
    pub next_steps: Option<Value>,
}

fn to_schema(r: RuleRow) -> RuleResponse {
    RuleResponse {
        id: r.id,
        name: r.name,
        description: r.description,
        trigger_patterns: r.trigger_patterns,
        response_template: r.response_template,
        variables: r.variables,
        priority: r.priority,
        is_active: r.is_active,
        flow_id: r.flow_id,
        step_key: r.step_key,
        required_step: r.required_step,
        next_steps: r.next_steps,
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRuleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub trigger_patterns: Vec<String>,
    pub response_template: String,
    #[serde(default)]
    pub variables: Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub flow_id: Option<String>,
    pub step_key: Option<String>,
    pub required_step: Option<String>,
    pub next_steps: Option<Value>,
}

fn default_true() -> bool {
    true
}

/// Update request: flow fields use double options so `null` clears while a
/// missing key leaves the column unchanged
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateRuleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger_patterns: Option<Vec<String>>,
    pub response_template: Option<String>,
    pub variables: Option<Value>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
    #[serde(default, with = "double_option")]
    pub flow_id: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub step_key: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub required_step: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub next_steps: Option<Option<Value>>,
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

fn validate_flow_fields(
    flow_id: Option<&str>,
    step_key: Option<&str>,
) -> Result<(), ApiError> {
    if flow_id.is_some() && step_key.is_none() {
        return Err(ApiError(QueryonError::validation(
            "flow-bound rules require step_key",
        )));
    }
    Ok(())
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/rules", post(create_rule).get(list_rules))
        .route(
            "/v1/rules/:id",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .with_state(state)
}

/// POST /v1/rules
#[utoipa::path(
    post,
    path = "/v1/rules",
    request_body = CreateRuleRequest,
    responses(
        (status = 201, description = "Rule created", body = RuleResponse),
        (status = 400, description = "Invalid rule")
    ),
    tag = "rules"
)]
pub async fn create_rule(
    State(state): State<AppState>,
    Json(req): Json<CreateRuleRequest>,
) -> ApiResult<(StatusCode, Json<RuleResponse>)> {
    if req.trigger_patterns.is_empty() {
        return Err(ApiError(QueryonError::validation(
            "at least one trigger pattern is required",
        )));
    }
    validate_flow_fields(req.flow_id.as_deref(), req.step_key.as_deref())?;

    let row = state
        .db
        .create_rule(CreateRule {
            name: req.name,
            description: req.description,
            trigger_patterns: req.trigger_patterns,
            response_template: req.response_template,
            variables: if req.variables.is_null() {
                serde_json::json!({})
            } else {
                req.variables
            },
            priority: req.priority,
            is_active: req.is_active,
            flow_id: req.flow_id,
            step_key: req.step_key,
            required_step: req.required_step,
            next_steps: req.next_steps,
        })
        .await?;

    state.orchestrator.rebuild().await?;
    Ok((StatusCode::CREATED, Json(to_schema(row))))
}

/// GET /v1/rules
#[utoipa::path(
    get,
    path = "/v1/rules",
    responses((status = 200, description = "All rules by priority", body = Vec<RuleResponse>)),
    tag = "rules"
)]
pub async fn list_rules(State(state): State<AppState>) -> ApiResult<Json<Vec<RuleResponse>>> {
    let rows = state.db.list_rules().await?;
    Ok(Json(rows.into_iter().map(to_schema).collect()))
}

/// GET /v1/rules/:id
#[utoipa::path(
    get,
    path = "/v1/rules/{id}",
    params(("id" = Uuid, Path, description = "Rule ID")),
    responses(
        (status = 200, description = "Rule", body = RuleResponse),
        (status = 404, description = "Rule not found")
    ),
    tag = "rules"
)]
pub async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RuleResponse>> {
    let row = state
        .db
        .get_rule(id)
        .await?
        .ok_or_else(|| ApiError(QueryonError::not_found("rule not found")))?;
    Ok(Json(to_schema(row)))
}

/// PUT /v1/rules/:id
#[utoipa::path(
    put,
    path = "/v1/rules/{id}",
    params(("id" = Uuid, Path, description = "Rule ID")),
    request_body = UpdateRuleRequest,
    responses(
        (status = 200, description = "Updated rule", body = RuleResponse),
        (status = 404, description = "Rule not found")
    ),
    tag = "rules"
)]
pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRuleRequest>,
) -> ApiResult<Json<RuleResponse>> {
    let row = state
        .db
        .update_rule(
            id,
            UpdateRule {
                name: req.name,
                description: req.description,
                trigger_patterns: req.trigger_patterns,
                response_template: req.response_template,
                variables: req.variables,
                priority: req.priority,
                is_active: req.is_active,
                flow_id: req.flow_id,
                step_key: req.step_key,
                required_step: req.required_step,
                next_steps: req.next_steps,
            },
        )
        .await?
        .ok_or_else(|| ApiError(QueryonError::not_found("rule not found")))?;

    validate_flow_fields(row.flow_id.as_deref(), row.step_key.as_deref())?;
    state.orchestrator.rebuild().await?;
    Ok(Json(to_schema(row)))
}

/// DELETE /v1/rules/:id
#[utoipa::path(
    delete,
    path = "/v1/rules/{id}",
    params(("id" = Uuid, Path, description = "Rule ID")),
    responses(
        (status = 204, description = "Rule deleted"),
        (status = 404, description = "Rule not found")
    ),
    tag = "rules"
)]
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let deleted = state.db.delete_rule(id).await?;
    if !deleted {
        return Err(ApiError(QueryonError::not_found("rule not found")));
    }
    state.orchestrator.rebuild().await?;
    Ok(StatusCode::NO_CONTENT)
}
