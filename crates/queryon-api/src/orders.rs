// Orders API: list, get, status transitions

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use queryon_core::QueryonError;
use queryon_storage::{Database, OrderRow};

use crate::error::{ApiError, ApiResult};

const VALID_STATUSES: &[&str] = &["pending", "confirmed", "cancelled"];

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub status: String,
    pub contact_name: Option<String>,
    pub contact_surname: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub product: Option<String>,
    pub quantity: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub summary: Option<String>,
    pub extra_fields: Value,
    pub created_at: String,
}

fn to_schema(o: OrderRow) -> OrderResponse {
    OrderResponse {
        id: o.id,
        conversation_id: o.conversation_id,
        status: o.status,
        contact_name: o.contact_name,
        contact_surname: o.contact_surname,
        contact_phone: o.contact_phone,
        contact_email: o.contact_email,
        product: o.product,
        quantity: o.quantity,
        address: o.address,
        notes: o.notes,
        summary: o.summary,
        extra_fields: o.extra_fields,
        created_at: o.created_at.to_rfc3339(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrderStatusUpdateRequest {
    pub status: String,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/orders", get(list_orders))
        .route("/v1/orders/:id", get(get_order))
        .route("/v1/orders/:id/status", put(update_status))
        .with_state(state)
}

/// GET /v1/orders
#[utoipa::path(
    get,
    path = "/v1/orders",
    responses((status = 200, description = "Orders", body = Vec<OrderResponse>)),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<OrderResponse>>> {
    if let Some(status) = &params.status {
        if !VALID_STATUSES.contains(&status.as_str()) {
            return Err(ApiError(QueryonError::validation("invalid status filter")));
        }
    }
    let rows = state
        .db
        .list_orders(params.status.as_deref(), params.skip, params.limit.min(500))
        .await?;
    Ok(Json(rows.into_iter().map(to_schema).collect()))
}

/// GET /v1/orders/:id
#[utoipa::path(
    get,
    path = "/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order", body = OrderResponse),
        (status = 404, description = "Order not found")
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<OrderResponse>> {
    let row = state
        .db
        .get_order(id)
        .await?
        .ok_or_else(|| ApiError(QueryonError::not_found("order not found")))?;
    Ok(Json(to_schema(row)))
}

/// PUT /v1/orders/:id/status
#[utoipa::path(
    put,
    path = "/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = OrderStatusUpdateRequest,
    responses(
        (status = 200, description = "Updated order", body = OrderResponse),
        (status = 404, description = "Order not found")
    ),
    tag = "orders"
)]
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<OrderStatusUpdateRequest>,
) -> ApiResult<Json<OrderResponse>> {
    if !VALID_STATUSES.contains(&req.status.as_str()) {
        return Err(ApiError(QueryonError::validation("invalid status")));
    }
    let updated = state
        .db
        .update_order_status(id, &req.status)
        .await?
        .ok_or_else(|| ApiError(QueryonError::not_found("order not found")))?;
    Ok(Json(to_schema(updated)))
}
