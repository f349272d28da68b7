// Calendars API: resources, blocks, and the availability query

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use queryon_core::QueryonError;
use queryon_storage::{
    CalendarBlockRow, CalendarResourceRow, CreateCalendarBlock, CreateCalendarResource, Database,
    UpdateCalendarResource,
};

use crate::error::{ApiError, ApiResult};
use crate::services::AvailabilityService;

const VALID_BLOCK_TYPES: &[&str] = &["booked", "blocked", "break", "buffer"];

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CalendarResourceResponse {
    pub id: Uuid,
    pub name: String,
    pub resource_type: String,
    pub resource_name: String,
    pub calendar_type: String,
    pub timezone: Option<String>,
    pub working_hours: Value,
    pub service_durations: Value,
    pub is_active: bool,
}

fn resource_schema(r: CalendarResourceRow) -> CalendarResourceResponse {
    CalendarResourceResponse {
        id: r.id,
        name: r.name,
        resource_type: r.resource_type,
        resource_name: r.resource_name,
        calendar_type: r.calendar_type,
        timezone: r.timezone,
        working_hours: r.working_hours,
        service_durations: r.service_durations,
        is_active: r.is_active,
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateResourceRequest {
    pub name: String,
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
    pub resource_name: String,
    #[serde(default = "default_calendar_type")]
    pub calendar_type: String,
    pub calendar_id: Option<String>,
    pub credentials: Option<String>,
    pub timezone: Option<String>,
    #[serde(default)]
    pub working_hours: Value,
    #[serde(default)]
    pub service_durations: Value,
}

fn default_resource_type() -> String {
    "artist".to_string()
}

fn default_calendar_type() -> String {
    "internal".to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateResourceRequest {
    pub name: Option<String>,
    pub resource_type: Option<String>,
    pub resource_name: Option<String>,
    pub calendar_type: Option<String>,
    pub calendar_id: Option<String>,
    pub credentials: Option<String>,
    pub timezone: Option<String>,
    pub working_hours: Option<Value>,
    pub service_durations: Option<Value>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CalendarBlockResponse {
    pub id: Uuid,
    pub calendar_resource_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub block_type: String,
}

fn block_schema(b: CalendarBlockRow) -> CalendarBlockResponse {
    CalendarBlockResponse {
        id: b.id,
        calendar_resource_id: b.calendar_resource_id,
        appointment_id: b.appointment_id,
        date: b.date,
        start_time: b.start_time,
        end_time: b.end_time,
        block_type: b.block_type,
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBlockRequest {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default = "default_block_type")]
    pub block_type: String,
    pub appointment_id: Option<Uuid>,
}

fn default_block_type() -> String {
    "blocked".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SlotsParams {
    pub date: NaiveDate,
    pub service: Option<String>,
    #[serde(default)]
    pub buffer_minutes: i64,
}

#[derive(Debug, Deserialize)]
pub struct BlocksParams {
    pub date: NaiveDate,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SlotsResponse {
    pub date: NaiveDate,
    pub slots: Vec<String>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/calendars",
            post(create_resource).get(list_resources),
        )
        .route(
            "/v1/calendars/:id",
            get(get_resource).put(update_resource).delete(delete_resource),
        )
        .route(
            "/v1/calendars/:id/blocks",
            post(create_block).get(list_blocks),
        )
        .route("/v1/calendars/:id/blocks/:block_id", axum::routing::delete(delete_block))
        .route("/v1/calendars/:id/slots", get(get_slots))
        .with_state(state)
}

/// POST /v1/calendars
#[utoipa::path(
    post,
    path = "/v1/calendars",
    request_body = CreateResourceRequest,
    responses((status = 201, description = "Calendar resource created", body = CalendarResourceResponse)),
    tag = "calendars"
)]
pub async fn create_resource(
    State(state): State<AppState>,
    Json(req): Json<CreateResourceRequest>,
) -> ApiResult<(StatusCode, Json<CalendarResourceResponse>)> {
    if req.resource_name.trim().is_empty() {
        return Err(ApiError(QueryonError::validation(
            "resource_name must not be empty",
        )));
    }
    let row = state
        .db
        .create_calendar_resource(CreateCalendarResource {
            name: req.name,
            resource_type: req.resource_type,
            resource_name: req.resource_name,
            calendar_type: req.calendar_type,
            calendar_id: req.calendar_id,
            credentials: req.credentials,
            timezone: req.timezone,
            working_hours: if req.working_hours.is_null() {
                serde_json::json!({})
            } else {
                req.working_hours
            },
            service_durations: if req.service_durations.is_null() {
                serde_json::json!({})
            } else {
                req.service_durations
            },
        })
        .await?;
    Ok((StatusCode::CREATED, Json(resource_schema(row))))
}

/// GET /v1/calendars
#[utoipa::path(
    get,
    path = "/v1/calendars",
    responses((status = 200, description = "Active calendar resources", body = Vec<CalendarResourceResponse>)),
    tag = "calendars"
)]
pub async fn list_resources(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<CalendarResourceResponse>>> {
    let rows = state.db.list_calendar_resources().await?;
    Ok(Json(rows.into_iter().map(resource_schema).collect()))
}

/// GET /v1/calendars/:id
#[utoipa::path(
    get,
    path = "/v1/calendars/{id}",
    params(("id" = Uuid, Path, description = "Calendar resource ID")),
    responses(
        (status = 200, description = "Calendar resource", body = CalendarResourceResponse),
        (status = 404, description = "Calendar resource not found")
    ),
    tag = "calendars"
)]
pub async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CalendarResourceResponse>> {
    let row = state
        .db
        .get_calendar_resource(id)
        .await?
        .ok_or_else(|| ApiError(QueryonError::not_found("calendar resource not found")))?;
    Ok(Json(resource_schema(row)))
}

/// PUT /v1/calendars/:id
#[utoipa::path(
    put,
    path = "/v1/calendars/{id}",
    params(("id" = Uuid, Path, description = "Calendar resource ID")),
    request_body = UpdateResourceRequest,
    responses(
        (status = 200, description = "Updated calendar resource", body = CalendarResourceResponse),
        (status = 404, description = "Calendar resource not found")
    ),
    tag = "calendars"
)]
pub async fn update_resource(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateResourceRequest>,
) -> ApiResult<Json<CalendarResourceResponse>> {
    let row = state
        .db
        .update_calendar_resource(
            id,
            UpdateCalendarResource {
                name: req.name,
                resource_type: req.resource_type,
                resource_name: req.resource_name,
                calendar_type: req.calendar_type,
                calendar_id: req.calendar_id,
                credentials: req.credentials,
                timezone: req.timezone,
                working_hours: req.working_hours,
                service_durations: req.service_durations,
                is_active: req.is_active,
            },
        )
        .await?
        .ok_or_else(|| ApiError(QueryonError::not_found("calendar resource not found")))?;
    Ok(Json(resource_schema(row)))
}

/// DELETE /v1/calendars/:id
#[utoipa::path(
    delete,
    path = "/v1/calendars/{id}",
    params(("id" = Uuid, Path, description = "Calendar resource ID")),
    responses(
        (status = 204, description = "Calendar resource deleted"),
        (status = 404, description = "Calendar resource not found")
    ),
    tag = "calendars"
)]
pub async fn delete_resource(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let deleted = state.db.delete_calendar_resource(id).await?;
    if !deleted {
        return Err(ApiError(QueryonError::not_found(
            "calendar resource not found",
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/calendars/:id/blocks
#[utoipa::path(
    post,
    path = "/v1/calendars/{id}/blocks",
    params(("id" = Uuid, Path, description = "Calendar resource ID")),
    request_body = CreateBlockRequest,
    responses(
        (status = 201, description = "Block created", body = CalendarBlockResponse),
        (status = 400, description = "Invalid block range")
    ),
    tag = "calendars"
)]
pub async fn create_block(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateBlockRequest>,
) -> ApiResult<(StatusCode, Json<CalendarBlockResponse>)> {
    if req.end_time <= req.start_time {
        return Err(ApiError(QueryonError::validation(
            "end_time must be after start_time",
        )));
    }
    if !VALID_BLOCK_TYPES.contains(&req.block_type.as_str()) {
        return Err(ApiError(QueryonError::validation("invalid block_type")));
    }
    let row = state
        .db
        .create_calendar_block(CreateCalendarBlock {
            calendar_resource_id: id,
            appointment_id: req.appointment_id,
            date: req.date,
            start_time: req.start_time,
            end_time: req.end_time,
            block_type: req.block_type,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(block_schema(row))))
}

/// GET /v1/calendars/:id/blocks?date=YYYY-MM-DD
#[utoipa::path(
    get,
    path = "/v1/calendars/{id}/blocks",
    params(("id" = Uuid, Path, description = "Calendar resource ID")),
    responses((status = 200, description = "Blocks for the date", body = Vec<CalendarBlockResponse>)),
    tag = "calendars"
)]
pub async fn list_blocks(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<BlocksParams>,
) -> ApiResult<Json<Vec<CalendarBlockResponse>>> {
    let rows = state.db.list_calendar_blocks_for_date(id, params.date).await?;
    Ok(Json(rows.into_iter().map(block_schema).collect()))
}

/// DELETE /v1/calendars/:id/blocks/:block_id
#[utoipa::path(
    delete,
    path = "/v1/calendars/{id}/blocks/{block_id}",
    params(
        ("id" = Uuid, Path, description = "Calendar resource ID"),
        ("block_id" = Uuid, Path, description = "Block ID")
    ),
    responses(
        (status = 204, description = "Block deleted"),
        (status = 404, description = "Block not found")
    ),
    tag = "calendars"
)]
pub async fn delete_block(
    State(state): State<AppState>,
    Path((_id, block_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let deleted = state.db.delete_calendar_block(block_id).await?;
    if !deleted {
        return Err(ApiError(QueryonError::not_found("block not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/calendars/:id/slots?date=YYYY-MM-DD - free slot start times
#[utoipa::path(
    get,
    path = "/v1/calendars/{id}/slots",
    params(("id" = Uuid, Path, description = "Calendar resource ID")),
    responses((status = 200, description = "Free slots", body = SlotsResponse)),
    tag = "calendars"
)]
pub async fn get_slots(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<SlotsParams>,
) -> ApiResult<Json<SlotsResponse>> {
    let availability = AvailabilityService::new((*state.db).clone());
    let slots = availability
        .get_slots(id, params.date, params.service.as_deref(), params.buffer_minutes)
        .await?;
    Ok(Json(SlotsResponse {
        date: params.date,
        slots,
    }))
}
