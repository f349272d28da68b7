// Appointments API: list, get, update/reschedule, status, delete, plus the
// inbound signed update webhook

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use queryon_core::webhook::{EVENT_CANCELLED, EVENT_UPDATED};
use queryon_core::{OrchestratorConfig, QueryonError};
use queryon_storage::{AppointmentRow, Database, UpdateAppointment};

use crate::error::{ApiError, ApiResult};
use crate::services::webhook::dispatch_detached;
use crate::services::AvailabilityService;

const VALID_STATUSES: &[&str] = &["pending", "confirmed", "cancelled"];

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AppointmentResponse {
    pub id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub appt_number: Option<String>,
    pub status: String,
    pub service: Option<String>,
    pub location: Option<String>,
    pub artist: Option<String>,
    pub event_date: Option<String>,
    pub event_time: Option<String>,
    pub contact_name: Option<String>,
    pub contact_surname: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub notes: Option<String>,
    pub summary: Option<String>,
    pub extra_fields: Value,
    pub created_at: String,
    pub updated_at: String,
}

fn to_schema(a: AppointmentRow) -> AppointmentResponse {
    AppointmentResponse {
        id: a.id,
        conversation_id: a.conversation_id,
        appt_number: a.appt_number,
        status: a.status,
        service: a.service,
        location: a.location,
        artist: a.artist,
        event_date: a.event_date,
        event_time: a.event_time,
        contact_name: a.contact_name,
        contact_surname: a.contact_surname,
        contact_phone: a.contact_phone,
        contact_email: a.contact_email,
        notes: a.notes,
        summary: a.summary,
        extra_fields: a.extra_fields,
        created_at: a.created_at.to_rfc3339(),
        updated_at: a.updated_at.to_rfc3339(),
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
pub struct AppointmentUpdateRequest {
    pub status: Option<String>,
    pub service: Option<String>,
    pub location: Option<String>,
    pub artist: Option<String>,
    pub event_date: Option<String>,
    pub event_time: Option<String>,
    pub contact_name: Option<String>,
    pub contact_surname: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusUpdateRequest {
    pub status: String,
}

/// Payload accepted by the inbound webhook endpoint. All fields except
/// appt_number are optional - only provided fields are updated.
#[derive(Debug, Deserialize, ToSchema)]
pub struct InboundWebhookPayload {
    pub appt_number: String,
    pub status: Option<String>,
    pub event_date: Option<String>,
    pub event_time: Option<String>,
    pub artist: Option<String>,
    pub service: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub contact_name: Option<String>,
    pub contact_surname: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/appointments", get(list_appointments))
        .route(
            "/v1/appointments/:id",
            get(get_appointment)
                .put(update_appointment)
                .delete(delete_appointment),
        )
        .route("/v1/appointments/:id/status", put(update_status))
        .route("/v1/appointments/webhook/inbound", post(inbound_webhook))
        .with_state(state)
}

async fn webhook_config(db: &Database) -> ApiResult<(Option<String>, Option<String>)> {
    let config_value = db.get_orchestrator_config().await?;
    let config = OrchestratorConfig::from_value(config_value.as_ref());
    Ok((
        config.appointment_webhook_url,
        config.appointment_webhook_secret,
    ))
}

/// GET /v1/appointments
#[utoipa::path(
    get,
    path = "/v1/appointments",
    responses((status = 200, description = "Appointments", body = Vec<AppointmentResponse>)),
    tag = "appointments"
)]
pub async fn list_appointments(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<AppointmentResponse>>> {
    if let Some(status) = &params.status {
        if !VALID_STATUSES.contains(&status.as_str()) {
            return Err(ApiError(QueryonError::validation("invalid status filter")));
        }
    }
    let rows = state
        .db
        .list_appointments(params.status.as_deref(), params.skip, params.limit.min(500))
        .await?;
    Ok(Json(rows.into_iter().map(to_schema).collect()))
}

/// GET /v1/appointments/:id
#[utoipa::path(
    get,
    path = "/v1/appointments/{id}",
    params(("id" = Uuid, Path, description = "Appointment ID")),
    responses(
        (status = 200, description = "Appointment", body = AppointmentResponse),
        (status = 404, description = "Appointment not found")
    ),
    tag = "appointments"
)]
pub async fn get_appointment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AppointmentResponse>> {
    let row = state
        .db
        .get_appointment(id)
        .await?
        .ok_or_else(|| ApiError(QueryonError::not_found("appointment not found")))?;
    Ok(Json(to_schema(row)))
}

/// PUT /v1/appointments/:id - update fields; a date/time/artist change is a
/// reschedule and is rejected with 409 when the target slot is busy
#[utoipa::path(
    put,
    path = "/v1/appointments/{id}",
    params(("id" = Uuid, Path, description = "Appointment ID")),
    request_body = AppointmentUpdateRequest,
    responses(
        (status = 200, description = "Updated appointment", body = AppointmentResponse),
        (status = 404, description = "Appointment not found"),
        (status = 409, description = "Target slot conflicts with an existing booking")
    ),
    tag = "appointments"
)]
pub async fn update_appointment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AppointmentUpdateRequest>,
) -> ApiResult<Json<AppointmentResponse>> {
    let existing = state
        .db
        .get_appointment(id)
        .await?
        .ok_or_else(|| ApiError(QueryonError::not_found("appointment not found")))?;

    if let Some(status) = &req.status {
        if !VALID_STATUSES.contains(&status.as_str()) {
            return Err(ApiError(QueryonError::validation("invalid status")));
        }
    }

    // Reschedule path: conflict-check the effective slot before writing
    let is_reschedule =
        req.event_date.is_some() || req.event_time.is_some() || req.artist.is_some();
    if is_reschedule {
        let artist = req.artist.as_deref().or(existing.artist.as_deref());
        let date = req.event_date.as_deref().or(existing.event_date.as_deref());
        let time = req.event_time.as_deref().or(existing.event_time.as_deref());
        if let (Some(artist), Some(date), Some(time)) = (artist, date, time) {
            let availability = AvailabilityService::new((*state.db).clone());
            let conflict = availability
                .check_conflict(artist, date, time, existing.service.as_deref(), Some(id))
                .await?;
            if conflict {
                return Err(ApiError(QueryonError::conflict("conflict")));
            }
        }
    }

    let status_change = req.status.clone();
    let updated = state
        .db
        .update_appointment(
            id,
            UpdateAppointment {
                status: req.status,
                contact_name: req.contact_name,
                contact_surname: req.contact_surname,
                contact_phone: req.contact_phone,
                contact_email: req.contact_email,
                service: req.service,
                location: req.location,
                artist: req.artist,
                event_date: req.event_date,
                event_time: req.event_time,
                notes: req.notes,
            },
        )
        .await?
        .ok_or_else(|| ApiError(QueryonError::not_found("appointment not found")))?;

    let event = if status_change.as_deref() == Some("cancelled") {
        EVENT_CANCELLED
    } else {
        EVENT_UPDATED
    };
    let (url, secret) = webhook_config(&state.db).await?;
    dispatch_detached(event, updated.clone(), url, secret);

    Ok(Json(to_schema(updated)))
}

/// PUT /v1/appointments/:id/status
#[utoipa::path(
    put,
    path = "/v1/appointments/{id}/status",
    params(("id" = Uuid, Path, description = "Appointment ID")),
    request_body = StatusUpdateRequest,
    responses(
        (status = 200, description = "Updated appointment", body = AppointmentResponse),
        (status = 404, description = "Appointment not found")
    ),
    tag = "appointments"
)]
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdateRequest>,
) -> ApiResult<Json<AppointmentResponse>> {
    if !VALID_STATUSES.contains(&req.status.as_str()) {
        return Err(ApiError(QueryonError::validation("invalid status")));
    }
    let updated = state
        .db
        .update_appointment_status(id, &req.status)
        .await?
        .ok_or_else(|| ApiError(QueryonError::not_found("appointment not found")))?;

    if req.status == "cancelled" {
        state.db.delete_calendar_blocks_for_appointment(id).await?;
    }

    let event = if req.status == "cancelled" {
        EVENT_CANCELLED
    } else {
        EVENT_UPDATED
    };
    let (url, secret) = webhook_config(&state.db).await?;
    dispatch_detached(event, updated.clone(), url, secret);

    Ok(Json(to_schema(updated)))
}

/// DELETE /v1/appointments/:id - deleting an appointment frees its blocks
/// (FK SET NULL would orphan them; we remove them outright)
#[utoipa::path(
    delete,
    path = "/v1/appointments/{id}",
    params(("id" = Uuid, Path, description = "Appointment ID")),
    responses(
        (status = 204, description = "Appointment deleted"),
        (status = 404, description = "Appointment not found")
    ),
    tag = "appointments"
)]
pub async fn delete_appointment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.db.delete_calendar_blocks_for_appointment(id).await?;
    let deleted = state.db.delete_appointment(id).await?;
    if !deleted {
        return Err(ApiError(QueryonError::not_found("appointment not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Constant-time string comparison for the shared webhook secret
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

/// POST /v1/appointments/webhook/inbound - authenticated update from a
/// downstream system. The X-Webhook-Secret header must equal the configured
/// secret under constant-time comparison.
#[utoipa::path(
    post,
    path = "/v1/appointments/webhook/inbound",
    request_body = InboundWebhookPayload,
    responses(
        (status = 200, description = "Updated appointment", body = AppointmentResponse),
        (status = 401, description = "Invalid webhook secret"),
        (status = 404, description = "Unknown appt_number")
    ),
    tag = "appointments"
)]
pub async fn inbound_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<InboundWebhookPayload>,
) -> ApiResult<Json<AppointmentResponse>> {
    let (url, secret) = webhook_config(&state.db).await?;
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return Err(ApiError(QueryonError::Unauthorized(
            "webhook secret not configured".into(),
        )));
    };
    let provided = headers
        .get("X-Webhook-Secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !constant_time_eq(&secret, provided) {
        return Err(ApiError(QueryonError::Unauthorized(
            "invalid webhook secret".into(),
        )));
    }

    if let Some(status) = &payload.status {
        if !VALID_STATUSES.contains(&status.as_str()) {
            return Err(ApiError(QueryonError::validation("invalid status")));
        }
    }

    let appointment = state
        .db
        .get_appointment_by_number(&payload.appt_number)
        .await?
        .ok_or_else(|| ApiError(QueryonError::not_found("unknown appt_number")))?;

    let status_change = payload.status.clone();
    let updated = state
        .db
        .update_appointment(
            appointment.id,
            UpdateAppointment {
                status: payload.status,
                contact_name: payload.contact_name,
                contact_surname: payload.contact_surname,
                contact_phone: payload.contact_phone,
                contact_email: payload.contact_email,
                service: payload.service,
                location: payload.location,
                artist: payload.artist,
                event_date: payload.event_date,
                event_time: payload.event_time,
                notes: payload.notes,
            },
        )
        .await?
        .ok_or_else(|| ApiError(QueryonError::not_found("unknown appt_number")))?;

    let event = if status_change.as_deref() == Some("cancelled") {
        EVENT_CANCELLED
    } else {
        EVENT_UPDATED
    };
    dispatch_detached(event, updated.clone(), url, Some(secret));

    Ok(Json(to_schema(updated)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_strings() {
        assert!(constant_time_eq("s3cr3t", "s3cr3t"));
        assert!(!constant_time_eq("s3cr3t", "s3cr3T"));
        assert!(!constant_time_eq("s3cr3t", "s3cr3t "));
        assert!(!constant_time_eq("", "x"));
    }
}
