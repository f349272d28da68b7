// Outbound appointment webhook dispatcher
//
// Fire-and-forget: every event is signed with HMAC-SHA256 over the exact
// JSON body and POSTed with a bounded timeout. Non-2xx responses are logged,
// not retried here - the caller can reissue. A missing URL or secret
// silently no-ops.

use chrono::Utc;
use serde_json::json;
use std::time::Duration;

use queryon_core::webhook::{build_payload, sign, EVENT_HEADER, SIGNATURE_HEADER};
use queryon_storage::AppointmentRow;

const TIMEOUT: Duration = Duration::from_secs(10);

fn appointment_data(appointment: &AppointmentRow) -> serde_json::Value {
    json!({
        "id": appointment.id.to_string(),
        "appt_number": appointment.appt_number,
        "status": appointment.status,
        "contact_name": appointment.contact_name,
        "contact_surname": appointment.contact_surname,
        "contact_phone": appointment.contact_phone,
        "contact_email": appointment.contact_email,
        "service": appointment.service,
        "location": appointment.location,
        "artist": appointment.artist,
        "event_date": appointment.event_date,
        "event_time": appointment.event_time,
        "notes": appointment.notes,
        "extra_fields": appointment.extra_fields,
        "created_at": appointment.created_at.to_rfc3339(),
    })
}

/// POST a signed lifecycle event. Never fails the caller's turn.
pub async fn dispatch(
    event: &str,
    appointment: &AppointmentRow,
    webhook_url: Option<&str>,
    webhook_secret: Option<&str>,
) {
    let (Some(url), Some(secret)) = (webhook_url, webhook_secret) else {
        return;
    };
    if url.is_empty() || secret.is_empty() {
        return;
    }

    let payload = build_payload(event, appointment_data(appointment), Utc::now());
    let body = match serde_json::to_vec(&payload) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("AppointmentWebhook: payload serialisation failed: {e}");
            return;
        }
    };
    let signature = sign(&body, secret);

    let client = reqwest::Client::new();
    let result = client
        .post(url)
        .timeout(TIMEOUT)
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .header(EVENT_HEADER, event)
        .body(body)
        .send()
        .await;

    match result {
        Ok(resp) if resp.status().is_success() => {
            tracing::info!(event, url, status = %resp.status(), "AppointmentWebhook: dispatched");
        }
        Ok(resp) => {
            tracing::warn!(event, url, status = %resp.status(), "AppointmentWebhook: endpoint returned error");
        }
        Err(e) => {
            tracing::warn!(event, url, "AppointmentWebhook: dispatch failed: {e}");
        }
    }
}

/// Spawn the dispatch as a detached task so the request's lifetime never
/// gates delivery
pub fn dispatch_detached(
    event: &'static str,
    appointment: AppointmentRow,
    webhook_url: Option<String>,
    webhook_secret: Option<String>,
) {
    tokio::spawn(async move {
        dispatch(
            event,
            &appointment,
            webhook_url.as_deref(),
            webhook_secret.as_deref(),
        )
        .await;
    });
}
