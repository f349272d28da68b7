// AppointmentService: intake side effects of the chat flows
//
// Maps collected flow fields to appointment/order rows, keeps the artist's
// calendar blocks in sync, verifies ownership for cancel/reschedule by
// reference number, and fires the signed lifecycle webhooks.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde_json::{Map, Value};
use uuid::Uuid;

use queryon_core::availability::{parse_flexible_date, parse_time, slot_duration_minutes};
use queryon_core::error::{QueryonError, Result};
use queryon_core::flow::SKIP_SENTINEL;
use queryon_core::traits::{FlowBackend, IntakeOutcome, SavedAppointment};
use queryon_core::webhook::{EVENT_CANCELLED, EVENT_CREATED, EVENT_UPDATED};
use queryon_storage::{
    AppointmentRow, CreateAppointment, CreateCalendarBlock, CreateOrder, Database,
    UpdateAppointment,
};

use crate::services::availability::AvailabilityService;
use crate::services::webhook;

/// Collected-field keys that map onto dedicated appointment columns; anything
/// else lands in extra_fields
const STANDARD_KEYS: &[(&str, &str)] = &[
    ("name", "contact_name"),
    ("surname", "contact_surname"),
    ("phone", "contact_phone"),
    ("email", "contact_email"),
    ("service", "service"),
    ("event_type", "service"),
    ("location", "location"),
    ("artist", "artist"),
    ("event_date", "event_date"),
    ("event_time", "event_time"),
    ("notes", "notes"),
    ("summary", "summary"),
];

const FLOW_META_KEYS: &[&str] = &[
    "confirmed",
    "saved",
    "appointment_id",
    "appt_number",
    "active_mode",
    "order_id",
];

#[derive(Clone)]
pub struct AppointmentService {
    db: Database,
    availability: AvailabilityService,
    webhook_url: Option<String>,
    webhook_secret: Option<String>,
}

fn storage_err(e: anyhow::Error) -> QueryonError {
    QueryonError::storage(e.to_string())
}

fn value_str(v: &Value) -> Option<&str> {
    v.as_str().filter(|s| !s.is_empty() && *s != SKIP_SENTINEL)
}

impl AppointmentService {
    pub fn new(
        db: Database,
        availability: AvailabilityService,
        webhook_url: Option<String>,
        webhook_secret: Option<String>,
    ) -> Self {
        AppointmentService {
            db,
            availability,
            webhook_url,
            webhook_secret,
        }
    }

    pub fn dispatch_webhook(&self, event: &'static str, appointment: AppointmentRow) {
        webhook::dispatch_detached(
            event,
            appointment,
            self.webhook_url.clone(),
            self.webhook_secret.clone(),
        );
    }

    /// Create an appointment from the chatbot's collected flow state.
    /// Standard keys map to dedicated columns; other keys go to extra_fields.
    pub async fn create_from_flow_state(
        &self,
        conversation_id: Option<Uuid>,
        collected: &Map<String, Value>,
    ) -> Result<AppointmentRow> {
        let mut input = CreateAppointment {
            conversation_id,
            extra_fields: Value::Object(Map::new()),
            ..Default::default()
        };

        for (key, value) in collected {
            if FLOW_META_KEYS.contains(&key.as_str()) {
                continue;
            }
            let Some(text) = value_str(value) else {
                continue;
            };
            match STANDARD_KEYS
                .iter()
                .find(|(k, _)| *k == key.as_str())
                .map(|(_, col)| *col)
            {
                Some("contact_name") => input.contact_name = Some(text.to_string()),
                Some("contact_surname") => input.contact_surname = Some(text.to_string()),
                Some("contact_phone") => input.contact_phone = Some(text.to_string()),
                Some("contact_email") => input.contact_email = Some(text.to_string()),
                Some("service") => input.service = Some(text.to_string()),
                Some("location") => input.location = Some(text.to_string()),
                Some("artist") => input.artist = Some(text.to_string()),
                Some("event_date") => input.event_date = Some(text.to_string()),
                Some("event_time") => input.event_time = Some(text.to_string()),
                Some("notes") => input.notes = Some(text.to_string()),
                Some("summary") => input.summary = Some(text.to_string()),
                _ => {
                    if let Some(extra) = input.extra_fields.as_object_mut() {
                        extra.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        let appointment = self
            .db
            .create_appointment(input)
            .await
            .map_err(storage_err)?;
        tracing::info!(
            appointment = %appointment.id,
            number = appointment.appt_number.as_deref().unwrap_or(""),
            "AppointmentService: created appointment"
        );

        self.write_block_for(&appointment).await;
        self.dispatch_webhook(EVENT_CREATED, appointment.clone());
        Ok(appointment)
    }

    /// A saved appointment owns a `booked` block on the artist's calendar.
    /// Block failures are logged, not fatal - the appointment row is the
    /// source of truth and the admin can re-sync.
    async fn write_block_for(&self, appointment: &AppointmentRow) {
        let Some((resource_id, date, start, end)) = self.block_coords(appointment).await else {
            return;
        };
        let result = self
            .db
            .create_calendar_block(CreateCalendarBlock {
                calendar_resource_id: resource_id,
                appointment_id: Some(appointment.id),
                date,
                start_time: start,
                end_time: end,
                block_type: "booked".into(),
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(
                appointment = %appointment.id,
                "AppointmentService: calendar block write failed: {e}"
            );
        }
    }

    async fn block_coords(
        &self,
        appointment: &AppointmentRow,
    ) -> Option<(Uuid, NaiveDate, NaiveTime, NaiveTime)> {
        let artist = appointment.artist.as_deref()?;
        let date = parse_flexible_date(appointment.event_date.as_deref()?)?;
        let start = parse_time(appointment.event_time.as_deref()?)?;

        let resources = self
            .db
            .list_calendar_resources_by_name(artist)
            .await
            .ok()?;
        let resource = resources.into_iter().next()?;

        let durations = resource
            .service_durations
            .as_object()
            .cloned()
            .unwrap_or_default();
        let duration = slot_duration_minutes(&durations, appointment.service.as_deref());
        let end = start.overflowing_add_signed(chrono::Duration::minutes(duration)).0;
        Some((resource.id, date, start, end))
    }

    async fn move_block_for(&self, appointment: &AppointmentRow) {
        if let Err(e) = self
            .db
            .delete_calendar_blocks_for_appointment(appointment.id)
            .await
        {
            tracing::warn!(
                appointment = %appointment.id,
                "AppointmentService: stale block cleanup failed: {e}"
            );
        }
        self.write_block_for(appointment).await;
    }

    /// Same conversation always has permission; otherwise the requesting
    /// conversation must share platform + non-null channel_id with the one
    /// that booked.
    async fn is_authorized(
        &self,
        appointment: &AppointmentRow,
        requesting_conversation_id: Uuid,
    ) -> Result<bool> {
        if appointment.conversation_id == Some(requesting_conversation_id) {
            return Ok(true);
        }
        let Some(owner_id) = appointment.conversation_id else {
            return Ok(false);
        };
        let req = self
            .db
            .get_conversation(requesting_conversation_id)
            .await
            .map_err(storage_err)?;
        let owner = self.db.get_conversation(owner_id).await.map_err(storage_err)?;
        let (Some(req), Some(owner)) = (req, owner) else {
            return Ok(false);
        };
        let (Some(req_channel), Some(owner_channel)) = (req.channel_id, owner.channel_id) else {
            return Ok(false);
        };
        Ok(req.platform == owner.platform && req_channel == owner_channel)
    }

    /// Cancel an appointment by reference number, verifying ownership.
    /// Cancelling frees the appointment's calendar blocks.
    pub async fn cancel_by_number(
        &self,
        appt_number: &str,
        requesting_conversation_id: Uuid,
    ) -> Result<IntakeOutcome> {
        let Some(appointment) = self
            .db
            .get_appointment_by_number(appt_number)
            .await
            .map_err(storage_err)?
        else {
            return Ok(IntakeOutcome::NotFound);
        };
        if appointment.status == "cancelled" {
            return Ok(IntakeOutcome::AlreadyCancelled);
        }
        if !self.is_authorized(&appointment, requesting_conversation_id).await? {
            return Ok(IntakeOutcome::Unauthorized);
        }

        let updated = self
            .db
            .update_appointment_status(appointment.id, "cancelled")
            .await
            .map_err(storage_err)?;
        if let Err(e) = self
            .db
            .delete_calendar_blocks_for_appointment(appointment.id)
            .await
        {
            tracing::warn!(
                appointment = %appointment.id,
                "AppointmentService: block cleanup failed: {e}"
            );
        }
        if let Some(updated) = updated {
            self.dispatch_webhook(EVENT_CANCELLED, updated);
        }
        tracing::info!(number = appt_number, "AppointmentService: cancelled appointment");
        Ok(IntakeOutcome::Ok)
    }

    /// Reschedule by reference number: ownership check, conflict check, then
    /// update + block move + webhook.
    pub async fn reschedule_by_number(
        &self,
        appt_number: &str,
        requesting_conversation_id: Uuid,
        updates: &Map<String, Value>,
    ) -> Result<IntakeOutcome> {
        let Some(appointment) = self
            .db
            .get_appointment_by_number(appt_number)
            .await
            .map_err(storage_err)?
        else {
            return Ok(IntakeOutcome::NotFound);
        };
        if appointment.status == "cancelled" {
            return Ok(IntakeOutcome::AlreadyCancelled);
        }
        if !self.is_authorized(&appointment, requesting_conversation_id).await? {
            return Ok(IntakeOutcome::Unauthorized);
        }

        let new_artist = updates
            .get("artist")
            .and_then(value_str)
            .or(appointment.artist.as_deref());
        let new_date = updates
            .get("event_date")
            .and_then(value_str)
            .or(appointment.event_date.as_deref());
        let new_time = updates
            .get("event_time")
            .and_then(value_str)
            .or(appointment.event_time.as_deref());

        if let (Some(artist), Some(date), Some(time)) = (new_artist, new_date, new_time) {
            let conflict = self
                .availability
                .check_conflict(
                    artist,
                    date,
                    time,
                    appointment.service.as_deref(),
                    Some(appointment.id),
                )
                .await?;
            if conflict {
                return Ok(IntakeOutcome::Conflict);
            }
        }

        let input = UpdateAppointment {
            artist: updates
                .get("artist")
                .and_then(value_str)
                .map(str::to_string),
            event_date: updates
                .get("event_date")
                .and_then(value_str)
                .map(str::to_string),
            event_time: updates
                .get("event_time")
                .and_then(value_str)
                .map(str::to_string),
            service: updates
                .get("service")
                .and_then(value_str)
                .map(str::to_string),
            ..Default::default()
        };
        let Some(updated) = self
            .db
            .update_appointment(appointment.id, input)
            .await
            .map_err(storage_err)?
        else {
            return Ok(IntakeOutcome::NotFound);
        };

        self.move_block_for(&updated).await;
        self.dispatch_webhook(EVENT_UPDATED, updated);
        tracing::info!(number = appt_number, "AppointmentService: rescheduled appointment");
        Ok(IntakeOutcome::Ok)
    }

    /// Create an order row from the order mode's collected state
    pub async fn create_order_from_flow_state(
        &self,
        conversation_id: Option<Uuid>,
        collected: &Map<String, Value>,
    ) -> Result<Uuid> {
        let mut input = CreateOrder {
            conversation_id,
            extra_fields: Value::Object(Map::new()),
            ..Default::default()
        };
        for (key, value) in collected {
            if FLOW_META_KEYS.contains(&key.as_str()) {
                continue;
            }
            let Some(text) = value_str(value) else {
                continue;
            };
            match key.as_str() {
                "name" => input.contact_name = Some(text.to_string()),
                "surname" => input.contact_surname = Some(text.to_string()),
                "phone" => input.contact_phone = Some(text.to_string()),
                "email" => input.contact_email = Some(text.to_string()),
                "product" => input.product = Some(text.to_string()),
                "quantity" => input.quantity = Some(text.to_string()),
                "address" => input.address = Some(text.to_string()),
                "notes" => input.notes = Some(text.to_string()),
                "summary" => input.summary = Some(text.to_string()),
                _ => {
                    if let Some(extra) = input.extra_fields.as_object_mut() {
                        extra.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        let order = self.db.create_order(input).await.map_err(storage_err)?;
        tracing::info!(order = %order.id, "AppointmentService: created order");
        Ok(order.id)
    }
}

#[async_trait]
impl FlowBackend for AppointmentService {
    async fn save_appointment(
        &self,
        conversation_id: Uuid,
        collected: &Map<String, Value>,
    ) -> Result<SavedAppointment> {
        let appointment = self
            .create_from_flow_state(Some(conversation_id), collected)
            .await?;
        Ok(SavedAppointment {
            id: appointment.id,
            appt_number: appointment.appt_number.unwrap_or_default(),
        })
    }

    async fn save_order(
        &self,
        conversation_id: Uuid,
        collected: &Map<String, Value>,
    ) -> Result<Uuid> {
        self.create_order_from_flow_state(Some(conversation_id), collected)
            .await
    }

    async fn cancel_appointment(
        &self,
        conversation_id: Uuid,
        appt_number: &str,
    ) -> Result<IntakeOutcome> {
        self.cancel_by_number(appt_number, conversation_id).await
    }

    async fn reschedule_appointment(
        &self,
        conversation_id: Uuid,
        appt_number: &str,
        updates: &Map<String, Value>,
    ) -> Result<IntakeOutcome> {
        self.reschedule_by_number(appt_number, conversation_id, updates)
            .await
    }

    async fn availability_slots(
        &self,
        artist: &str,
        date: NaiveDate,
        service: Option<&str>,
    ) -> Result<Vec<String>> {
        self.availability
            .get_slots_by_resource_name(artist, date, service, 0)
            .await
    }
}
