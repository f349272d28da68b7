// AvailabilityService: free slots = working hours - internal blocks -
// external busy times

use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use queryon_core::availability::{
    filter_available, generate_candidates, parse_flexible_date, parse_time, slot_duration_minutes,
    DAY_NAMES, WorkingDay,
};
use queryon_core::error::{QueryonError, Result};
use queryon_core::traits::FreeBusyProvider;
use queryon_storage::{CalendarResourceRow, Database};

/// Computes bookable slots and conflicts for calendar resources
#[derive(Clone)]
pub struct AvailabilityService {
    db: Database,
    freebusy: Option<Arc<dyn FreeBusyProvider>>,
}

impl AvailabilityService {
    pub fn new(db: Database) -> Self {
        AvailabilityService { db, freebusy: None }
    }

    pub fn with_freebusy(mut self, provider: Arc<dyn FreeBusyProvider>) -> Self {
        self.freebusy = Some(provider);
        self
    }

    /// Available slot start times ("HH:MM") for a resource on a date
    pub async fn get_slots(
        &self,
        calendar_resource_id: Uuid,
        date: NaiveDate,
        service_name: Option<&str>,
        buffer_minutes: i64,
    ) -> Result<Vec<String>> {
        let Some(resource) = self
            .db
            .get_calendar_resource(calendar_resource_id)
            .await
            .map_err(|e| QueryonError::storage(e.to_string()))?
        else {
            return Ok(Vec::new());
        };
        self.slots_for_resource(&resource, date, service_name, buffer_minutes)
            .await
    }

    /// Convenience: first active calendar for a free-text resource name
    pub async fn get_slots_by_resource_name(
        &self,
        resource_name: &str,
        date: NaiveDate,
        service_name: Option<&str>,
        buffer_minutes: i64,
    ) -> Result<Vec<String>> {
        let resources = self
            .db
            .list_calendar_resources_by_name(resource_name)
            .await
            .map_err(|e| QueryonError::storage(e.to_string()))?;
        let Some(resource) = resources.into_iter().next() else {
            return Ok(Vec::new());
        };
        self.slots_for_resource(&resource, date, service_name, buffer_minutes)
            .await
    }

    async fn slots_for_resource(
        &self,
        resource: &CalendarResourceRow,
        date: NaiveDate,
        service_name: Option<&str>,
        buffer_minutes: i64,
    ) -> Result<Vec<String>> {
        let day_name = DAY_NAMES[date.weekday().num_days_from_monday() as usize];
        let working: WorkingDay = resource
            .working_hours
            .get(day_name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        if !working.open {
            return Ok(Vec::new());
        }

        let durations = resource
            .service_durations
            .as_object()
            .cloned()
            .unwrap_or_default();
        let slot_duration = slot_duration_minutes(&durations, service_name);
        let total = slot_duration + buffer_minutes;

        let candidates = generate_candidates(&working, slot_duration, buffer_minutes);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut busy = self.internal_busy(resource.id, date).await?;

        // External calendars also contribute busy time. Provider failures are
        // logged and treated as no additional busy - never fatal.
        if resource.calendar_type == "external" {
            busy.extend(self.external_busy(resource, date).await);
        }

        Ok(filter_available(&candidates, total, &busy))
    }

    async fn internal_busy(
        &self,
        resource_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<(NaiveTime, NaiveTime)>> {
        let blocks = self
            .db
            .list_calendar_blocks_for_date(resource_id, date)
            .await
            .map_err(|e| QueryonError::storage(e.to_string()))?;
        Ok(blocks.iter().map(|b| (b.start_time, b.end_time)).collect())
    }

    async fn external_busy(
        &self,
        resource: &CalendarResourceRow,
        date: NaiveDate,
    ) -> Vec<(NaiveTime, NaiveTime)> {
        let Some(provider) = &self.freebusy else {
            return Vec::new();
        };
        let calendar_id = resource.calendar_id.as_deref().unwrap_or("primary");
        let Some(day_start) = date.and_hms_opt(0, 0, 0) else {
            return Vec::new();
        };
        let Some(day_end) = date.and_hms_opt(23, 59, 59) else {
            return Vec::new();
        };
        match provider
            .freebusy(
                calendar_id,
                Utc.from_utc_datetime(&day_start),
                Utc.from_utc_datetime(&day_end),
            )
            .await
        {
            Ok(ranges) => {
                tracing::info!(
                    calendar = calendar_id,
                    %date,
                    ranges = ranges.len(),
                    "AvailabilityService: external freebusy"
                );
                ranges
            }
            Err(e) => {
                tracing::warn!(
                    calendar = calendar_id,
                    "AvailabilityService: external freebusy failed: {e}"
                );
                Vec::new()
            }
        }
    }

    /// True when the artist already has a block overlapping the proposed
    /// slot. Used to reject reschedule-to-busy-slot before writing.
    pub async fn check_conflict(
        &self,
        artist_name: &str,
        event_date_str: &str,
        event_time_str: &str,
        service_name: Option<&str>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<bool> {
        let resources = self
            .db
            .list_calendar_resources_by_name(artist_name)
            .await
            .map_err(|e| QueryonError::storage(e.to_string()))?;
        let Some(resource) = resources.into_iter().next() else {
            return Ok(false);
        };

        let (Some(date), Some(start)) = (
            parse_flexible_date(event_date_str),
            parse_time(event_time_str),
        ) else {
            return Ok(false);
        };

        let durations = resource
            .service_durations
            .as_object()
            .cloned()
            .unwrap_or_default();
        let duration = slot_duration_minutes(&durations, service_name);

        let blocks = self
            .db
            .list_calendar_blocks_for_date(resource.id, date)
            .await
            .map_err(|e| QueryonError::storage(e.to_string()))?;
        let busy: Vec<(NaiveTime, NaiveTime)> = blocks
            .iter()
            .filter(|b| b.appointment_id != exclude_appointment_id || b.appointment_id.is_none())
            .map(|b| (b.start_time, b.end_time))
            .collect();

        Ok(queryon_core::availability::conflicts(start, duration, &busy))
    }
}
