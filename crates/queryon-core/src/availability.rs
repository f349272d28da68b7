// Availability math: free slots = working hours - busy ranges
//
// Pure functions over parsed working hours and busy intervals; the DB-facing
// service loads the calendar resource and blocks, then composes these.

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::flow::validate::tr_month_number;

pub const DAY_NAMES: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// One open interval within a working day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingInterval {
    pub start: String,
    pub end: String,
}

/// Working hours for a single day of week
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingDay {
    #[serde(default)]
    pub open: bool,
    #[serde(default)]
    pub slots: Vec<WorkingInterval>,
}

/// Parse "HH:MM" or "HH:MM:SS"
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

/// Parse a collected date string: ISO, dotted/slashed European, or Turkish
/// "15 Mart 2026"
pub fn parse_flexible_date(s: &str) -> Option<NaiveDate> {
    let v = s.trim();
    for fmt in ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(v, fmt) {
            return Some(d);
        }
    }
    let parts: Vec<&str> = v.split_whitespace().collect();
    if parts.len() == 3 {
        let day = parts[0].parse::<u32>().ok()?;
        let month = tr_month_number(&parts[1].to_lowercase())?;
        let year = parts[2].parse::<i32>().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    None
}

/// Slot duration in minutes for a service, falling back to `default`, then 60
pub fn slot_duration_minutes(
    service_durations: &serde_json::Map<String, serde_json::Value>,
    service_name: Option<&str>,
) -> i64 {
    if let Some(service) = service_name {
        if let Some(d) = service_durations.get(service).and_then(|v| v.as_i64()) {
            return d;
        }
    }
    service_durations
        .get("default")
        .and_then(|v| v.as_i64())
        .unwrap_or(60)
}

/// Candidate start times: every `slot_duration` minutes within each working
/// interval, as long as `start + slot_duration + buffer` fits.
pub fn generate_candidates(
    working: &WorkingDay,
    slot_duration: i64,
    buffer_minutes: i64,
) -> Vec<NaiveTime> {
    if !working.open || slot_duration <= 0 {
        return Vec::new();
    }
    let total = slot_duration + buffer_minutes;
    let mut candidates = Vec::new();
    for interval in &working.slots {
        let Some(start) = parse_time(&interval.start) else {
            continue;
        };
        let Some(end) = parse_time(&interval.end) else {
            continue;
        };
        let mut cursor = minutes_of(start);
        let end_minutes = minutes_of(end);
        while cursor + total <= end_minutes {
            if let Some(t) = time_of(cursor) {
                candidates.push(t);
            }
            cursor += slot_duration;
        }
    }
    candidates
}

/// Half-open overlap: `slot_start < busy_end AND slot_end > busy_start`.
/// Touching boundaries (slot_end == busy_start) do not overlap.
pub fn overlaps_any(
    start: NaiveTime,
    end: NaiveTime,
    busy: &[(NaiveTime, NaiveTime)],
) -> bool {
    busy.iter()
        .any(|(busy_start, busy_end)| start < *busy_end && end > *busy_start)
}

/// Filter candidates against busy ranges, returning "HH:MM" strings
pub fn filter_available(
    candidates: &[NaiveTime],
    total_minutes: i64,
    busy: &[(NaiveTime, NaiveTime)],
) -> Vec<String> {
    candidates
        .iter()
        .filter_map(|slot_start| {
            let end = time_of(minutes_of(*slot_start) + total_minutes)?;
            if overlaps_any(*slot_start, end, busy) {
                None
            } else {
                Some(format!("{:02}:{:02}", slot_start.hour(), slot_start.minute()))
            }
        })
        .collect()
}

/// Would a booking of `duration_minutes` starting at `start` collide with any
/// busy range? Used to reject reschedule-to-busy-slot before writing.
pub fn conflicts(
    start: NaiveTime,
    duration_minutes: i64,
    busy: &[(NaiveTime, NaiveTime)],
) -> bool {
    let Some(end) = time_of(minutes_of(start) + duration_minutes) else {
        return true;
    };
    overlaps_any(start, end, busy)
}

fn minutes_of(t: NaiveTime) -> i64 {
    t.hour() as i64 * 60 + t.minute() as i64
}

fn time_of(minutes: i64) -> Option<NaiveTime> {
    if !(0..24 * 60).contains(&minutes) {
        return None;
    }
    NaiveTime::from_hms_opt((minutes / 60) as u32, (minutes % 60) as u32, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        parse_time(s).unwrap()
    }

    fn day(intervals: &[(&str, &str)]) -> WorkingDay {
        WorkingDay {
            open: true,
            slots: intervals
                .iter()
                .map(|(s, e)| WorkingInterval {
                    start: s.to_string(),
                    end: e.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn candidates_walk_interval_by_slot_duration() {
        let candidates = generate_candidates(&day(&[("09:00", "12:00")]), 60, 0);
        assert_eq!(candidates, vec![t("09:00"), t("10:00"), t("11:00")]);
    }

    #[test]
    fn buffer_shrinks_the_tail() {
        // 60 min slot + 30 min buffer: the 11:00 start would end at 12:30
        let candidates = generate_candidates(&day(&[("09:00", "12:00")]), 60, 30);
        assert_eq!(candidates, vec![t("09:00"), t("10:00")]);
    }

    #[test]
    fn closed_day_yields_nothing() {
        let working = WorkingDay {
            open: false,
            slots: vec![WorkingInterval {
                start: "09:00".into(),
                end: "17:00".into(),
            }],
        };
        assert!(generate_candidates(&working, 60, 0).is_empty());
    }

    #[test]
    fn multiple_intervals_are_concatenated() {
        let candidates = generate_candidates(&day(&[("09:00", "11:00"), ("13:00", "15:00")]), 60, 0);
        assert_eq!(
            candidates,
            vec![t("09:00"), t("10:00"), t("13:00"), t("14:00")]
        );
    }

    #[test]
    fn busy_ranges_remove_overlapping_slots() {
        let candidates = generate_candidates(&day(&[("09:00", "13:00")]), 60, 0);
        let busy = vec![(t("10:00"), t("11:00"))];
        assert_eq!(filter_available(&candidates, 60, &busy), vec!["09:00", "11:00", "12:00"]);
    }

    #[test]
    fn touching_boundary_is_not_an_overlap() {
        // slot 09:00-10:00 against busy 10:00-11:00
        assert!(!overlaps_any(t("09:00"), t("10:00"), &[(t("10:00"), t("11:00"))]));
        // one minute of overlap is a conflict
        assert!(overlaps_any(t("09:00"), t("10:01"), &[(t("10:00"), t("11:00"))]));
    }

    #[test]
    fn conflict_check_uses_duration() {
        let busy = vec![(t("14:00"), t("15:00"))];
        // 14:30 start with 60-min service overlaps the existing 14:00 block
        assert!(conflicts(t("14:30"), 60, &busy));
        // 15:00 start touches but does not overlap
        assert!(!conflicts(t("15:00"), 60, &busy));
    }

    #[test]
    fn flexible_date_parsing() {
        let expected = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();
        assert_eq!(parse_flexible_date("2026-06-15"), Some(expected));
        assert_eq!(parse_flexible_date("15.06.2026"), Some(expected));
        assert_eq!(parse_flexible_date("15/06/2026"), Some(expected));
        assert_eq!(parse_flexible_date("15 Haziran 2026"), Some(expected));
        assert_eq!(parse_flexible_date("yarın"), None);
    }

    #[test]
    fn duration_prefers_service_then_default() {
        let durations = serde_json::json!({"Düğün": 120, "default": 45})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(slot_duration_minutes(&durations, Some("Düğün")), 120);
        assert_eq!(slot_duration_minutes(&durations, Some("Nişan")), 45);
        assert_eq!(slot_duration_minutes(&serde_json::Map::new(), None), 60);
    }
}
