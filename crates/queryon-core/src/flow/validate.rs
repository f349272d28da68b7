// Typed validation and normalisation for collected field values

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::flow::field_is_visible;
use crate::types::{FieldDef, FieldValidation};

fn phone_strip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s\-\(\)\.]+").unwrap())
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap())
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([01]?[0-9]|2[0-3]):[0-5][0-9]$").unwrap())
}

const TR_MONTHS: &[(&str, u32)] = &[
    ("ocak", 1),
    ("şubat", 2),
    ("mart", 3),
    ("nisan", 4),
    ("mayıs", 5),
    ("haziran", 6),
    ("temmuz", 7),
    ("ağustos", 8),
    ("eylül", 9),
    ("ekim", 10),
    ("kasım", 11),
    ("aralık", 12),
];

/// Turkish word-numerals accepted for `number` fields
const TR_NUMBERS: &[(&str, &str)] = &[
    ("sıfır", "0"),
    ("yok", "0"),
    ("hayır", "0"),
    ("hiç", "0"),
    ("bir", "1"),
    ("tek", "1"),
    ("yalnız", "1"),
    ("yalnızca", "1"),
    ("sadece ben", "1"),
    ("sadece siz", "1"),
    ("sadece biz", "1"),
    ("iki", "2"),
    ("çift", "2"),
    ("üç", "3"),
    ("dört", "4"),
    ("beş", "5"),
    ("altı", "6"),
    ("yedi", "7"),
    ("sekiz", "8"),
    ("dokuz", "9"),
    ("on", "10"),
];

pub fn tr_month_number(name: &str) -> Option<u32> {
    TR_MONTHS
        .iter()
        .find(|(m, _)| *m == name)
        .map(|(_, n)| *n)
}

/// Check a value against its declared validation type.
///
/// Returns the canonicalised value on success, None on failure.
pub fn validate_field_value(value: &str, validation: FieldValidation) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }

    match validation {
        FieldValidation::Text => Some(v.to_string()),

        FieldValidation::Phone => {
            let digits = phone_strip_re().replace_all(v, "").into_owned();
            if !digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            if digits.starts_with('0') && (10..=11).contains(&digits.len()) {
                Some(digits)
            } else if digits.len() == 10 {
                Some(format!("0{digits}"))
            } else {
                None
            }
        }

        FieldValidation::Email => {
            if email_re().is_match(v) {
                Some(v.to_lowercase())
            } else {
                None
            }
        }

        FieldValidation::Date => {
            for fmt in ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"] {
                if chrono::NaiveDate::parse_from_str(v, fmt).is_ok() {
                    return Some(v.to_string());
                }
            }
            // "15 Mart 2026"
            let lower = v.to_lowercase();
            let parts: Vec<&str> = lower.split_whitespace().collect();
            if parts.len() == 3 {
                let day = parts[0].parse::<u32>().ok()?;
                let month = tr_month_number(parts[1])?;
                let year = parts[2].parse::<i32>().ok()?;
                if (1..=31).contains(&day) && month >= 1 && (2000..=2100).contains(&year) {
                    return Some(v.to_string());
                }
            }
            None
        }

        FieldValidation::Time => {
            if time_re().is_match(v) {
                Some(v.to_string())
            } else {
                None
            }
        }

        FieldValidation::Number => {
            let lower = v.to_lowercase();
            if let Some((_, n)) = TR_NUMBERS.iter().find(|(w, _)| *w == lower.as_str()) {
                return Some((*n).to_string());
            }
            let cleaned: String = v.chars().filter(|c| !c.is_whitespace() && *c != ',').collect();
            cleaned.parse::<f64>().ok().map(|_| cleaned)
        }
    }
}

/// Map extracted values to the closest allowed option
/// (exact -> case-insensitive -> substring). Values matching no option are
/// dropped.
pub fn normalize_to_options(
    mut parsed: Map<String, Value>,
    fields: &[FieldDef],
) -> Map<String, Value> {
    for field in fields {
        let Some(options) = field.options.as_ref().filter(|o| !o.is_empty()) else {
            continue;
        };
        let Some(value) = parsed.get(&field.key) else {
            continue;
        };
        let Some(val_str) = value.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            continue;
        };
        let allowed: Vec<&str> = options
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .collect();
        if allowed.is_empty() || allowed.contains(&val_str) {
            continue;
        }
        let low = val_str.to_lowercase();
        let matched = allowed
            .iter()
            .find(|a| a.to_lowercase() == low)
            .or_else(|| {
                allowed
                    .iter()
                    .find(|a| a.to_lowercase().contains(&low) || low.contains(&a.to_lowercase()))
            })
            .copied();
        match matched {
            Some(canonical) => {
                parsed.insert(field.key.clone(), Value::String(canonical.to_string()));
            }
            None => {
                tracing::info!(key = %field.key, value = %val_str, "dropped value not in options");
                parsed.remove(&field.key);
            }
        }
    }
    parsed
}

/// Run format validation on each extracted field, dropping invalid values
pub fn validate_extracted(mut parsed: Map<String, Value>, fields: &[FieldDef]) -> Map<String, Value> {
    let mut dropped = Vec::new();
    for field in fields {
        let Some(validation) = field.validation.filter(|v| *v != FieldValidation::Text) else {
            continue;
        };
        let Some(value) = parsed
            .get(&field.key)
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            continue;
        };
        match validate_field_value(&value, validation) {
            Some(normalised) => {
                parsed.insert(field.key.clone(), Value::String(normalised));
            }
            None => {
                tracing::info!(key = %field.key, value = %value, "dropped value failing validation");
                dropped.push(field.key.clone());
            }
        }
    }
    for key in dropped {
        parsed.remove(&key);
    }
    parsed
}

/// Remove extracted values for fields whose show_if condition is not
/// satisfied in the merged (already collected + newly extracted) state
pub fn filter_invisible_fields(
    parsed: Map<String, Value>,
    fields: &[FieldDef],
    already_collected: &Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = already_collected.clone();
    for (k, v) in &parsed {
        merged.insert(k.clone(), v.clone());
    }

    let mut out = Map::new();
    for (key, value) in parsed {
        match fields.iter().find(|f| f.key == key) {
            Some(field) if !field_is_visible(field, &merged) => {
                tracing::info!(key = %key, "dropped value for invisible field");
            }
            _ => {
                out.insert(key, value);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ShowIf, ShowIfValue};
    use serde_json::json;

    #[test]
    fn phone_normalises_separators() {
        assert_eq!(
            validate_field_value("0532 123 45 67", FieldValidation::Phone),
            Some("05321234567".into())
        );
        assert_eq!(
            validate_field_value("5321234567", FieldValidation::Phone),
            Some("05321234567".into())
        );
        assert_eq!(validate_field_value("çok yakında", FieldValidation::Phone), None);
    }

    #[test]
    fn email_lowercases() {
        assert_eq!(
            validate_field_value("Ada@Example.COM", FieldValidation::Email),
            Some("ada@example.com".into())
        );
        assert_eq!(validate_field_value("not-an-email", FieldValidation::Email), None);
    }

    #[test]
    fn time_requires_24h_hh_mm() {
        assert_eq!(validate_field_value("14:30", FieldValidation::Time), Some("14:30".into()));
        assert_eq!(validate_field_value("9:05", FieldValidation::Time), Some("9:05".into()));
        assert_eq!(validate_field_value("25:00", FieldValidation::Time), None);
        assert_eq!(validate_field_value("akşam 6", FieldValidation::Time), None);
    }

    #[test]
    fn date_accepts_iso_and_turkish_forms() {
        assert_eq!(
            validate_field_value("2026-06-15", FieldValidation::Date),
            Some("2026-06-15".into())
        );
        assert_eq!(
            validate_field_value("15 Mart 2026", FieldValidation::Date),
            Some("15 Mart 2026".into())
        );
        assert_eq!(validate_field_value("gelecek hafta", FieldValidation::Date), None);
    }

    #[test]
    fn number_maps_turkish_word_numerals() {
        assert_eq!(validate_field_value("bir", FieldValidation::Number), Some("1".into()));
        assert_eq!(validate_field_value("iki", FieldValidation::Number), Some("2".into()));
        assert_eq!(validate_field_value("üç", FieldValidation::Number), Some("3".into()));
        assert_eq!(validate_field_value("3", FieldValidation::Number), Some("3".into()));
        assert_eq!(validate_field_value("bilmiyorum", FieldValidation::Number), None);
    }

    #[test]
    fn options_normalise_case_and_substring() {
        let fields = vec![FieldDef {
            key: "location".into(),
            options: Some(vec!["Stüdyo".into(), "Otel / Ev".into()]),
            ..Default::default()
        }];
        let parsed = json!({"location": "stüdyo"}).as_object().cloned().unwrap();
        let out = normalize_to_options(parsed, &fields);
        assert_eq!(out.get("location").unwrap(), "Stüdyo");

        let parsed = json!({"location": "otel"}).as_object().cloned().unwrap();
        let out = normalize_to_options(parsed, &fields);
        assert_eq!(out.get("location").unwrap(), "Otel / Ev");

        let parsed = json!({"location": "plaj"}).as_object().cloned().unwrap();
        let out = normalize_to_options(parsed, &fields);
        assert!(out.get("location").is_none());
    }

    #[test]
    fn invisible_fields_are_filtered_against_merged_state() {
        let fields = vec![
            FieldDef {
                key: "location".into(),
                ..Default::default()
            },
            FieldDef {
                key: "city".into(),
                show_if: Some(ShowIf {
                    field: "location".into(),
                    value: ShowIfValue::One("Şehir Dışı".into()),
                }),
                ..Default::default()
            },
        ];

        // location already collected as Stüdyo -> city is invisible
        let collected = json!({"location": "Stüdyo"}).as_object().cloned().unwrap();
        let parsed = json!({"city": "Ankara"}).as_object().cloned().unwrap();
        let out = filter_invisible_fields(parsed, &fields, &collected);
        assert!(out.get("city").is_none());

        // location arrives in the same extraction -> city becomes visible
        let parsed = json!({"location": "Şehir Dışı", "city": "Ankara"})
            .as_object()
            .cloned()
            .unwrap();
        let out = filter_invisible_fields(parsed, &fields, &Map::new());
        assert_eq!(out.get("city").unwrap(), "Ankara");
    }
}
