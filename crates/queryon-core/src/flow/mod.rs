// Mode engine: pure functions for progressive field collection
//
// These functions are side-effect-free so they can be unit-tested without any
// I/O. The orchestrator calls `compute_mode_context` before each character
// turn to obtain a context string appended to the system prompt, guiding the
// LLM to ask exactly one question at a time.

pub mod pricing;
pub mod validate;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::types::{FieldDef, FieldValidation, OrchestratorConfig};

/// Recorded for an optional field the user declined
pub const SKIP_SENTINEL: &str = "__skip__";

/// Keys that are internal state metadata, never shown as collected data
pub const META_KEYS: &[&str] = &[
    "confirmed",
    "saved",
    "appointment_id",
    "appt_number",
    "active_mode",
    "order_id",
];

/// A field-collection mode driven by the flow engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Appointment,
    Order,
    Reschedule,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Appointment => "appointment",
            Mode::Order => "order",
            Mode::Reschedule => "reschedule",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields collected during a reschedule flow
pub fn reschedule_fields() -> Vec<FieldDef> {
    vec![
        FieldDef {
            key: "event_date".into(),
            label: Some("Yeni Tarih".into()),
            validation: Some(FieldValidation::Date),
            ..Default::default()
        },
        FieldDef {
            key: "event_time".into(),
            label: Some("Yeni Saat".into()),
            validation: Some(FieldValidation::Time),
            ..Default::default()
        },
        FieldDef {
            key: "artist".into(),
            label: Some("Sanatçı".into()),
            ..Default::default()
        },
    ]
}

/// Non-empty string value of a collected key
pub fn collected_str<'a>(collected: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    collected
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn collected_bool(collected: &Map<String, Value>, key: &str) -> bool {
    collected.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn is_filled(collected: &Map<String, Value>, key: &str) -> bool {
    collected_str(collected, key).is_some_and(|v| v != SKIP_SENTINEL)
}

fn is_handled(collected: &Map<String, Value>, key: &str) -> bool {
    collected_str(collected, key).is_some()
}

/// True when this field should be asked/considered given collected data.
///
/// A field without `show_if` is always visible. A field with `show_if` is
/// only visible when the dependency field's collected value matches one of
/// the trigger values (case-insensitive). An uncollected dependency keeps
/// the conditional field invisible.
pub fn field_is_visible(field: &FieldDef, collected: &Map<String, Value>) -> bool {
    let Some(show_if) = &field.show_if else {
        return true;
    };
    if show_if.field.is_empty() {
        return true;
    }
    let Some(dep_val) = collected_str(collected, &show_if.field).filter(|v| *v != SKIP_SENTINEL)
    else {
        return false;
    };
    let dep_lower = dep_val.trim().to_lowercase();
    show_if
        .value
        .as_slice()
        .iter()
        .any(|v| v.to_lowercase() == dep_lower)
}

/// True when every visible required field has a non-empty, non-skip value
pub fn is_complete(fields: &[FieldDef], collected: &Map<String, Value>) -> bool {
    fields
        .iter()
        .filter(|f| f.required && field_is_visible(f, collected))
        .all(|f| is_filled(collected, &f.key))
}

/// True when every visible field (required + optional) is filled or skipped
pub fn all_fields_handled(fields: &[FieldDef], collected: &Map<String, Value>) -> bool {
    fields
        .iter()
        .filter(|f| field_is_visible(f, collected))
        .all(|f| is_handled(collected, &f.key))
}

/// First visible required field not yet collected. Skip does not count as
/// filled for required fields.
pub fn get_next_field<'a>(
    fields: &'a [FieldDef],
    collected: &Map<String, Value>,
) -> Option<&'a FieldDef> {
    fields
        .iter()
        .find(|f| f.required && field_is_visible(f, collected) && !is_filled(collected, &f.key))
}

/// First visible optional field not yet filled or skipped
pub fn get_next_optional_field<'a>(
    fields: &'a [FieldDef],
    collected: &Map<String, Value>,
) -> Option<&'a FieldDef> {
    fields
        .iter()
        .find(|f| !f.required && field_is_visible(f, collected) && !is_handled(collected, &f.key))
}

// ── Question formatting ───────────────────────────────────────────

fn validation_hint(validation: FieldValidation) -> &'static str {
    match validation {
        FieldValidation::Phone => "(Format: 05XX XXX XX XX — sadece rakam)",
        FieldValidation::Email => "(Geçerli bir e-posta adresi)",
        FieldValidation::Date => "(Format: GG Ay YYYY, örn: 15 Mart 2026)",
        FieldValidation::Time => "(Format: SS:DD, örn: 14:30 veya 09:00)",
        FieldValidation::Number => "(Sadece sayısal değer)",
        FieldValidation::Text => "",
    }
}

/// Question string for a field, including options and validation hints
fn format_question(field: &FieldDef, optional: bool) -> String {
    let mut question = field
        .question
        .clone()
        .unwrap_or_else(|| format!("{} nedir?", field.label_or_key()));

    let allowed: Vec<&str> = field
        .options
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .collect();
    if !allowed.is_empty() {
        question = format!("{question} (Seçenekler: {})", allowed.join(", "));
    } else if let Some(v) = field.validation.filter(|v| *v != FieldValidation::Text) {
        let hint = validation_hint(v);
        if !hint.is_empty() {
            question = format!("{question} {hint}");
        }
    }

    if optional {
        question = format!("{question} (Opsiyonel — istemiyorsanız 'geç' diyebilirsiniz)");
    }
    question
}

fn remaining_required<'a>(
    fields: &'a [FieldDef],
    collected: &Map<String, Value>,
) -> Vec<&'a FieldDef> {
    fields
        .iter()
        .filter(|f| f.required && field_is_visible(f, collected) && !is_filled(collected, &f.key))
        .collect()
}

fn dep_label<'a>(fields: &'a [FieldDef], dep_key: &'a str) -> &'a str {
    fields
        .iter()
        .find(|f| f.key == dep_key)
        .map(|f| f.label_or_key())
        .unwrap_or(dep_key)
}

// ── Mode context builder ──────────────────────────────────────────

/// Turkish system-prompt suffix for the current collection state.
///
/// Flow order:
///   1. Ask required fields one by one (array order, visibility-filtered)
///   2. Ask optional fields one by one (skippable with 'geç/yok/istemiyorum')
///   3. Show summary + ask confirmation
pub fn build_mode_context(
    mode: Mode,
    fields: &[FieldDef],
    collected: &Map<String, Value>,
    confirmed: bool,
    saved: bool,
) -> String {
    let mut lines = vec!["--- [MODE CONTEXT] ---".to_string()];

    if saved {
        lines.push(
            "Kaydedildi. Kullanıcıya teşekkür et ve başka yardım isteyip istemediğini sor."
                .to_string(),
        );
    } else if confirmed {
        lines.push("Bilgiler onaylandı ve şu an kaydediliyor.".to_string());
    } else if all_fields_handled(fields, collected) {
        let mut summary_parts = Vec::new();
        for f in fields {
            if !field_is_visible(f, collected) {
                continue;
            }
            if let Some(val) = collected_str(collected, &f.key).filter(|v| *v != SKIP_SENTINEL) {
                summary_parts.push(format!("  • {}: {}", f.label_or_key(), val));
            }
        }
        if mode == Mode::Appointment {
            if let Some(price_block) = pricing::build_computed_price_block(collected) {
                summary_parts.push(price_block);
            }
        }
        lines.push(format!(
            "Tüm bilgiler toplandı. Kullanıcıya şu özeti göster ve \"Bu bilgiler doğru mu? Onaylıyor musunuz?\" diye sor:\n{}",
            summary_parts.join("\n")
        ));
    } else {
        let filled: Vec<String> = fields
            .iter()
            .filter_map(|f| {
                collected_str(collected, &f.key)
                    .filter(|v| *v != SKIP_SENTINEL)
                    .map(|v| format!("  ✓ {}: {}", f.label_or_key(), v))
            })
            .collect();
        if !filled.is_empty() {
            lines.push(format!(
                "Şu ana kadar ALINAN BİLGİLER (bunları TEKRAR SORMA):\n{}",
                filled.join("\n")
            ));
        }

        if mode == Mode::Appointment {
            if let Some(price_block) = pricing::build_computed_price_block(collected) {
                lines.push(price_block);
            }
        }

        let remaining = remaining_required(fields, collected);
        if !remaining.is_empty() {
            let items: Vec<String> = remaining
                .iter()
                .map(|f| {
                    if let Some(show_if) = &f.show_if {
                        format!(
                            "{} (eğer {} = {})",
                            f.label_or_key(),
                            dep_label(fields, &show_if.field),
                            show_if.value.as_slice().join(" veya ")
                        )
                    } else {
                        f.label_or_key().to_string()
                    }
                })
                .collect();
            lines.push(format!(
                "Henüz alınmayan zorunlu bilgiler: {}\nÖNEMLİ: Eğer kullanıcı tek mesajda birden fazla bilgi verdiyse, hepsini aynı anda kabul et ve sadece en başta gelen EKSİK alanı sor.",
                items.join(", ")
            ));
        }

        if let Some(next_req) = get_next_field(fields, collected) {
            let question = format_question(next_req, false);

            // Lookahead: the question after this one, for the
            // "already answered" hint
            let mut peeked = collected.clone();
            peeked.insert(next_req.key.clone(), Value::String("<FILLED>".into()));
            let after = get_next_field(fields, &peeked)
                .or_else(|| get_next_optional_field(fields, &peeked));
            let after_q = after.map(|f| format_question(f, !f.required));

            let mut hint = format!(
                "KURAL: Eğer kullanıcı bu mesajda \"{}\" bilgisini zaten verdiyse, cevabı kabul et",
                next_req.label_or_key()
            );
            if let Some(q) = &after_q {
                hint.push_str(&format!(" ve şu soruyu sor: \"{q}\""));
            }
            hint.push_str(".\n");

            if let Some(v) = next_req.validation.filter(|v| *v != FieldValidation::Text) {
                let fmt_hint = validation_hint(v);
                if !fmt_hint.is_empty() {
                    hint.push_str(&format!(
                        "DOĞRULAMA: Bu alan için {fmt_hint} beklenmektedir. Kullanıcı geçersiz bir format verirse, nazikçe doğru formatı iste.\n"
                    ));
                }
            } else if let Some(opts) = next_req.options.as_ref().filter(|o| !o.is_empty()) {
                let allowed: Vec<&str> =
                    opts.iter().map(|o| o.trim()).filter(|o| !o.is_empty()).collect();
                hint.push_str(&format!(
                    "DOĞRULAMA: Sadece şu seçeneklerden biri kabul edilir: {}. Kullanıcı listede olmayan bir değer verirse, tekrar sor.\n",
                    allowed.join(", ")
                ));
            }

            lines.push(format!(
                "SONRAKİ SORU:\n\"{question}\"\n{hint}Eğer kullanıcı henüz cevap vermediyse, SADECE bu soruyu sor. Başka bilgi verme, liste gösterme."
            ));
        } else if let Some(next_opt) = get_next_optional_field(fields, collected) {
            let question = format_question(next_opt, true);
            let mut peeked = collected.clone();
            peeked.insert(next_opt.key.clone(), Value::String("<FILLED>".into()));
            let after_q =
                get_next_optional_field(fields, &peeked).map(|f| format_question(f, true));

            let mut hint = String::new();
            if let Some(q) = after_q {
                hint.push_str(&format!(
                    "Eğer kullanıcı bu soruyu zaten cevapladıysa, sonraki soru: \"{q}\"\n"
                ));
            }
            if let Some(v) = next_opt.validation.filter(|v| *v != FieldValidation::Text) {
                let fmt_hint = validation_hint(v);
                if !fmt_hint.is_empty() {
                    hint.push_str(&format!(
                        "DOĞRULAMA: Bu alan için {fmt_hint} beklenmektedir. Geçersiz format verilirse nazikçe tekrar iste veya 'geç' demelerine izin ver.\n"
                    ));
                }
            }

            lines.push(format!(
                "SONRAKİ SORU:\n\"{question}\"\n{hint}Kullanıcı 'yok', 'geç', 'istemiyorum', 'pas', 'hayır', 'atla' gibi bir ifade kullanırsa bu soruyu KESİNLİKLE TEKRAR SORMA; bu alanı geç ve bir sonraki adıma geç (özet + onay)."
            ));
        } else {
            lines.push("Kullanıcıdan bilgi almaya devam et.".to_string());
        }
    }

    lines.push("--- [/MODE CONTEXT] ---".to_string());
    lines.join("\n")
}

/// Turkish mode-context string for an active reschedule flow
fn build_reschedule_context(rs: &Map<String, Value>) -> String {
    let mut lines = vec!["--- [MODE CONTEXT: reschedule] ---".to_string()];
    let appt_number = collected_str(rs, "appt_number").unwrap_or("");
    let updates = rs
        .get("updates")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    lines.push(format!(
        "RANDEVU DEĞİŞİKLİĞİ AKTİF — Randevu No: {appt_number}"
    ));
    lines.push(
        "Kullanıcı bu randevu için yeni tarih/saat (ve isteğe bağlı sanatçı) istiyor.".to_string(),
    );

    if !updates.is_empty() {
        lines.push("\nŞimdiye kadar toplanan bilgiler:".to_string());
        for (k, v) in &updates {
            let label = match k.as_str() {
                "event_date" => "Yeni Tarih",
                "event_time" => "Yeni Saat",
                "artist" => "Sanatçı",
                other => other,
            };
            let val = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
            lines.push(format!("  • {label}: {val}"));
        }
    }

    let has_date = collected_str(&updates, "event_date").is_some();
    let has_time = collected_str(&updates, "event_time").is_some();

    if collected_bool(rs, "confirmed") && !collected_bool(rs, "saved") {
        lines.push("\nKullanıcı onayladı — değişiklik kaydediliyor.".to_string());
    } else if has_date && has_time {
        lines.push(format!(
            "\nTüm bilgiler toplandı: {} saat {}.",
            collected_str(&updates, "event_date").unwrap_or(""),
            collected_str(&updates, "event_time").unwrap_or("")
        ));
        lines.push("SONRAKİ SORU:\n\"Bu değişikliği onaylıyor musunuz? (Evet/Hayır)\"".to_string());
    } else if !has_date {
        lines.push("\nSONRAKİ SORU:\n\"Yeni tarih için hangi günü tercih edersiniz?\"".to_string());
    } else {
        lines.push(
            "\nSONRAKİ SORU:\n\"Uygun olduğunuz saati aşağıdan seçin (seçenekler bot tarafından sunulacak).\""
                .to_string(),
        );
    }

    lines.push("--- [/MODE CONTEXT: reschedule] ---".to_string());
    lines.join("\n")
}

/// Per-mode sub-state of the persisted flow_state object
pub fn mode_state<'a>(flow_state: &'a Map<String, Value>, mode: Mode) -> Map<String, Value> {
    flow_state
        .get(mode.as_str())
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Determine the active mode and produce its context string.
///
/// Returns `(None, None)` when no mode is active, or `(None, reminder)` when
/// a saved appointment's reference number should still be surfaced.
pub fn compute_mode_context(
    config: &OrchestratorConfig,
    flow_state: &Map<String, Value>,
) -> (Option<Mode>, Option<String>) {
    let appt_state = mode_state(flow_state, Mode::Appointment);
    let order_state = mode_state(flow_state, Mode::Order);
    let reschedule_state = mode_state(flow_state, Mode::Reschedule);

    let stored_mode = collected_str(flow_state, "active_mode");

    // Reschedule takes priority over appointment/order modes
    let reschedule_active = collected_str(&reschedule_state, "appt_number").is_some()
        && !collected_bool(&reschedule_state, "saved");
    if reschedule_active {
        let context = build_reschedule_context(&reschedule_state);
        return (Some(Mode::Reschedule), Some(context));
    }

    let appt_saved = collected_bool(&appt_state, "saved");
    let order_saved = collected_bool(&order_state, "saved");

    // When the appointment is saved, inject the reference number into every
    // turn so the character LLM can quote it and cancel/reschedule requests
    // resolve without re-asking.
    if appt_saved {
        if let Some(rnd) = collected_str(&appt_state, "appt_number") {
            let context = format!(
                "[RANDEVU KAYITLI]\nBu müşterinin randevusu oluşturuldu. Randevu numarası: {rnd}\nMüşteri iptal veya değişiklik isterse bu numarayı kullan ve '{rnd} iptal' ya da '{rnd} tarihimi değiştir' gibi komutları hatırlat.\n[/RANDEVU KAYITLI]"
            );
            return (None, Some(context));
        }
    }

    let appt_active = !config.appointment_fields.is_empty()
        && !appt_saved
        && (stored_mode == Some("appointment") || (stored_mode.is_none() && !appt_state.is_empty()));
    if appt_active {
        let context = build_mode_context(
            Mode::Appointment,
            &config.appointment_fields,
            &appt_state,
            collected_bool(&appt_state, "confirmed"),
            false,
        );
        return (Some(Mode::Appointment), Some(context));
    }

    let order_active = config.order_mode_enabled
        && !config.order_fields.is_empty()
        && !order_saved
        && (stored_mode == Some("order") || (stored_mode.is_none() && !order_state.is_empty()));
    if order_active {
        let context = build_mode_context(
            Mode::Order,
            &config.order_fields,
            &order_state,
            collected_bool(&order_state, "confirmed"),
            false,
        );
        return (Some(Mode::Order), Some(context));
    }

    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ShowIf, ShowIfValue};
    use serde_json::json;

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef {
                key: "name".into(),
                label: Some("Ad".into()),
                required: true,
                ..Default::default()
            },
            FieldDef {
                key: "location".into(),
                label: Some("Lokasyon".into()),
                required: true,
                options: Some(vec!["Stüdyo".into(), "Şehir Dışı".into()]),
                ..Default::default()
            },
            FieldDef {
                key: "city".into(),
                label: Some("Şehir".into()),
                required: true,
                show_if: Some(ShowIf {
                    field: "location".into(),
                    value: ShowIfValue::One("Şehir Dışı".into()),
                }),
                ..Default::default()
            },
            FieldDef {
                key: "notes".into(),
                label: Some("Not".into()),
                required: false,
                ..Default::default()
            },
        ]
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn invisible_field_is_not_required() {
        let collected = obj(json!({"name": "Ada", "location": "Stüdyo"}));
        assert!(is_complete(&fields(), &collected));
        assert!(get_next_field(&fields(), &collected).is_none());
    }

    #[test]
    fn conditional_field_becomes_required_when_triggered() {
        let collected = obj(json!({"name": "Ada", "location": "Şehir Dışı"}));
        assert!(!is_complete(&fields(), &collected));
        assert_eq!(get_next_field(&fields(), &collected).unwrap().key, "city");
    }

    #[test]
    fn skip_sentinel_does_not_satisfy_required() {
        let collected = obj(json!({"name": "__skip__", "location": "Stüdyo"}));
        assert!(!is_complete(&fields(), &collected));
        assert_eq!(get_next_field(&fields(), &collected).unwrap().key, "name");
    }

    #[test]
    fn skip_sentinel_counts_as_handled_for_optional() {
        let collected = obj(json!({
            "name": "Ada", "location": "Stüdyo", "notes": "__skip__",
        }));
        assert!(all_fields_handled(&fields(), &collected));
        assert!(get_next_optional_field(&fields(), &collected).is_none());
    }

    #[test]
    fn next_field_walks_in_declaration_order() {
        let collected = Map::new();
        assert_eq!(get_next_field(&fields(), &collected).unwrap().key, "name");
        let collected = obj(json!({"name": "Ada"}));
        assert_eq!(get_next_field(&fields(), &collected).unwrap().key, "location");
    }

    #[test]
    fn context_asks_next_required_question() {
        let collected = obj(json!({"name": "Ada"}));
        let ctx = build_mode_context(Mode::Appointment, &fields(), &collected, false, false);
        assert!(ctx.contains("SONRAKİ SORU"));
        assert!(ctx.contains("Lokasyon"));
        assert!(ctx.contains("Seçenekler: Stüdyo, Şehir Dışı"));
        assert!(ctx.contains("✓ Ad: Ada"));
    }

    #[test]
    fn context_shows_summary_when_all_handled() {
        let collected = obj(json!({
            "name": "Ada", "location": "Stüdyo", "notes": "__skip__",
        }));
        let ctx = build_mode_context(Mode::Appointment, &fields(), &collected, false, false);
        assert!(ctx.contains("Onaylıyor musunuz"));
        // skipped optional fields are not in the summary
        assert!(!ctx.contains("Not:"));
    }

    #[test]
    fn context_reports_saved_state() {
        let ctx = build_mode_context(Mode::Order, &fields(), &Map::new(), true, true);
        assert!(ctx.contains("Kaydedildi"));
    }

    #[test]
    fn compute_mode_context_inactive_without_state() {
        let config = OrchestratorConfig {
            appointment_fields: fields(),
            ..Default::default()
        };
        let (mode, ctx) = compute_mode_context(&config, &Map::new());
        assert_eq!(mode, None);
        assert_eq!(ctx, None);
    }

    #[test]
    fn compute_mode_context_follows_stored_mode() {
        let config = OrchestratorConfig {
            appointment_fields: fields(),
            ..Default::default()
        };
        let flow_state = obj(json!({
            "active_mode": "appointment",
            "appointment": {"name": "Ada"},
        }));
        let (mode, ctx) = compute_mode_context(&config, &flow_state);
        assert_eq!(mode, Some(Mode::Appointment));
        assert!(ctx.unwrap().contains("MODE CONTEXT"));
    }

    #[test]
    fn saved_appointment_surfaces_reference_number() {
        let config = OrchestratorConfig {
            appointment_fields: fields(),
            ..Default::default()
        };
        let flow_state = obj(json!({
            "appointment": {"saved": true, "appt_number": "RND-2026-0042"},
        }));
        let (mode, ctx) = compute_mode_context(&config, &flow_state);
        assert_eq!(mode, None);
        assert!(ctx.unwrap().contains("RND-2026-0042"));
    }

    #[test]
    fn reschedule_takes_priority() {
        let config = OrchestratorConfig {
            appointment_fields: fields(),
            ..Default::default()
        };
        let flow_state = obj(json!({
            "active_mode": "appointment",
            "appointment": {"name": "Ada"},
            "reschedule": {"appt_number": "RND-2026-0042", "updates": {}},
        }));
        let (mode, ctx) = compute_mode_context(&config, &flow_state);
        assert_eq!(mode, Some(Mode::Reschedule));
        assert!(ctx.unwrap().contains("RND-2026-0042"));
    }

    #[test]
    fn order_mode_requires_enable_flag() {
        let config = OrchestratorConfig {
            order_fields: fields(),
            order_mode_enabled: false,
            ..Default::default()
        };
        let flow_state = obj(json!({
            "active_mode": "order",
            "order": {"name": "Ada"},
        }));
        let (mode, _) = compute_mode_context(&config, &flow_state);
        assert_eq!(mode, None);
    }
}
