// CharacterHandler: LLM-driven conversational handler with a bot persona
//
// Active flow modes (appointment / order / reschedule) make ONE LLM call with
// a comprehensive system-prompt section: fields to collect, what is already
// collected, what is missing, live availability slots, pre-computed prices,
// behavioural rules, and the mandatory structured output format
// <extract>{...}</extract><response>...</response>. The LLM extracts data and
// generates its reply in one pass.
//
// Non-flow turns run the persona LLM normally; a second focused extraction
// call runs opportunistically when passive signals suggest the user mentioned
// appointment/order info.

use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, FixedOffset, Timelike, Utc};
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::flow::validate::{filter_invisible_fields, normalize_to_options, validate_extracted, validate_field_value};
use crate::flow::{
    collected_str, field_is_visible, get_next_field, get_next_optional_field, pricing,
    reschedule_fields, Mode, META_KEYS, SKIP_SENTINEL,
};
use crate::handlers::{Handler, HandlerContext};
use crate::traits::{ChatMessage, LlmClient};
use crate::types::{
    AppointmentAction, FieldDef, FieldValidation, IntentType, OrchestratorResult, ResultMetadata,
    Turn,
};

const DAYS_TR: [&str; 7] = [
    "Pazartesi",
    "Salı",
    "Çarşamba",
    "Perşembe",
    "Cuma",
    "Cumartesi",
    "Pazar",
];
const MONTHS_TR: [&str; 12] = [
    "Ocak", "Şubat", "Mart", "Nisan", "Mayıs", "Haziran", "Temmuz", "Ağustos", "Eylül", "Ekim",
    "Kasım", "Aralık",
];

/// Keywords that trigger appointment extraction (passive mode)
const APPT_KEYWORDS: &[&str] = &[
    "randevu", "rezervasyon", "booking", "appointment", "ad", "soyad", "isim", "telefon", "email",
    "e-posta", "tarih", "tarihte", "günde", "gün", "evet", "tamam", "onayla", "05", "düzelt",
    "değiştir", "yarın", "bugün", "hafta", "saat", "sabah", "öğle", "akşam", "gece", "geç", "yok",
    "istemiyorum", "pas", "geçelim", "düğün", "nişan", "kına", "söz", "davetli", "nedime",
    "makyaj", "gelin", "hazırlık", "profesyonel", "stüdyo", "otel", "şehir dışı", "ev", "izel",
    "merve", "dicle", "irem", "gizem", "neslihan", "ekip", "kişi", "kişilik", "pazartesi", "salı",
    "çarşamba", "perşembe", "cuma", "cumartesi", "pazar", "ocak", "şubat", "mart", "nisan",
    "mayıs", "haziran", "temmuz", "ağustos", "eylül", "ekim", "kasım", "aralık",
];

/// Keywords that trigger order extraction (passive mode)
const ORDER_KEYWORDS: &[&str] = &[
    "sipariş", "order", "ürün", "product", "adet", "miktar", "quantity", "ad", "soyad", "isim",
    "telefon", "email", "e-posta", "adres", "teslimat", "delivery", "evet", "tamam", "onayla",
    "düzelt", "değiştir",
];

const CANCEL_KEYWORDS: &[&str] = &[
    "iptal",
    "iptal et",
    "iptal etmek",
    "cancel",
    "randevumu iptal",
    "sil",
    "geri al",
    "randevu iptali",
];

const RESCHEDULE_KEYWORDS: &[&str] = &[
    "tarihimi değiştir",
    "saatimi değiştir",
    "randevuyu değiştir",
    "randevumu değiştir",
    "tarih değişikliği",
    "saat değişikliği",
    "randevu değişikliği",
    "randevuyu güncelle",
    "randevumu güncelle",
    "randevuyu güncellemek istiyorum",
    "güncellemek istiyorum",
    "randevuyu güncelleyelim",
    "güncelle",
    "güncelleme",
    "ertele",
    "reschedule",
];

/// Words that signal the user wants to skip the current optional field
const SKIP_WORDS: &[&str] = &[
    "geç",
    "yok",
    "istemiyorum",
    "pas",
    "geçelim",
    "hayır",
    "atla",
    "geçiyorum",
    "yok yok",
    "geçtim",
];

// Users sometimes drop the leading "R" and type "ND-2026-0001"; the near
// pattern catches that and we normalise it back to "RND-...".
fn appt_num_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(r"\bRND-\d{4}-\d{4}\b")
            .case_insensitive(true)
            .build()
            .unwrap()
    })
}

fn appt_num_near_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(r"\bND-\d{4}-\d{4}\b")
            .case_insensitive(true)
            .build()
            .unwrap()
    })
}

fn extract_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(r"(?s)<extract>(.*?)</extract>")
            .case_insensitive(true)
            .build()
            .unwrap()
    })
}

fn response_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(r"(?s)<response>(.*?)</response>")
            .case_insensitive(true)
            .build()
            .unwrap()
    })
}

fn thinking_strip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<thinking>.*?</thinking>").unwrap())
}

fn bare_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{[^{}]+\}").unwrap())
}

/// Sends conversation to the LLM with a character system prompt.
pub struct CharacterHandler {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    timeout: Option<Duration>,
    appointment_fields: Vec<FieldDef>,
    order_fields: Vec<FieldDef>,
}

impl CharacterHandler {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        system_prompt: impl Into<String>,
        timeout: Option<Duration>,
        appointment_fields: Vec<FieldDef>,
        order_fields: Vec<FieldDef>,
    ) -> Self {
        CharacterHandler {
            llm,
            system_prompt: system_prompt.into(),
            timeout,
            appointment_fields,
            order_fields,
        }
    }

    async fn chat_with_timeout(
        &self,
        messages: &[ChatMessage],
    ) -> crate::error::Result<String> {
        let call = self.llm.chat(messages);
        match self.timeout {
            Some(t) => tokio::time::timeout(t, call)
                .await
                .map_err(|_| crate::error::QueryonError::Timeout(t.as_secs_f64()))?,
            None => call.await,
        }
    }

    // ── Cancel / reschedule intent detection ─────────────────────────────

    /// Pure regex check for cancel + reference number, no LLM call
    fn extract_cancel_intent(query: &str) -> Option<AppointmentAction> {
        detect_action(query, CANCEL_KEYWORDS, "cancel")
    }

    /// Pure regex check for reschedule keyword + reference number
    fn extract_reschedule_intent(query: &str) -> Option<AppointmentAction> {
        detect_action(query, RESCHEDULE_KEYWORDS, "reschedule")
    }

    fn should_extract(query: &str, answer: &str, keywords: &[&str]) -> bool {
        let combined = format!("{} {}", query, answer).to_lowercase();
        keywords.iter().any(|kw| combined.contains(kw))
    }

    // ── Flow section builder ─────────────────────────────────────────────

    /// Comprehensive flow-context section injected into the system prompt
    fn build_flow_section(
        active_mode: Mode,
        fields: &[FieldDef],
        collected: &Map<String, Value>,
        availability_slots: &std::collections::HashMap<String, Vec<String>>,
    ) -> String {
        let mode_label = match active_mode {
            Mode::Appointment => "RANDEVU",
            Mode::Order => "SİPARİŞ",
            Mode::Reschedule => "RANDEVU DEĞİŞİKLİĞİ",
        };

        let mut lines: Vec<String> =
            vec![format!("═══ GÖREV: {mode_label} BİLGİ TOPLAMA ═══"), String::new()];

        if active_mode == Mode::Reschedule {
            if let Some(appt_number) = collected_str(collected, "appt_number") {
                lines.push(format!("Randevu No: {appt_number} için değişiklik yapılıyor."));
                lines.push(String::new());
            }
        }

        // Already collected
        let filled: Vec<(&String, &Value)> = collected
            .iter()
            .filter(|(k, v)| {
                !META_KEYS.contains(&k.as_str())
                    && v.as_str().is_some_and(|s| !s.is_empty() && s != SKIP_SENTINEL)
            })
            .collect();
        if filled.is_empty() {
            lines.push("TOPLANAN BİLGİLER: (Henüz hiçbir bilgi toplanmadı)".to_string());
        } else {
            lines.push("TOPLANAN BİLGİLER (bunları tekrar SORMA):".to_string());
            for (k, v) in &filled {
                let label = fields
                    .iter()
                    .find(|f| &f.key == *k)
                    .map(|f| f.label_or_key())
                    .unwrap_or(k.as_str());
                lines.push(format!("  ✓ {}: {}", label, v.as_str().unwrap_or_default()));
            }
        }
        lines.push(String::new());

        // Missing fields summary
        let mut missing_req = Vec::new();
        let mut missing_opt = Vec::new();
        for f in fields {
            if !field_is_visible(f, collected) {
                continue;
            }
            if collected_str(collected, &f.key).is_some_and(|v| v != SKIP_SENTINEL) {
                continue;
            }
            if collected_str(collected, &f.key) == Some(SKIP_SENTINEL) && !f.required {
                continue;
            }
            if f.required {
                missing_req.push(f.label_or_key().to_string());
            } else if collected_str(collected, &f.key).is_none() {
                missing_opt.push(f.label_or_key().to_string());
            }
        }
        lines.push(format!(
            "EKSİK ZORUNLU ALANLAR: {}",
            if missing_req.is_empty() {
                "Tümü tamamlandı".to_string()
            } else {
                missing_req.join(", ")
            }
        ));
        if !missing_opt.is_empty() {
            lines.push(format!("EKSİK OPSİYONEL ALANLAR: {}", missing_opt.join(", ")));
        }
        lines.push(String::new());

        // Live availability slots (injected by the orchestrator)
        for (slot_key, slots) in availability_slots {
            let slot_label = fields
                .iter()
                .find(|f| &f.key == slot_key)
                .map(|f| f.label_or_key())
                .unwrap_or(slot_key.as_str());
            lines.push(format!("UYGUN {} SEÇENEKLERİ:", slot_label.to_uppercase()));
            for s in slots {
                lines.push(format!("  • {s}"));
            }
            lines.push(
                "(Bu listedeki seçeneklerden biri istenmeli — listede olmayan saati kabul etme)"
                    .to_string(),
            );
            lines.push(String::new());
        }

        // Pre-computed prices (appointment mode only)
        if active_mode == Mode::Appointment {
            if let Some(price_block) = pricing::build_computed_price_block(collected) {
                lines.push(price_block);
                lines.push(String::new());
            }
        }

        // Field definitions
        lines.push("TOPLANACAK ALANLAR:".to_string());
        let mut visible_idx = 0;
        for f in fields {
            if !field_is_visible(f, collected) {
                if let Some(show_if) = &f.show_if {
                    let dep_label = fields
                        .iter()
                        .find(|ff| ff.key == show_if.field)
                        .map(|ff| ff.label_or_key())
                        .unwrap_or(show_if.field.as_str());
                    lines.push(format!(
                        "  (Koşullu) [{}] → Sadece {} = {} olduğunda sorulur",
                        f.key,
                        dep_label,
                        show_if.value.as_slice().join(" / ")
                    ));
                }
                continue;
            }

            visible_idx += 1;
            let req_label = if f.required { "zorunlu" } else { "opsiyonel" };
            let status = match collected_str(collected, &f.key) {
                Some(SKIP_SENTINEL) => "↷ (atlandı)",
                Some(_) => "✓",
                None => "→ (eksik)",
            };
            let mut field_line = format!(
                "  {visible_idx}. {} [{}] [{req_label}] {status}",
                f.label_or_key(),
                f.key
            );

            // Injected availability slots override static field options
            let opts: Vec<String> = availability_slots
                .get(&f.key)
                .cloned()
                .or_else(|| f.options.clone())
                .unwrap_or_default();
            let allowed: Vec<&str> = opts
                .iter()
                .map(|o| o.trim())
                .filter(|o| !o.is_empty())
                .collect();
            if !allowed.is_empty() {
                field_line.push_str(&format!("\n       Seçenekler: {}", allowed.join(", ")));
            }

            if let Some(v) = f.validation.filter(|v| *v != FieldValidation::Text) {
                let hint = match v {
                    FieldValidation::Phone => "Format: 05XX XXX XX XX (sadece rakam)",
                    FieldValidation::Email => "Format: ad@domain.com",
                    FieldValidation::Date => "Format: GG Ay YYYY — örn: 15 Mart 2026",
                    FieldValidation::Time => "Format: SS:DD, 24 saat — örn: 14:30",
                    FieldValidation::Number => "Sadece sayısal değer",
                    FieldValidation::Text => "",
                };
                if !hint.is_empty() {
                    field_line.push_str(&format!("\n       {hint}"));
                }
            }

            lines.push(field_line);
        }
        lines.push(String::new());

        lines.push("ÇALIŞMA KURALLARI:".to_string());
        lines.push("  1. Konuşma geçmişine bak — önceden verilen cevapları ASLA tekrar sorma".to_string());
        lines.push("  2. Kullanıcı tek mesajda birden fazla bilgi verdiyse HEPSİNİ <extract> bloğunda çıkar".to_string());
        lines.push("     ÖNEMLİ: Tüm tespit edilen alanları extract bloğuna ekle, hiçbirini atlama!".to_string());
        lines.push("  3. Geçersiz format veya listede olmayan seçenek → kabul etme, doğru formatı iste".to_string());
        lines.push("  4. Opsiyonel alan için 'geç/yok/istemiyorum/hayır/pas' → {\"key\": \"__skip__\"} döndür".to_string());
        lines.push("  5. Tüm zorunlu alanlar toplandığında özet göster ve 'Bu bilgiler doğru mu?' diye sor".to_string());
        lines.push("  6. Kullanıcı onaylarsa (evet/tamam/onayla/olur) → {\"confirmed\": true} döndür".to_string());
        lines.push("  7. Kullanıcı önceki bir bilgiyi düzeltirse → sadece o alanı güncelle, devam et".to_string());
        lines.push("  8. Tarihleri zaman bağlamına göre çevir: 'yarın', 'bu Cuma', 'önümüzdeki Salı' vb.".to_string());
        lines.push("  9. Saatleri 24 saat formatına çevir: 'akşam 6' → '18:00', 'sabah 10' → '10:00'".to_string());
        lines.push(" 10. Sayı ifadelerini rakama çevir: 'bir/tek' → '1', 'iki' → '2', 'üç' → '3' vb.".to_string());
        lines.push(" 11. HER yanıtında mutlaka <extract>...</extract> ve <response>...</response> yapısını kullan".to_string());
        lines.push(String::new());

        lines.push("ZORUNLU ÇIKTI FORMATI — Her yanıtta mutlaka bu yapıyı kullan:".to_string());
        lines.push("<extract>".to_string());
        lines.push("{\"alan_key\": \"değer\"}".to_string());
        lines.push("</extract>".to_string());
        lines.push("<response>".to_string());
        lines.push("Kullanıcıya gösterilecek Türkçe yanıt".to_string());
        lines.push("</response>".to_string());
        lines.push(String::new());
        lines.push("Çıkarılacak yeni bilgi yoksa: <extract>{}</extract>".to_string());
        lines.push("Kullanıcı onaylarsa: <extract>{\"confirmed\": true}</extract>".to_string());
        lines.push("═══ /GÖREV ═══".to_string());

        lines.join("\n")
    }

    /// Parse `<extract>` and `<response>` blocks from the flow LLM output.
    ///
    /// Falls back gracefully when tags are missing or JSON is malformed: the
    /// response becomes the raw text minus the extract block.
    fn parse_flow_response(raw: &str) -> (Map<String, Value>, String) {
        let mut extracted = Map::new();

        if let Some(caps) = extract_re().captures(raw) {
            let extract_text = caps[1].trim();
            if !extract_text.is_empty() && extract_text != "{}" {
                match serde_json::from_str::<Value>(extract_text) {
                    Ok(Value::Object(parsed)) => {
                        extracted = clean_extracted(parsed);
                    }
                    _ => {
                        if let Some(m) = bare_json_re().find(extract_text) {
                            if let Ok(Value::Object(parsed)) = serde_json::from_str::<Value>(m.as_str()) {
                                extracted = clean_extracted(parsed);
                            }
                        }
                        if extracted.is_empty() {
                            tracing::warn!(
                                "CharacterHandler: flow <extract> parse failed: {:?}",
                                extract_text.chars().take(120).collect::<String>()
                            );
                        }
                    }
                }
            }
        }

        let response = match response_re().captures(raw) {
            Some(caps) => caps[1].trim().to_string(),
            None => {
                let stripped = extract_re().replace_all(raw, "").trim().to_string();
                if stripped.is_empty() {
                    raw.trim().to_string()
                } else {
                    stripped
                }
            }
        };

        (extracted, response)
    }

    // ── Passive extraction (non-active-flow turns) ───────────────────────

    /// Secondary focused LLM call for passive data capture on turns where
    /// the user mentions appointment/order details in passing.
    async fn extract_data(
        &self,
        query: &str,
        history: Option<&[Turn]>,
        assistant_answer: &str,
        fields: &[FieldDef],
        mode_tag: &str,
        already_collected: &Map<String, Value>,
        current_field_key: Option<&str>,
    ) -> Option<Map<String, Value>> {
        // Fast path: lone skip word against an optional field
        if let Some(key) = current_field_key {
            let field = fields.iter().find(|f| f.key == key);
            if field.is_some_and(|f| !f.required)
                && SKIP_WORDS.contains(&query.trim().to_lowercase().as_str())
            {
                tracing::info!(field = %key, "CharacterHandler: fast-path skip (optional)");
                let mut out = Map::new();
                out.insert(key.to_string(), Value::String(SKIP_SENTINEL.into()));
                return Some(out);
            }

            // Fast path: single-token input that already passes typed validation
            if let Some(validation) = field
                .and_then(|f| f.validation)
                .filter(|v| *v != FieldValidation::Text)
            {
                if let Some(normalised) = validate_field_value(query.trim(), validation) {
                    tracing::info!(field = %key, value = %normalised, "CharacterHandler: fast-path extraction");
                    let mut out = Map::new();
                    out.insert(key.to_string(), Value::String(normalised));
                    let out = filter_invisible_fields(out, fields, already_collected);
                    return if out.is_empty() { None } else { Some(out) };
                }
            }
        }

        let prompt = self.build_extraction_prompt(
            query,
            history,
            assistant_answer,
            fields,
            mode_tag,
            already_collected,
            current_field_key,
        );

        let timeout = self
            .timeout
            .map(|t| t.min(Duration::from_secs(15)))
            .unwrap_or(Duration::from_secs(15));
        let raw = match tokio::time::timeout(timeout, self.llm.complete(&prompt)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::warn!("CharacterHandler: passive extraction failed ({mode_tag}): {e}");
                return None;
            }
            Err(_) => {
                tracing::warn!("CharacterHandler: passive extraction timed out ({mode_tag})");
                return None;
            }
        };

        let parsed = parse_extraction_json(&raw)?;
        let parsed = normalize_to_options(parsed, fields);
        let parsed = validate_extracted(parsed, fields);
        let parsed = filter_invisible_fields(parsed, fields, already_collected);
        if parsed.is_empty() {
            None
        } else {
            Some(parsed)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_extraction_prompt(
        &self,
        query: &str,
        history: Option<&[Turn]>,
        assistant_answer: &str,
        fields: &[FieldDef],
        mode_tag: &str,
        already_collected: &Map<String, Value>,
        current_field_key: Option<&str>,
    ) -> String {
        let field_names = fields.iter().map(|f| f.key.as_str()).collect::<Vec<_>>().join(", ");

        let options_lines: Vec<String> = fields
            .iter()
            .filter_map(|f| {
                let opts = f.options.as_ref()?;
                let values = opts
                    .iter()
                    .map(|o| o.trim())
                    .filter(|o| !o.is_empty())
                    .collect::<Vec<_>>()
                    .join(" | ");
                if values.is_empty() {
                    None
                } else {
                    Some(format!("  - {}: sadece şunlardan biri: {values}", f.key))
                }
            })
            .collect();
        let options_block = if options_lines.is_empty() {
            String::new()
        } else {
            format!(
                "Kısıtlı alanlar (sadece şu değerlerden birini kullan, yoksa null bırak):\n{}\n\n",
                options_lines.join("\n")
            )
        };

        let mut history_text = String::new();
        if let Some(history) = history {
            for turn in history.iter().rev().take(6).rev() {
                let content = turn.content.trim();
                if !content.is_empty() {
                    history_text.push_str(&format!("{}: {}\n", turn.role.as_str(), content));
                }
            }
        }
        history_text.push_str(&format!("user: {query}\n"));
        history_text.push_str(&format!("assistant: {assistant_answer}\n"));

        let filled: Vec<String> = already_collected
            .iter()
            .filter(|(k, v)| {
                !META_KEYS.contains(&k.as_str()) && v.as_str().is_some_and(|s| !s.is_empty())
            })
            .map(|(k, v)| format!("  {}: {}", k, v.as_str().unwrap_or_default()))
            .collect();
        let already_lines = if filled.is_empty() {
            String::new()
        } else {
            format!(
                "Zaten kaydedilmiş bilgiler (bunları tekrar döndürme, sadece değişirse güncelle):\n{}\n\n",
                filled.join("\n")
            )
        };

        let optional_keys: Vec<&str> = fields
            .iter()
            .filter(|f| !f.required)
            .map(|f| f.key.as_str())
            .collect();
        let optional_instruction = if optional_keys.is_empty() {
            String::new()
        } else {
            format!(
                "Opsiyonel alanlar: {}\n  • Kullanıcı 'yok', 'geç', 'istemiyorum' vb. ile reddetmişse \"__skip__\" döndür.\n\n",
                optional_keys.join(", ")
            )
        };

        let current_field_instruction = current_field_key
            .map(|key| {
                let label = fields
                    .iter()
                    .find(|f| f.key == key)
                    .map(|f| f.label_or_key())
                    .unwrap_or(key);
                format!(
                    "ŞU AN TOPLANMAKTA OLAN ALAN: {key} ({label})\nKullanıcının son mesajı bu alan için bir yanıt içeriyor. Öncelikle '{key}' alanını çıkar.\n\n"
                )
            })
            .unwrap_or_default();

        let validation_lines: Vec<String> = fields
            .iter()
            .filter_map(|f| {
                let hint = match f.validation? {
                    FieldValidation::Phone => "Türk telefon numarası — sadece rakam, 05XX ile başlamalı",
                    FieldValidation::Email => "Geçerli e-posta adresi — @ içermeli",
                    FieldValidation::Date => "Tarih — GG Ay YYYY formatında yaz (örn: 15 Mart 2026)",
                    FieldValidation::Time => "Saat — SS:DD formatında yaz (örn: 14:30)",
                    FieldValidation::Number => "Sayısal değer — sadece rakam",
                    FieldValidation::Text => return None,
                };
                Some(format!("  - {}: {hint}", f.key))
            })
            .collect();
        let validation_block = if validation_lines.is_empty() {
            String::new()
        } else {
            format!("Doğrulama kuralları:\n{}\n\n", validation_lines.join("\n"))
        };

        let thinking_guide = match current_field_key {
            Some(key) => {
                let cur_is_optional = fields.iter().any(|f| f.key == key && !f.required);
                let skip_bullet = if cur_is_optional {
                    format!("- '{key}' opsiyonelse ve kullanıcı 'geç/yok/istemiyorum' diyorsa __skip__ döndür.\n")
                } else {
                    String::new()
                };
                format!(
                    "Önce <thinking> içinde düşün:\n- ŞU AN SORULAN: '{key}'. Son user mesajında değer var mı?\n{skip_bullet}- Zaten kaydedilmiş alanları tekrar döndürme.\n<thinking>[reasoning]</thinking>\n\n"
                )
            }
            None => "Önce <thinking> içinde düşün:\n- Son user mesajında hangi alanlar geçiyor?\n- Zaten kaydedilmiş alanları tekrar döndürme.\n<thinking>[reasoning]</thinking>\n\n".to_string(),
        };

        format!(
            "{}\n\n{current_field_instruction}Konuşmada geçen {mode_tag} bilgilerini çıkar.\n{thinking_guide}Ardından SADECE JSON veya null yaz:\nÇıkarılacak alanlar: {field_names}\n{options_block}{validation_block}{optional_instruction}{already_lines}ÖNEMLİ — Tarih: 'yarın', 'bu Cuma' gibi göreceli ifadeleri zaman bilgisine göre çevir (GG Ay YYYY formatı).\nÖNEMLİ — Saat: 'akşam 6' → '18:00', 'sabah 10' → '10:00'.\nÖNEMLİ — Sayı: 'tek/bir' → '1', 'iki' → '2', 'üç' → '3'.\nOnay varsa 'confirmed: true' ekle.\n\nKURALLAR:\n  1. SADECE son 'user:' mesajındaki bilgiyi çıkar.\n  2. Yeni bilgi yoksa null döndür.\n  3. JSON'a null değer ekleme.\n\nKonuşma:\n{history_text}\nJSON veya null:",
            build_datetime_context()
        )
    }

    fn build_messages(
        &self,
        query: &str,
        history: Option<&[Turn]>,
        mode_context: Option<&str>,
        flow_section: Option<&str>,
    ) -> Vec<ChatMessage> {
        let dt_ctx = build_datetime_context();

        let system_content = if let Some(flow_section) = flow_section {
            format!("{dt_ctx}\n\n{}\n\n{flow_section}", self.system_prompt)
        } else if let Some(mode_context) = mode_context {
            format!(
                "{mode_context}\n\n─── KARAKTERİN ───\n{dt_ctx}\n\n{}",
                self.system_prompt
            )
        } else {
            format!("{dt_ctx}\n\n{}", self.system_prompt)
        };

        let mut messages = vec![ChatMessage::system(system_content)];
        if let Some(history) = history {
            for turn in history {
                let content = turn.content.trim();
                if !content.is_empty() {
                    messages.push(ChatMessage {
                        role: turn.role.as_str().to_string(),
                        content: content.to_string(),
                    });
                }
            }
        }
        messages.push(ChatMessage::user(query));
        messages
    }
}

#[async_trait]
impl Handler for CharacterHandler {
    async fn handle(&self, query: &str, ctx: &HandlerContext<'_>) -> OrchestratorResult {
        let mut metadata = ResultMetadata::default();
        let empty = Map::new();
        let appt_collected = ctx.appt_collected.unwrap_or(&empty);
        let order_collected = ctx.order_collected.unwrap_or(&empty);

        // Cancel intent (regex, always run). When the message has a cancel
        // keyword but no number, fall back to the saved reference number.
        let mut cancel_intent = Self::extract_cancel_intent(query);
        if cancel_intent.is_none() {
            let q_lower = query.to_lowercase();
            if CANCEL_KEYWORDS.iter().any(|kw| q_lower.contains(kw)) {
                if let Some(saved) = collected_str(appt_collected, "appt_number") {
                    cancel_intent = Some(AppointmentAction {
                        appt_number: saved.to_string(),
                        action: "cancel".into(),
                    });
                }
            }
        }
        metadata.appointment_cancel = cancel_intent;

        // Reschedule intent (regex, always run)
        let mut reschedule_intent = Self::extract_reschedule_intent(query);
        if reschedule_intent.is_none() {
            let q_lower = query.to_lowercase();
            if RESCHEDULE_KEYWORDS.iter().any(|kw| q_lower.contains(kw)) {
                if let Some(saved) = collected_str(appt_collected, "appt_number") {
                    reschedule_intent = Some(AppointmentAction {
                        appt_number: saved.to_string(),
                        action: "reschedule".into(),
                    });
                }
            }
        }
        metadata.reschedule_intent = reschedule_intent;

        // ── Active flow: one LLM call with full context ──────────────────
        if let Some(active_mode) = ctx.active_mode {
            let reschedule_field_defs = reschedule_fields();
            let (flow_fields, flow_collected): (&[FieldDef], &Map<String, Value>) =
                match active_mode {
                    Mode::Appointment => (&self.appointment_fields, appt_collected),
                    Mode::Order => (&self.order_fields, order_collected),
                    Mode::Reschedule => (
                        &reschedule_field_defs,
                        ctx.reschedule_collected.unwrap_or(&empty),
                    ),
                };

            let flow_section = Self::build_flow_section(
                active_mode,
                flow_fields,
                flow_collected,
                &ctx.availability_slots,
            );
            let messages = self.build_messages(
                query,
                ctx.conversation_history,
                None,
                Some(flow_section.as_str()),
            );

            let raw = match self.chat_with_timeout(&messages).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("CharacterHandler: LLM call failed: {e}");
                    let mut result = OrchestratorResult::new(query, IntentType::Character);
                    metadata.error = Some(e.to_string());
                    result.metadata = metadata;
                    return result;
                }
            };

            let (extracted, answer) = Self::parse_flow_response(&raw);

            let extracted = if !extracted.is_empty() {
                let e = normalize_to_options(extracted, flow_fields);
                let e = validate_extracted(e, flow_fields);
                filter_invisible_fields(e, flow_fields, flow_collected)
            } else {
                extracted
            };

            let confirmed_field = extracted
                .get("confirmed")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            tracing::debug!(
                mode = %active_mode,
                extracted = ?extracted.keys().filter(|k| *k != "confirmed").collect::<Vec<_>>(),
                confirmed = confirmed_field,
                "CharacterHandler: flow extraction"
            );

            if !extracted.is_empty() {
                match active_mode {
                    Mode::Appointment => metadata.appointment_update = Some(extracted),
                    Mode::Order => metadata.order_update = Some(extracted),
                    Mode::Reschedule => metadata.reschedule_update = Some(extracted),
                }
            }

            let mut result = OrchestratorResult::new(query, IntentType::Character);
            result.answer = Some(answer.trim().to_string()).filter(|a| !a.is_empty());
            result.metadata = metadata;
            return result;
        }

        // ── Non-flow mode: persona LLM + optional passive extraction ─────
        let messages = self.build_messages(query, ctx.conversation_history, ctx.mode_context, None);
        let answer = match self.chat_with_timeout(&messages).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("CharacterHandler: LLM call failed: {e}");
                let mut result = OrchestratorResult::new(query, IntentType::Character);
                metadata.error = Some(e.to_string());
                result.metadata = metadata;
                return result;
            }
        };

        // Passive appointment extraction: only when signals are present
        if !self.appointment_fields.is_empty()
            && Self::should_extract(query, &answer, APPT_KEYWORDS)
        {
            let current = get_next_field(&self.appointment_fields, appt_collected)
                .or_else(|| get_next_optional_field(&self.appointment_fields, appt_collected))
                .map(|f| f.key.clone());
            if let Some(update) = self
                .extract_data(
                    query,
                    ctx.conversation_history,
                    &answer,
                    &self.appointment_fields,
                    "randevu",
                    appt_collected,
                    current.as_deref(),
                )
                .await
            {
                tracing::info!(
                    fields = ?update.keys().collect::<Vec<_>>(),
                    "CharacterHandler: passive appointment extraction"
                );
                metadata.appointment_update = Some(update);
            }
        }

        // Passive order extraction
        if !self.order_fields.is_empty() && Self::should_extract(query, &answer, ORDER_KEYWORDS) {
            let current = get_next_field(&self.order_fields, order_collected)
                .or_else(|| get_next_optional_field(&self.order_fields, order_collected))
                .map(|f| f.key.clone());
            if let Some(update) = self
                .extract_data(
                    query,
                    ctx.conversation_history,
                    &answer,
                    &self.order_fields,
                    "sipariş",
                    order_collected,
                    current.as_deref(),
                )
                .await
            {
                tracing::info!(
                    fields = ?update.keys().collect::<Vec<_>>(),
                    "CharacterHandler: passive order extraction"
                );
                metadata.order_update = Some(update);
            }
        }

        let mut result = OrchestratorResult::new(query, IntentType::Character)
            .with_answer(answer.trim().to_string());
        result.metadata = metadata;
        result
    }
}

fn detect_action(query: &str, keywords: &[&str], action: &str) -> Option<AppointmentAction> {
    let q_lower = query.to_lowercase();
    if !keywords.iter().any(|kw| q_lower.contains(kw)) {
        return None;
    }
    if let Some(m) = appt_num_re().find(query) {
        return Some(AppointmentAction {
            appt_number: m.as_str().to_uppercase(),
            action: action.into(),
        });
    }
    if let Some(m) = appt_num_near_re().find(query) {
        let mut raw = m.as_str().to_uppercase();
        if raw.starts_with("ND-") {
            raw.insert(0, 'R');
        }
        return Some(AppointmentAction {
            appt_number: raw,
            action: action.into(),
        });
    }
    None
}

fn clean_extracted(parsed: Map<String, Value>) -> Map<String, Value> {
    parsed
        .into_iter()
        .filter(|(_, v)| match v {
            Value::Null => false,
            Value::String(s) => {
                let s = s.trim().to_lowercase();
                !s.is_empty() && s != "null" && s != "none"
            }
            _ => true,
        })
        .collect()
}

/// Parse JSON from an extraction response, tolerating markdown fences and
/// chain-of-thought tags
fn parse_extraction_json(raw: &str) -> Option<Map<String, Value>> {
    let text = thinking_strip_re().replace_all(raw.trim(), "");
    let text = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if text.is_empty() || text.eq_ignore_ascii_case("null") || text.eq_ignore_ascii_case("none") {
        return None;
    }
    if let Ok(Value::Object(parsed)) = serde_json::from_str::<Value>(text) {
        let cleaned = clean_extracted(parsed);
        return if cleaned.is_empty() { None } else { Some(cleaned) };
    }
    if let Some(m) = bare_json_re().find(text) {
        if let Ok(Value::Object(parsed)) = serde_json::from_str::<Value>(m.as_str()) {
            let cleaned = clean_extracted(parsed);
            return if cleaned.is_empty() { None } else { Some(cleaned) };
        }
    }
    tracing::warn!(
        "CharacterHandler: extraction parse failed: {:?}",
        raw.chars().take(200).collect::<String>()
    );
    None
}

/// Turkish current date/time block for the system prompt.
///
/// BOT_TIMEZONE is consulted but only as far as a fixed offset: Istanbul has
/// no DST since 2016, so UTC+3 is exact for the default deployment; "UTC"
/// selects +0.
fn build_datetime_context() -> String {
    let offset = match std::env::var("BOT_TIMEZONE").as_deref() {
        Ok("UTC") | Ok("utc") => FixedOffset::east_opt(0).unwrap(),
        _ => FixedOffset::east_opt(3 * 3600).unwrap(),
    };
    let now = Utc::now().with_timezone(&offset);

    let day_name = DAYS_TR[now.weekday().num_days_from_monday() as usize];
    let month_name = MONTHS_TR[now.month0() as usize];
    let tomorrow = now + ChronoDuration::days(1);
    let tomorrow_str = format!(
        "{} {} {}",
        tomorrow.day(),
        MONTHS_TR[tomorrow.month0() as usize],
        tomorrow.year()
    );

    let monday = now - ChronoDuration::days(now.weekday().num_days_from_monday() as i64);
    let week_parts: Vec<String> = (0..7)
        .map(|i| {
            let d = monday + ChronoDuration::days(i);
            format!(
                "{}: {} {} {}",
                DAYS_TR[i as usize],
                d.day(),
                MONTHS_TR[d.month0() as usize],
                d.year()
            )
        })
        .collect();

    format!(
        "--- [GÜNCEL ZAMAN BİLGİSİ] ---\nBugün: {day_name}, {} {month_name} {} | Saat: {:02}:{:02} (Türkiye / UTC+3)\nYarın: {tomorrow_str}\nBu hafta: {}\n--- [/GÜNCEL ZAMAN BİLGİSİ] ---",
        now.day(),
        now.year(),
        now.hour(),
        now.minute(),
        week_parts.join(" | ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_extract_and_response_blocks() {
        let raw = "<extract>{\"name\": \"Ada\", \"phone\": \"05321234567\"}</extract><response>Teşekkürler Ada!</response>";
        let (extracted, answer) = CharacterHandler::parse_flow_response(raw);
        assert_eq!(extracted.get("name").unwrap(), "Ada");
        assert_eq!(answer, "Teşekkürler Ada!");
    }

    #[test]
    fn missing_response_falls_back_to_raw_minus_extract() {
        let raw = "<extract>{\"confirmed\": true}</extract>Harika, kaydediyorum.";
        let (extracted, answer) = CharacterHandler::parse_flow_response(raw);
        assert_eq!(extracted.get("confirmed").unwrap(), true);
        assert_eq!(answer, "Harika, kaydediyorum.");
    }

    #[test]
    fn empty_extract_produces_no_update() {
        let raw = "<extract>{}</extract><response>Hangi tarih uygun?</response>";
        let (extracted, answer) = CharacterHandler::parse_flow_response(raw);
        assert!(extracted.is_empty());
        assert_eq!(answer, "Hangi tarih uygun?");
    }

    #[test]
    fn null_string_values_are_dropped() {
        let raw = "<extract>{\"name\": \"null\", \"phone\": \"05321234567\"}</extract><response>ok</response>";
        let (extracted, _) = CharacterHandler::parse_flow_response(raw);
        assert!(extracted.get("name").is_none());
        assert!(extracted.get("phone").is_some());
    }

    #[test]
    fn cancel_intent_requires_keyword_and_number() {
        let action =
            CharacterHandler::extract_cancel_intent("RND-2026-0042 numaralı randevumu iptal et")
                .unwrap();
        assert_eq!(action.appt_number, "RND-2026-0042");
        assert_eq!(action.action, "cancel");

        assert!(CharacterHandler::extract_cancel_intent("randevumu iptal et").is_none());
        assert!(CharacterHandler::extract_cancel_intent("RND-2026-0042 hakkında bilgi").is_none());
    }

    #[test]
    fn near_miss_reference_is_normalised() {
        let action =
            CharacterHandler::extract_cancel_intent("nd-2026-0001 iptal olsun").unwrap();
        assert_eq!(action.appt_number, "RND-2026-0001");
    }

    #[test]
    fn reschedule_intent_detected() {
        let action = CharacterHandler::extract_reschedule_intent(
            "RND-2026-0042 tarihimi değiştirmek istiyorum",
        )
        .unwrap();
        assert_eq!(action.action, "reschedule");
    }

    #[test]
    fn extraction_json_tolerates_fences_and_thinking() {
        let raw = "<thinking>user gave a phone</thinking>\n```json\n{\"phone\": \"05321234567\"}\n```";
        let parsed = parse_extraction_json(raw).unwrap();
        assert_eq!(parsed.get("phone").unwrap(), "05321234567");

        assert!(parse_extraction_json("null").is_none());
        assert!(parse_extraction_json("  ").is_none());
    }

    #[test]
    fn flow_section_lists_fields_and_rules() {
        let fields = vec![
            FieldDef {
                key: "name".into(),
                label: Some("Ad".into()),
                required: true,
                ..Default::default()
            },
            FieldDef {
                key: "event_time".into(),
                label: Some("Saat".into()),
                required: true,
                validation: Some(FieldValidation::Time),
                ..Default::default()
            },
        ];
        let collected = json!({"name": "Ada"}).as_object().cloned().unwrap();
        let mut slots = std::collections::HashMap::new();
        slots.insert("event_time".to_string(), vec!["10:00".to_string(), "14:30".to_string()]);

        let section =
            CharacterHandler::build_flow_section(Mode::Appointment, &fields, &collected, &slots);
        assert!(section.contains("GÖREV: RANDEVU"));
        assert!(section.contains("✓ Ad: Ada"));
        assert!(section.contains("UYGUN SAAT SEÇENEKLERİ"));
        assert!(section.contains("10:00"));
        assert!(section.contains("ZORUNLU ÇIKTI FORMATI"));
    }
}
