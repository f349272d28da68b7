// Appointment price calculator
//
// All prices in TRY. Keyed by artist name -> event type -> base studio price.
// The computed block is injected into the mode context verbatim so the LLM
// quotes the number instead of doing arithmetic.

use serde_json::{Map, Value};

use crate::flow::{collected_str, SKIP_SENTINEL};

const PRICE_TABLE: &[(&str, &[(&str, i64)])] = &[
    ("İzel", &[("Düğün", 20000), ("Nişan", 15000), ("Kına", 12000), ("Söz / İsteme", 10000), ("Davetli / Nedime", 5000), ("Profesyonel Makyaj", 3000)]),
    ("Merve", &[("Düğün", 18000), ("Nişan", 12000), ("Kına", 10000), ("Söz / İsteme", 8000), ("Davetli / Nedime", 4000), ("Profesyonel Makyaj", 2500)]),
    ("Dicle", &[("Düğün", 22000), ("Nişan", 16000), ("Kına", 13000), ("Söz / İsteme", 11000), ("Davetli / Nedime", 5500), ("Profesyonel Makyaj", 3500)]),
    ("İrem", &[("Düğün", 15000), ("Nişan", 10000), ("Kına", 9000), ("Söz / İsteme", 7000), ("Davetli / Nedime", 3500), ("Profesyonel Makyaj", 2000)]),
    ("Gizem", &[("Düğün", 15000), ("Nişan", 10000), ("Kına", 9000), ("Söz / İsteme", 7000), ("Davetli / Nedime", 3500), ("Profesyonel Makyaj", 2000)]),
    ("Neslihan", &[("Düğün", 15000), ("Nişan", 10000), ("Kına", 9000), ("Söz / İsteme", 7000), ("Davetli / Nedime", 3500), ("Profesyonel Makyaj", 2000)]),
    ("Standart Ekip", &[("Düğün", 10000), ("Nişan", 5000), ("Kına", 5000), ("Söz / İsteme", 4000), ("Davetli / Nedime", 2500), ("Profesyonel Makyaj", 1500)]),
];

/// Extra-person surcharge per location (per additional person beyond the first)
const EXTRA_PERSON_RATES: &[(&str, i64)] = &[
    ("Stüdyo", 5000),
    ("Otel / Ev", 6000),
    ("Şehir Dışı", 7000),
];

const EVENT_ALIASES: &[(&str, &str)] = &[
    ("söz", "Söz / İsteme"),
    ("söz / isteme", "Söz / İsteme"),
    ("söz/isteme", "Söz / İsteme"),
    ("isteme", "Söz / İsteme"),
    ("davetli", "Davetli / Nedime"),
    ("nedime", "Davetli / Nedime"),
    ("davetli / nedime", "Davetli / Nedime"),
    ("davetli/nedime", "Davetli / Nedime"),
    ("profesyonel makyaj", "Profesyonel Makyaj"),
    ("prof. makyaj", "Profesyonel Makyaj"),
    ("prof.makyaj", "Profesyonel Makyaj"),
    ("düğün", "Düğün"),
    ("nişan", "Nişan"),
    ("kına", "Kına"),
];

const LOCATION_ALIASES: &[(&str, &str)] = &[
    ("stüdyo", "Stüdyo"),
    ("otel", "Otel / Ev"),
    ("otel / ev", "Otel / Ev"),
    ("otel/ev", "Otel / Ev"),
    ("ev", "Otel / Ev"),
    ("şehir dışı", "Şehir Dışı"),
    ("şehirdışı", "Şehir Dışı"),
];

const EVENT_TYPES: &[&str] = &[
    "Düğün",
    "Nişan",
    "Kına",
    "Söz / İsteme",
    "Davetli / Nedime",
    "Profesyonel Makyaj",
];

/// Canonical event-type name, or None if unrecognised
fn norm_event(event_type: &str) -> Option<&'static str> {
    let key = event_type.trim().to_lowercase();
    if let Some((_, canonical)) = EVENT_ALIASES.iter().find(|(alias, _)| *alias == key) {
        return Some(canonical);
    }
    EVENT_TYPES
        .iter()
        .find(|c| c.to_lowercase() == key)
        .copied()
}

/// Canonical location name, or None if unrecognised
fn norm_location(location: &str) -> Option<&'static str> {
    let key = location.trim().to_lowercase();
    if let Some((_, canonical)) = LOCATION_ALIASES.iter().find(|(alias, _)| *alias == key) {
        return Some(canonical);
    }
    EXTRA_PERSON_RATES
        .iter()
        .map(|(loc, _)| *loc)
        .find(|c| c.to_lowercase() == key)
}

fn extra_rate(location: &str) -> i64 {
    EXTRA_PERSON_RATES
        .iter()
        .find(|(loc, _)| *loc == location)
        .map(|(_, r)| *r)
        .unwrap_or(5000)
}

fn base_price(artist: &str, event: &str) -> Option<i64> {
    let artist_key = artist.trim().to_lowercase();
    let (_, prices) = PRICE_TABLE
        .iter()
        .find(|(name, _)| name.to_lowercase() == artist_key)?;
    prices.iter().find(|(e, _)| *e == event).map(|(_, p)| *p)
}

fn located_price(base: i64, location: &str) -> i64 {
    match location {
        "Otel / Ev" => base + 2000,
        "Şehir Dışı" => base * 2,
        _ => base,
    }
}

/// Format integer TRY amount with Turkish thousands separator: 22000 -> "22.000"
fn fmt_try(amount: i64) -> String {
    let digits = amount.abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    if amount < 0 {
        format!("-{out}")
    } else {
        out
    }
}

/// Exact total price in TRY for the given combination.
///
/// Returns None when any input is unrecognised — the caller then leaves the
/// LLM to handle it rather than showing a wrong number.
pub fn calculate_price(
    artist: &str,
    event_type: &str,
    location: &str,
    total_people: i64,
) -> Option<i64> {
    let event = norm_event(event_type)?;
    let location = norm_location(location)?;
    let base = base_price(artist, event)?;

    let mut price = located_price(base, location);
    let extra = (total_people - 1).max(0);
    price += extra * extra_rate(location);
    Some(price)
}

/// Pre-computed price block for injection into the mode context.
///
/// When an artist is collected the exact total is shown; otherwise every
/// artist's price for the current event+location is listed.
pub fn build_computed_price_block(collected: &Map<String, Value>) -> Option<String> {
    let event_type = collected_str(collected, "event_type")?.trim();
    let location = collected_str(collected, "location")?.trim();
    if event_type.is_empty() || location.is_empty() {
        return None;
    }
    let norm_loc = norm_location(location)?;
    let norm_ev = norm_event(event_type)?;

    let mut lines = vec![
        "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".to_string(),
        "HESAPLANAN FİYATLAR (fiyat motoru — LLM bu sayıları değiştirmez)".to_string(),
        "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".to_string(),
    ];

    let artist = collected_str(collected, "artist")
        .map(str::trim)
        .filter(|a| !a.is_empty() && *a != SKIP_SENTINEL);

    if let Some(artist) = artist {
        let total_people = collected_str(collected, "extra_people")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(1)
            .max(1);

        // Unrecognised inputs — don't inject anything wrong
        let price = calculate_price(artist, event_type, location, total_people)?;

        let extra = total_people - 1;
        let rate = extra_rate(norm_loc);
        let base = calculate_price(artist, event_type, location, 1).unwrap_or(0);

        lines.push(format!("Artist : {artist}"));
        lines.push(format!("Hizmet : {norm_ev}  |  Lokasyon : {norm_loc}"));
        if extra > 0 {
            lines.push(format!(
                "Kişi   : {total_people} ({extra} ek kişi × {}₺)",
                fmt_try(rate)
            ));
            lines.push(format!(
                "Hesap  : {}₺ + {extra} × {}₺ = {}₺",
                fmt_try(base),
                fmt_try(rate),
                fmt_try(price)
            ));
        } else {
            lines.push("Kişi   : 1".to_string());
            lines.push(format!("Hesap  : {}₺", fmt_try(price)));
            lines.push(format!("(Her ek kişi için +{}₺)", fmt_try(rate)));
        }
        lines.push(format!(
            "TOPLAM : {}₺  ← Bu rakamı kullan, değiştirme",
            fmt_try(price)
        ));
    } else {
        lines.push(format!("Hizmet : {norm_ev}  |  Lokasyon : {norm_loc}"));
        lines.push("Artist fiyatları (aşağıdaki tabloyu olduğu gibi kullan):".to_string());
        for (name, prices) in PRICE_TABLE {
            let Some((_, base)) = prices.iter().find(|(e, _)| e == &norm_ev) else {
                continue;
            };
            lines.push(format!("  • {name}: {}₺", fmt_try(located_price(*base, norm_loc))));
        }
        lines.push(format!("(Her ek kişi için ayrıca +{}₺)", fmt_try(extra_rate(norm_loc))));
    }

    lines.push("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".to_string());
    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn studio_price_is_base() {
        assert_eq!(calculate_price("İzel", "Düğün", "Stüdyo", 1), Some(20000));
    }

    #[test]
    fn hotel_adds_flat_surcharge() {
        assert_eq!(calculate_price("Merve", "Nişan", "Otel / Ev", 1), Some(14000));
    }

    #[test]
    fn out_of_town_doubles() {
        assert_eq!(calculate_price("Dicle", "Kına", "Şehir Dışı", 1), Some(26000));
    }

    #[test]
    fn extra_people_charged_per_location_rate() {
        // 20000 base + 2 extra * 5000 (studio rate)
        assert_eq!(calculate_price("İzel", "Düğün", "Stüdyo", 3), Some(30000));
        // (15000 * 2) + 1 extra * 7000
        assert_eq!(calculate_price("İzel", "Nişan", "Şehir Dışı", 2), Some(37000));
    }

    #[test]
    fn aliases_normalise_spellings() {
        assert_eq!(
            calculate_price("izel", "söz", "ev", 1),
            calculate_price("İzel", "Söz / İsteme", "Otel / Ev", 1)
        );
    }

    #[test]
    fn unknown_inputs_return_none() {
        assert_eq!(calculate_price("Nobody", "Düğün", "Stüdyo", 1), None);
        assert_eq!(calculate_price("İzel", "Mezuniyet", "Stüdyo", 1), None);
        assert_eq!(calculate_price("İzel", "Düğün", "Ay Yüzeyi", 1), None);
    }

    #[test]
    fn turkish_thousands_separator() {
        assert_eq!(fmt_try(22000), "22.000");
        assert_eq!(fmt_try(5000), "5.000");
        assert_eq!(fmt_try(950), "950");
        assert_eq!(fmt_try(1234567), "1.234.567");
    }

    #[test]
    fn price_block_lists_artists_when_artist_unknown() {
        let collected = json!({"event_type": "Düğün", "location": "Stüdyo"})
            .as_object()
            .cloned()
            .unwrap();
        let block = build_computed_price_block(&collected).unwrap();
        assert!(block.contains("İzel: 20.000₺"));
        assert!(block.contains("Standart Ekip: 10.000₺"));
    }

    #[test]
    fn price_block_shows_total_with_artist() {
        let collected = json!({
            "event_type": "Düğün",
            "location": "Otel / Ev",
            "artist": "Merve",
            "extra_people": "2",
        })
        .as_object()
        .cloned()
        .unwrap();
        let block = build_computed_price_block(&collected).unwrap();
        // 18000 + 2000 hotel + 1 extra * 6000
        assert!(block.contains("TOPLAM : 26.000₺"));
    }

    #[test]
    fn price_block_absent_before_event_and_location() {
        let collected = json!({"event_type": "Düğün"}).as_object().cloned().unwrap();
        assert!(build_computed_price_block(&collected).is_none());
    }
}
