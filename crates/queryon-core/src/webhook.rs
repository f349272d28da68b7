// Outbound webhook signing and inbound verification
//
// Every outbound event is signed with HMAC-SHA256 over the exact JSON body;
// the hex digest travels in `X-Queryon-Signature: sha256=<hex>` so the
// receiver can verify authenticity. Inbound verification strips the prefix
// and compares against a fresh HMAC in constant time.

use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Queryon-Signature";
pub const EVENT_HEADER: &str = "X-Queryon-Event";

/// Appointment lifecycle events carried by outbound webhooks
pub const EVENT_CREATED: &str = "appointment.created";
pub const EVENT_UPDATED: &str = "appointment.updated";
pub const EVENT_CANCELLED: &str = "appointment.cancelled";

/// `sha256=<hex>` HMAC signature for `body` using `secret`
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify that `provided` matches the HMAC of `body` with `secret`.
///
/// `provided` may be bare hex or `sha256=<hex>`. Comparison is constant-time
/// via the Mac verifier.
pub fn verify(body: &[u8], secret: &str, provided: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let clean = provided.strip_prefix("sha256=").unwrap_or(provided);
    let Ok(sig_bytes) = hex::decode(clean) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    mac.verify_slice(&sig_bytes).is_ok()
}

/// Webhook envelope: `{event, timestamp (UTC ISO-8601 'Z'), data}`
pub fn build_payload(event: &str, data: Value, timestamp: DateTime<Utc>) -> Value {
    serde_json::json!({
        "event": event,
        "timestamp": timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        "data": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let body = br#"{"event":"appointment.updated"}"#;
        let sig = sign(body, "s3cr3t");
        assert!(sig.starts_with("sha256="));
        assert!(verify(body, "s3cr3t", &sig));
        // bare hex also accepted
        assert!(verify(body, "s3cr3t", sig.strip_prefix("sha256=").unwrap()));
    }

    #[test]
    fn any_byte_change_breaks_verification() {
        let body = b"payload-bytes";
        let sig = sign(body, "s3cr3t");
        assert!(!verify(b"payload-byteS", "s3cr3t", &sig));
        assert!(!verify(body, "other-secret", &sig));

        let mut tampered = sig.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });
        assert!(!verify(body, "s3cr3t", &tampered));
    }

    #[test]
    fn malformed_signature_or_empty_secret_fails_closed() {
        assert!(!verify(b"x", "s3cr3t", "not-hex!"));
        assert!(!verify(b"x", "", "deadbeef"));
    }

    #[test]
    fn payload_envelope_has_z_suffixed_timestamp() {
        let ts = DateTime::parse_from_rfc3339("2026-06-15T14:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let payload = build_payload(
            EVENT_UPDATED,
            serde_json::json!({"appt_number": "RND-2026-0001", "status": "confirmed"}),
            ts,
        );
        assert_eq!(payload["event"], "appointment.updated");
        assert!(payload["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(payload["data"]["appt_number"], "RND-2026-0001");
    }
}
