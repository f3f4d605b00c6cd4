//! PII hygiene: a keyed one-way hash for log/cache keys and recursive
//! redaction of sensitive fields before structured values reach the log.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Number of hex characters kept from the digest.
const HASH_PREFIX_LEN: usize = 16;

const REDACTED: &str = "[REDACTED]";

/// Field names whose values never reach logs. Matched case-insensitively
/// against object keys, exact match after lowercasing.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "auth_token",
    "authtoken",
    "authorization",
    "api_key",
    "apikey",
    "secret",
    "signature",
    "x_twilio_signature",
    "message_sid",
    "messagesid",
    "sms_sid",
    "smssid",
    "from",
    "to",
    "phone",
    "phone_number",
    "wa_id",
    "waid",
    "profile_name",
    "profilename",
];

/// Deterministic keyed digest of a PII string, truncated to 16 hex chars.
///
/// Same input and salt always yield the same output; the raw value cannot
/// be recovered. Empty input returns the literal `"unknown"` so that log
/// keys stay greppable.
pub fn hash_pii(value: &str, salt: &str) -> String {
    if value.is_empty() {
        return "unknown".to_string();
    }
    // HMAC-SHA256 accepts keys of any length.
    let mut mac =
        HmacSha256::new_from_slice(salt.as_bytes()).expect("hmac key of any length is valid");
    mac.update(value.as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());
    digest[..HASH_PREFIX_LEN].to_string()
}

/// Recursively replace values of sensitive keys with `"[REDACTED]"`.
///
/// Arrays and nested objects are walked in place; scalar values outside a
/// sensitive key are left untouched.
pub fn redact(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if is_sensitive(key) {
                    *v = serde_json::Value::String(REDACTED.to_string());
                } else {
                    redact(v);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                redact(item);
            }
        }
        _ => {}
    }
}

fn is_sensitive(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|k| *k == lowered)
}
