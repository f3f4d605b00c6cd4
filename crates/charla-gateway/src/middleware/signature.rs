//! Webhook authentication: reconstruct the canonical signable string and
//! compare the recomputed HMAC against the provider's signature header.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, request::Parts, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::app::AppState;
use crate::middleware::{parse_form, read_body, rebuild};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// Verify the provider signature over `full_url + sorted(key ++ value)`.
///
/// Missing header, mismatch, or any reconstruction failure → 403. Skipped
/// only in development mode; mandatory everywhere else.
pub async fn verify_signature(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if state.config.environment.is_development() {
        debug!("development mode: webhook signature verification skipped");
        return next.run(req).await;
    }

    let (parts, bytes) = match read_body(req).await {
        Ok(buffered) => buffered,
        Err(resp) => return resp,
    };

    match check_signature(&state, &parts, &bytes) {
        Ok(()) => next.run(rebuild(parts, bytes)).await,
        Err(reason) => {
            warn!(reason, "webhook signature rejected");
            forbidden()
        }
    }
}

fn check_signature(state: &AppState, parts: &Parts, bytes: &[u8]) -> Result<(), &'static str> {
    let provided = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or("missing signature header")?;
    let provided = BASE64
        .decode(provided)
        .map_err(|_| "signature is not valid base64")?;

    let url = full_request_url(state, parts)?;
    let params = parse_form(bytes);

    let mut mac = HmacSha256::new_from_slice(state.config.twilio.auth_token.as_bytes())
        .map_err(|_| "invalid signing key")?;
    mac.update(signable_string(&url, params).as_bytes());
    mac.verify_slice(&provided)
        .map_err(|_| "signature mismatch")
}

/// The string the provider signs: the full request URL followed by every
/// body parameter sorted by key, each key immediately followed by its value.
fn signable_string(url: &str, mut params: Vec<(String, String)>) -> String {
    params.sort_by(|a, b| a.0.cmp(&b.0));
    let mut out = String::from(url);
    for (key, value) in params {
        out.push_str(&key);
        out.push_str(&value);
    }
    out
}

/// `scheme://host + original_uri`, honoring the forwarded scheme only when
/// a proxy is trusted.
fn full_request_url(state: &AppState, parts: &Parts) -> Result<String, &'static str> {
    let scheme = if state.config.server.trust_proxy {
        parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("https")
    } else {
        "http"
    };
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or("missing Host header")?;
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    Ok(format!("{scheme}://{host}{path_and_query}"))
}

/// Sign a payload the way the verifier expects; the other half of
/// `check_signature`, used by outbound tooling and the test suite.
pub fn compute_signature(auth_token: &str, url: &str, params: &[(String, String)]) -> String {
    // HMAC-SHA256 accepts keys of any length.
    let mut mac =
        HmacSha256::new_from_slice(auth_token.as_bytes()).expect("hmac key of any length is valid");
    mac.update(signable_string(url, params.to_vec()).as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": "Forbidden",
            "message": "Access denied",
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signable_string_sorts_keys() {
        let params = vec![
            ("MessageSid".to_string(), "SMabc".to_string()),
            ("Body".to_string(), "Hola".to_string()),
            ("From".to_string(), "whatsapp:+1".to_string()),
        ];
        let s = signable_string("http://example.com/webhook/whatsapp", params);
        assert_eq!(
            s,
            "http://example.com/webhook/whatsappBodyHolaFromwhatsapp:+1MessageSidSMabc"
        );
    }

    #[test]
    fn compute_signature_is_deterministic() {
        let params = vec![("Body".to_string(), "Hola".to_string())];
        let a = compute_signature("secret", "http://example.com/w", &params);
        let b = compute_signature("secret", "http://example.com/w", &params);
        assert_eq!(a, b);
        let c = compute_signature("other", "http://example.com/w", &params);
        assert_ne!(a, c);
    }
}
