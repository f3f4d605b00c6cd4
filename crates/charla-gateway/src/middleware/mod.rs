//! Inbound pipeline stages for the webhook route, applied in this order:
//! content-type gate → signature verifier → rate limiter → payload
//! validator. No other route runs them.

pub mod content_type;
pub mod rate_limit;
pub mod signature;
pub mod validate;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};

/// Hard cap on buffered form bodies; provider payloads are tiny.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Buffer the request body so a stage can inspect it and still hand the
/// request on. Over-limit or unreadable bodies end the request here.
pub(crate) async fn read_body(req: Request) -> Result<(Parts, Bytes), Response> {
    let (parts, body) = req.into_parts();
    match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => Ok((parts, bytes)),
        Err(_) => Err(StatusCode::PAYLOAD_TOO_LARGE.into_response()),
    }
}

pub(crate) fn rebuild(parts: Parts, bytes: Bytes) -> Request {
    Request::from_parts(parts, Body::from(bytes))
}

/// Decode a form-encoded body into key/value pairs.
pub(crate) fn parse_form(bytes: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(bytes).into_owned().collect()
}
