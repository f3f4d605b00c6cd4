//! Reply document writer: `<Response><Message>…</Message></Response>`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// Serialize a single-message reply document with the body text escaped.
pub fn message_response(text: &str) -> String {
    let escaped = quick_xml::escape::escape(text);
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{escaped}</Message></Response>"
    )
}

/// Build an HTTP response carrying a reply document.
pub fn xml_reply(status: StatusCode, text: &str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/xml"))],
        message_response(text),
    )
        .into_response()
}
