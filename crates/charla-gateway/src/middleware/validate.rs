use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::middleware::{parse_form, read_body, rebuild};
use crate::payload::WebhookPayload;
use crate::{replies, twiml};

/// Parse and validate the form body into a [`WebhookPayload`], stashed in
/// the request extensions for the handler. Failures answer with a generic
/// apology; the structured issues go to the log only.
pub async fn validate_payload(req: Request, next: Next) -> Response {
    let (parts, bytes) = match read_body(req).await {
        Ok(buffered) => buffered,
        Err(resp) => return resp,
    };

    let params = parse_form(&bytes);
    match WebhookPayload::from_params(&params) {
        Ok(payload) => {
            let mut req = rebuild(parts, bytes);
            req.extensions_mut().insert(payload);
            next.run(req).await
        }
        Err(issues) => {
            warn!(?issues, "webhook payload failed validation");
            twiml::xml_reply(StatusCode::BAD_REQUEST, replies::INVALID_REQUEST)
        }
    }
}
