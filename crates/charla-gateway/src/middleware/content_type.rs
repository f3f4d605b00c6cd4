use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

const FORM_MEDIA_TYPE: &str = "application/x-www-form-urlencoded";

/// Reject anything that is not a form post.
///
/// Substring match, so parameterized values (`; charset=utf-8`) pass.
pub async fn require_form_content_type(req: Request, next: Next) -> Response {
    let accepted = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains(FORM_MEDIA_TYPE))
        .unwrap_or(false);

    if !accepted {
        warn!("webhook rejected: unsupported content type");
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Json(json!({
                "error": "Unsupported Media Type",
                "message": "Expected application/x-www-form-urlencoded",
            })),
        )
            .into_response();
    }

    next.run(req).await
}
