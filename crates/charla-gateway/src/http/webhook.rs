//! The webhook coordinator — POST /webhook/whatsapp.
//!
//! Runs after the pipeline stages, so the payload in the request
//! extensions is already authenticated, rate-checked, and validated.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Extension;
use tracing::{debug, error, info};

use charla_llm::{ChatMessage, LlmError};
use charla_store::StoreError;

use crate::app::AppState;
use crate::payload::WebhookPayload;
use crate::{replies, twiml};

#[derive(Debug, thiserror::Error)]
enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Ids gathered along the way, for failure correlation in the log.
#[derive(Default)]
struct Correlation {
    conversation_id: Option<String>,
    user_id: Option<String>,
}

/// POST /webhook/whatsapp
///
/// Always answers 200 with a reply document once the pipeline has let the
/// request through: the sender sees either the assistant's text or a
/// localized apology. Failure details stay in the structured log.
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Extension(payload): Extension<WebhookPayload>,
) -> Response {
    let phone = payload.phone();

    // Nothing to answer for media-only or sender-less deliveries.
    if payload.body.trim().is_empty() || phone.is_empty() {
        debug!(num_media = payload.num_media, "empty body or sender, short-circuiting");
        return twiml::xml_reply(StatusCode::OK, replies::CANNOT_PROCESS);
    }

    let mut correlation = Correlation::default();
    match process(&state, &payload, phone, &mut correlation).await {
        Ok(reply) => twiml::xml_reply(StatusCode::OK, &reply),
        Err(e) => {
            error!(
                error = %e,
                conversation_id = correlation.conversation_id.as_deref().unwrap_or("unknown"),
                user_id = correlation.user_id.as_deref().unwrap_or("unknown"),
                "webhook processing failed"
            );
            twiml::xml_reply(StatusCode::OK, replies::TECHNICAL_DIFFICULTIES)
        }
    }
}

/// The fixed turn sequence: resolve conversation, append the user turn,
/// assemble context, complete, persist the assistant turn.
async fn process(
    state: &AppState,
    payload: &WebhookPayload,
    phone: &str,
    correlation: &mut Correlation,
) -> Result<String, ProcessError> {
    let (conversation, user) = state
        .conversations
        .get_or_create(phone, payload.profile_name.as_deref())?;
    correlation.conversation_id = Some(conversation.id.clone());
    correlation.user_id = Some(user.id.clone());

    state
        .messages
        .save_user(&conversation.id, &payload.body, Some(&payload.message_sid))
        .await?;

    let context = state.messages.recent_context(&conversation.id).await?;
    let chat: Vec<ChatMessage> = context
        .into_iter()
        .map(|entry| ChatMessage::new(entry.role, entry.content))
        .collect();

    let reply = state.llm.complete_with_metrics(chat).await?;

    state
        .messages
        .save_assistant(
            &conversation.id,
            &reply.content,
            Some(i64::from(reply.tokens_used)),
            Some(reply.latency_ms as i64),
        )
        .await?;

    info!(
        conversation_id = %conversation.id,
        user_id = %user.id,
        tokens_used = reply.tokens_used,
        latency_ms = reply.latency_ms,
        model = %reply.model,
        "webhook turn completed"
    );
    Ok(reply.content)
}
