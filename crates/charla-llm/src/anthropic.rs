use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{is_network_transient, LlmError};
use crate::provider::{ChatBackend, Completion, CompletionRequest};

const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicBackend {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, req: &CompletionRequest) -> Result<Completion, LlmError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, messages = req.messages.len(), "sending request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(match status {
                429 => LlmError::RateLimited,
                400 => LlmError::BadRequest(text),
                401 | 403 => LlmError::Unauthenticated(text),
                s if s >= 500 => LlmError::UpstreamUnavailable(format!("status {s}: {text}")),
                s => LlmError::Upstream(format!("status {s}: {text}")),
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Upstream(format!("malformed response body: {e}")))?;

        Ok(parse_response(api_resp))
    }
}

fn build_request_body(req: &CompletionRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role,
                "content": m.content,
            })
        })
        .collect();

    serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
        "system": req.system,
        "messages": messages,
    })
}

fn parse_response(resp: ApiResponse) -> Completion {
    // Text blocks are concatenated with newlines; any other block kind is
    // dropped.
    let content = resp
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Unknown => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    Completion {
        content,
        model: resp.model,
        input_tokens: resp.usage.input_tokens,
        output_tokens: resp.usage.output_tokens,
        stop_reason: resp.stop_reason.unwrap_or_default(),
    }
}

fn map_transport(e: reqwest::Error) -> LlmError {
    let message = e.to_string();
    if e.is_timeout() || e.is_connect() || is_network_transient(&message) {
        LlmError::UpstreamUnavailable(message)
    } else {
        LlmError::Upstream(message)
    }
}

// Anthropic API response types (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use charla_core::types::Role;
    use crate::provider::ChatMessage;

    #[test]
    fn request_body_shape() {
        let req = CompletionRequest {
            model: "claude-sonnet-4-5".to_string(),
            system: "Eres un asistente.".to_string(),
            messages: vec![ChatMessage::new(Role::User, "Hola")],
            max_tokens: 1024,
            temperature: 0.7,
        };
        let body = build_request_body(&req);
        assert_eq!(body["model"], "claude-sonnet-4-5");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Hola");
    }

    #[test]
    fn text_blocks_join_with_newlines_and_skip_unknown() {
        let raw = serde_json::json!({
            "model": "claude-sonnet-4-5",
            "content": [
                {"type": "text", "text": "Hola"},
                {"type": "tool_use", "id": "t1", "name": "x", "input": {}},
                {"type": "text", "text": "¿Qué tal?"},
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 7},
        });
        let resp: ApiResponse = serde_json::from_value(raw).unwrap();
        let completion = parse_response(resp);
        assert_eq!(completion.content, "Hola\n¿Qué tal?");
        assert_eq!(completion.input_tokens, 12);
        assert_eq!(completion.output_tokens, 7);
        assert_eq!(completion.stop_reason, "end_turn");
    }
}
