use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use charla_core::types::Role;

use crate::error::LlmError;
use crate::provider::{ChatBackend, ChatMessage, Completion, CompletionRequest};

/// Character-estimate input budget (chars/4) enforced before each call.
pub const DEFAULT_TOKEN_BUDGET: usize = 8000;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
const MAX_ATTEMPTS: u32 = 3;

const DEFAULT_SYSTEM_PROMPT: &str = "Eres un asistente amable que conversa por WhatsApp. \
Responde de forma breve y clara, en el idioma del usuario.";

/// Per-million-token prices used for the cost field.
#[derive(Debug, Clone, Copy)]
pub struct PriceTable {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
        }
    }
}

/// A completion plus the usage metrics persisted with the assistant turn.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionMetrics {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub tokens_used: u32,
    pub latency_ms: u64,
    pub model: String,
    pub stop_reason: String,
    pub cost: f64,
}

/// Wraps a completion backend with validation, context-budget truncation,
/// and classified retry with exponential back-off.
pub struct LlmService {
    backend: Box<dyn ChatBackend>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    system_prompt: String,
    token_budget: usize,
    prices: PriceTable,
}

impl LlmService {
    pub fn new(backend: Box<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            max_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            token_budget: DEFAULT_TOKEN_BUDGET,
            prices: PriceTable::default(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.token_budget = budget;
        self
    }

    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = prices;
        self
    }

    /// Request an assistant completion for the message list.
    ///
    /// Up to three attempts; the sleep before attempt k+1 is 1000·2^(k−1) ms.
    /// `latency_ms` measures the successful attempt only, not the back-off.
    pub async fn complete_with_metrics(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<CompletionMetrics, LlmError> {
        validate(&messages)?;
        let messages = truncate_to_budget(messages, self.token_budget);

        let req = CompletionRequest {
            model: self.model.clone(),
            system: self.system_prompt.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            match self.backend.complete(&req).await {
                Ok(completion) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    debug!(
                        backend = self.backend.name(),
                        attempt, latency_ms, "completion succeeded"
                    );
                    return Ok(self.attach_metrics(completion, latency_ms));
                }
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let backoff = Duration::from_millis(1000 * 2u64.pow(attempt - 1));
                    warn!(
                        backend = self.backend.name(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "completion attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    warn!(backend = self.backend.name(), attempt, error = %e, "completion failed");
                    return Err(e);
                }
            }
        }
    }

    fn attach_metrics(&self, completion: Completion, latency_ms: u64) -> CompletionMetrics {
        let cost = f64::from(completion.input_tokens) / 1_000_000.0 * self.prices.input_per_mtok
            + f64::from(completion.output_tokens) / 1_000_000.0 * self.prices.output_per_mtok;
        CompletionMetrics {
            tokens_used: completion.input_tokens + completion.output_tokens,
            content: completion.content,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
            latency_ms,
            model: completion.model,
            stop_reason: completion.stop_reason,
            cost,
        }
    }
}

fn validate(messages: &[ChatMessage]) -> Result<(), LlmError> {
    if messages.is_empty() {
        return Err(LlmError::InvalidRequest("message list is empty".to_string()));
    }
    for (i, message) in messages.iter().enumerate() {
        if message.content.trim().is_empty() {
            return Err(LlmError::InvalidRequest(format!(
                "message {i} has blank content"
            )));
        }
    }
    // last() is safe after the emptiness check.
    if messages.last().map(|m| m.role) != Some(Role::User) {
        return Err(LlmError::InvalidRequest(
            "last message must be from the user".to_string(),
        ));
    }
    Ok(())
}

/// chars/4 token estimate, rounded up.
fn estimate_tokens(content: &str) -> usize {
    content.chars().count().div_ceil(4)
}

/// Drop messages from the oldest end until the estimate fits the budget.
/// The most recent suffix is always preserved.
fn truncate_to_budget(mut messages: Vec<ChatMessage>, budget: usize) -> Vec<ChatMessage> {
    let mut total: usize = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
    let mut dropped = 0usize;
    while total > budget && messages.len() > 1 {
        let removed = messages.remove(0);
        total -= estimate_tokens(&removed.content);
        dropped += 1;
    }
    if dropped > 0 {
        debug!(dropped, remaining = messages.len(), "context truncated to token budget");
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    /// Backend returning a scripted sequence of outcomes.
    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<Completion, LlmError>>>,
        calls: std::sync::Arc<AtomicU32>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<Completion, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: std::sync::Arc::new(AtomicU32::new(0)),
            }
        }

        fn call_counter(&self) -> std::sync::Arc<AtomicU32> {
            self.calls.clone()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _req: &CompletionRequest) -> Result<Completion, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Upstream("script exhausted".to_string())))
        }
    }

    fn ok_completion(content: &str) -> Completion {
        Completion {
            content: content.to_string(),
            model: "claude-sonnet-4-5".to_string(),
            input_tokens: 1000,
            output_tokens: 500,
            stop_reason: "end_turn".to_string(),
        }
    }

    fn user(content: &str) -> ChatMessage {
        ChatMessage::new(Role::User, content)
    }

    fn assistant(content: &str) -> ChatMessage {
        ChatMessage::new(Role::Assistant, content)
    }

    fn service(script: Vec<Result<Completion, LlmError>>) -> LlmService {
        LlmService::new(Box::new(ScriptedBackend::new(script)), "claude-sonnet-4-5")
    }

    #[tokio::test]
    async fn rejects_empty_message_list() {
        let svc = service(vec![Ok(ok_completion("hola"))]);
        let err = svc.complete_with_metrics(vec![]).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn rejects_blank_content() {
        let svc = service(vec![Ok(ok_completion("hola"))]);
        let err = svc
            .complete_with_metrics(vec![user("   ")])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn rejects_non_user_final_message() {
        let svc = service(vec![Ok(ok_completion("hola"))]);
        let err = svc
            .complete_with_metrics(vec![user("hola"), assistant("¡hola!")])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn metrics_carry_usage_and_cost() {
        let svc = service(vec![Ok(ok_completion("Respuesta"))]);
        let reply = svc.complete_with_metrics(vec![user("Hola")]).await.unwrap();
        assert_eq!(reply.content, "Respuesta");
        assert_eq!(reply.tokens_used, 1500);
        // 1000 in @ $3/M + 500 out @ $15/M.
        assert!((reply.cost - 0.0105).abs() < 1e-9);
        assert_eq!(reply.stop_reason, "end_turn");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limit_and_server_errors() {
        let svc = service(vec![
            Err(LlmError::RateLimited),
            Err(LlmError::UpstreamUnavailable("status 500".to_string())),
            Ok(ok_completion("Respuesta")),
        ]);
        let reply = svc.complete_with_metrics(vec![user("Hola")]).await.unwrap();
        assert_eq!(reply.content, "Respuesta");
    }

    #[tokio::test]
    async fn bad_request_fails_on_first_attempt() {
        let backend = ScriptedBackend::new(vec![
            Err(LlmError::BadRequest("malformed".to_string())),
            Ok(ok_completion("unreachable")),
        ]);
        let calls = backend.call_counter();
        let svc = LlmService::new(Box::new(backend), "claude-sonnet-4-5");
        let err = svc.complete_with_metrics(vec![user("Hola")]).await.unwrap_err();
        assert!(matches!(err, LlmError::BadRequest(_)));
        // One attempt only.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let svc = service(vec![
            Err(LlmError::Unauthenticated("bad key".to_string())),
            Ok(ok_completion("unreachable")),
        ]);
        let err = svc.complete_with_metrics(vec![user("Hola")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Unauthenticated(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_attempts() {
        let svc = service(vec![
            Err(LlmError::UpstreamUnavailable("status 503".to_string())),
            Err(LlmError::UpstreamUnavailable("status 503".to_string())),
            Err(LlmError::UpstreamUnavailable("status 503".to_string())),
            Ok(ok_completion("unreachable")),
        ]);
        let err = svc.complete_with_metrics(vec![user("Hola")]).await.unwrap_err();
        assert!(matches!(err, LlmError::UpstreamUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_schedule_is_one_then_two_seconds() {
        let svc = service(vec![
            Err(LlmError::RateLimited),
            Err(LlmError::RateLimited),
            Ok(ok_completion("Respuesta")),
        ]);
        let started = tokio::time::Instant::now();
        svc.complete_with_metrics(vec![user("Hola")]).await.unwrap();
        // Paused clock advances by the sleeps: 1 s + 2 s.
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn truncation_preserves_most_recent_suffix() {
        // 40 chars ≈ 10 estimated tokens per message.
        let filler = "x".repeat(40);
        let messages: Vec<ChatMessage> = (0..5)
            .map(|i| {
                if i % 2 == 0 {
                    user(&format!("{filler}{i}"))
                } else {
                    assistant(&format!("{filler}{i}"))
                }
            })
            .collect();
        let kept = truncate_to_budget(messages, 25);
        assert_eq!(kept.len(), 2);
        assert!(kept[0].content.ends_with('3'));
        assert!(kept[1].content.ends_with('4'));
    }

    #[test]
    fn truncation_never_drops_the_last_message() {
        let kept = truncate_to_budget(vec![user(&"x".repeat(100_000))], 10);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn within_budget_list_is_untouched() {
        let messages = vec![user("hola"), assistant("¡hola!"), user("¿qué tal?")];
        let kept = truncate_to_budget(messages.clone(), DEFAULT_TOKEN_BUDGET);
        assert_eq!(kept.len(), messages.len());
    }
}
