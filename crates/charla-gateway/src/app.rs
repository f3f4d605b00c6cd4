use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderValue};
use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use charla_cache::KvStore;
use charla_conversations::{ConversationService, MessageService};
use charla_core::config::CharlaConfig;
use charla_llm::LlmService;
use charla_store::Store;

use crate::middleware;

/// Per-request deadline enforced by the HTTP layer.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Central shared state — passed as Arc<AppState> to all handlers.
///
/// Exactly one store handle and one key-value handle exist per process;
/// request handlers never hold mutable state of their own.
pub struct AppState {
    pub config: CharlaConfig,
    pub store: Arc<Store>,
    pub kv: Arc<dyn KvStore>,
    pub conversations: ConversationService,
    pub messages: MessageService,
    pub llm: LlmService,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: CharlaConfig,
        store: Arc<Store>,
        kv: Arc<dyn KvStore>,
        llm: LlmService,
    ) -> Self {
        Self {
            conversations: ConversationService::new(store.clone(), kv.clone()),
            messages: MessageService::new(store.clone(), kv.clone()),
            config,
            store,
            kv,
            llm,
            started_at: Instant::now(),
        }
    }
}

/// Assemble the full router.
///
/// The webhook route carries the four pipeline stages. Route layers apply
/// inside-out — the last one added runs first — so the execution order is:
/// content-type gate → signature → rate limiter → payload validator →
/// handler.
pub fn build_router(state: Arc<AppState>) -> Router {
    let webhook = Router::new()
        .route(
            "/webhook/whatsapp",
            post(crate::http::webhook::webhook_handler),
        )
        .layer(axum_middleware::from_fn(
            middleware::validate::validate_payload,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::signature::verify_signature,
        ))
        .layer(axum_middleware::from_fn(
            middleware::content_type::require_form_content_type,
        ));

    Router::new()
        .merge(webhook)
        .route("/health", get(crate::http::health::health_handler))
        .with_state(state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(cors_layer(&state.config))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::STRICT_TRANSPORT_SECURITY,
                    HeaderValue::from_static("max-age=31536000; includeSubDomains; preload"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("no-referrer"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static(
                        "default-src 'self'; object-src 'none'; frame-src 'none'",
                    ),
                )),
        )
}

fn cors_layer(config: &CharlaConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .server
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    // An empty whitelist allows no browser origins at all.
    CorsLayer::new().allow_origin(AllowOrigin::list(origins))
}
