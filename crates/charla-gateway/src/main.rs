use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use charla_cache::{KvStore, MemoryKv, RedisKv};
use charla_core::config::CharlaConfig;
use charla_gateway::app::{self, AppState};
use charla_llm::{AnthropicBackend, LlmService};
use charla_store::Store;

/// In-flight requests get this long to drain after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // load config: charla.toml + CHARLA_* env + deploy variables
    let config_path = std::env::var("CHARLA_CONFIG").ok();
    let config = CharlaConfig::load(config_path.as_deref())?;
    config.validate()?;

    let store = Arc::new(Store::open(&config.database.url)?);
    let kv: Arc<dyn KvStore> = match &config.redis.url {
        Some(url) => Arc::new(RedisKv::connect(url).await?),
        None => {
            warn!("REDIS_URL not set, using the in-process key-value store (development only)");
            Arc::new(MemoryKv::new())
        }
    };

    let backend = AnthropicBackend::new(
        config.anthropic.api_key.clone(),
        Some(config.anthropic.base_url.clone()),
    );
    let mut llm = LlmService::new(Box::new(backend), config.anthropic.model.clone())
        .with_max_tokens(config.anthropic.max_tokens)
        .with_temperature(config.anthropic.temperature);
    if let Some(prompt) = &config.anthropic.system_prompt {
        llm = llm.with_system_prompt(prompt);
    }

    let bind = config.server.bind.clone();
    let port = config.server.port;
    let environment = config.environment;
    let state = Arc::new(AppState::new(config, store, kv, llm));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, environment = environment.as_str(), "charla gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("shutdown complete");
    Ok(())
}

fn init_tracing() {
    // LOG_LEVEL drives the default filter; RUST_LOG still wins when set.
    let default_filter = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

/// Resolves on SIGINT or SIGTERM. Draining is bounded: a task hard-stops
/// the process once the grace period elapses.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("ctrl-c handler installation");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("sigterm handler installation")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining in-flight requests");
    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        warn!("drain grace period elapsed, terminating");
        std::process::exit(0);
    });
}
