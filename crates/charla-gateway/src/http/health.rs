//! GET /health — fan-out over the shared store handles.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;

/// RSS above this is reported unhealthy.
const RSS_LIMIT_KB: u64 = 1024 * 1024;

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let database = database_check(&state);
    let redis = redis_check(&state).await;
    let memory = memory_check();

    let all_ok = [&database, &redis, &memory]
        .iter()
        .all(|check| check["status"] == "ok");
    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if all_ok { "ok" } else { "degraded" },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "uptime": state.started_at.elapsed().as_secs(),
            "environment": state.config.environment.as_str(),
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "database": database,
                "redis": redis,
                "memory": memory,
            },
        })),
    )
        .into_response()
}

fn database_check(state: &AppState) -> Value {
    let started = Instant::now();
    match state.store.users.count() {
        Ok(_) => json!({
            "status": "ok",
            "latencyMs": started.elapsed().as_millis() as u64,
        }),
        Err(e) => json!({
            "status": "error",
            "error": e.to_string(),
        }),
    }
}

async fn redis_check(state: &AppState) -> Value {
    let started = Instant::now();
    match state.kv.ping().await {
        Ok(()) => json!({
            "status": "ok",
            "latencyMs": started.elapsed().as_millis() as u64,
        }),
        Err(e) => json!({
            "status": "error",
            "error": e.to_string(),
        }),
    }
}

/// Resident set size from procfs; healthy wherever procfs is absent.
fn memory_check() -> Value {
    let rss_kb = std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|value| value.parse::<u64>().ok())
        });
    match rss_kb {
        Some(kb) if kb > RSS_LIMIT_KB => json!({
            "status": "error",
            "error": format!("rss {kb} KiB over {RSS_LIMIT_KB} KiB limit"),
        }),
        Some(kb) => json!({ "status": "ok", "rssKb": kb }),
        None => json!({ "status": "ok" }),
    }
}
