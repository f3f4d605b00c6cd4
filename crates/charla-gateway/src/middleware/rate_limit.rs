//! Dual-axis rate limiter: one counter per hashed phone, one per client
//! IP, both atomic increments in the key-value store. Fails open — a
//! store outage never rejects a sender.

use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{request::Parts, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use charla_cache::KvStore;
use charla_core::privacy::hash_pii;

use crate::app::AppState;
use crate::middleware::{parse_form, read_body, rebuild};
use crate::{replies, twiml};

/// Post-increment counter state for one axis.
struct AxisStatus {
    count: i64,
    /// Unix seconds when the window resets.
    reset_at: u64,
}

pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let (parts, bytes) = match read_body(req).await {
        Ok(buffered) => buffered,
        Err(resp) => return resp,
    };

    let params = parse_form(&bytes);
    let phone = params
        .iter()
        .find(|(k, _)| k == "From")
        .map(|(_, v)| v.strip_prefix("whatsapp:").unwrap_or(v))
        .unwrap_or("");
    let ip = client_ip(&state, &parts);

    let cfg = &state.config.rate_limit;
    let phone_hash = hash_pii(phone, &state.config.privacy.hash_salt);
    let phone_key = format!("ratelimit:phone:{phone_hash}");
    let ip_key = format!("ratelimit:ip:{ip}");

    let phone_axis =
        bump_axis(state.kv.as_ref(), &phone_key, cfg.window_seconds).await;
    let ip_axis = bump_axis(state.kv.as_ref(), &ip_key, cfg.ip_window_seconds).await;

    // Phone takes priority when both axes are over their ceiling.
    if let Some(axis) = &phone_axis {
        if axis.count > i64::from(cfg.max_requests) {
            warn!(phone_hash = %phone_hash, count = axis.count, "phone rate limit exceeded");
            let mut resp = twiml::xml_reply(StatusCode::TOO_MANY_REQUESTS, replies::PHONE_RATE_LIMIT);
            attach_headers(&mut resp, cfg, &phone_axis, &ip_axis);
            return resp;
        }
    }
    if let Some(axis) = &ip_axis {
        if axis.count > i64::from(cfg.max_ip_requests) {
            warn!(ip = %ip, count = axis.count, "ip rate limit exceeded");
            let mut resp = twiml::xml_reply(StatusCode::TOO_MANY_REQUESTS, replies::IP_RATE_LIMIT);
            attach_headers(&mut resp, cfg, &phone_axis, &ip_axis);
            return resp;
        }
    }

    let mut resp = next.run(rebuild(parts, bytes)).await;
    attach_headers(&mut resp, cfg, &phone_axis, &ip_axis);
    resp
}

/// Increment one axis counter, attaching the window expiry to a fresh key.
/// Returns `None` on store failure — the caller proceeds un-limited.
async fn bump_axis(kv: &dyn KvStore, key: &str, window_secs: u64) -> Option<AxisStatus> {
    let count = match kv.incr(key).await {
        Ok(count) => count,
        Err(e) => {
            warn!(key, error = %e, "rate limit store unavailable, failing open");
            return None;
        }
    };
    if count == 1 {
        if let Err(e) = kv.expire(key, window_secs).await {
            warn!(key, error = %e, "failed to attach rate limit window");
        }
    }
    let remaining = match kv.ttl(key).await {
        Ok(ttl) => ttl.unwrap_or(window_secs),
        Err(_) => window_secs,
    };
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    Some(AxisStatus {
        count,
        reset_at: now + remaining,
    })
}

fn attach_headers(
    resp: &mut Response,
    cfg: &charla_core::config::RateLimitConfig,
    phone_axis: &Option<AxisStatus>,
    ip_axis: &Option<AxisStatus>,
) {
    let headers = resp.headers_mut();
    let set = |headers: &mut axum::http::HeaderMap, name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    };
    if let Some(axis) = phone_axis {
        set(headers, "x-ratelimit-limit", cfg.max_requests.to_string());
        set(
            headers,
            "x-ratelimit-remaining",
            (i64::from(cfg.max_requests) - axis.count).max(0).to_string(),
        );
        set(headers, "x-ratelimit-reset", axis.reset_at.to_string());
    }
    if let Some(axis) = ip_axis {
        set(headers, "x-ratelimit-ip-limit", cfg.max_ip_requests.to_string());
        set(
            headers,
            "x-ratelimit-ip-remaining",
            (i64::from(cfg.max_ip_requests) - axis.count).max(0).to_string(),
        );
    }
}

/// Client address: the forwarded chain's first hop when a proxy is
/// trusted, the socket peer otherwise.
fn client_ip(state: &AppState, parts: &Parts) -> String {
    if state.config.server.trust_proxy {
        if let Some(forwarded) = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
        {
            return forwarded;
        }
    }
    parts
        .extensions
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
