use crate::error::AppError;
use crate::utils::get_header;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    pub purpose: &'static str,
    pub window: Duration,
    pub max: u32,
}

pub const OPEN_SHARE_POLICY: RatePolicy = RatePolicy {
    purpose: "open-share",
    window: Duration::from_secs(60),
    max: 30,
};

pub const VALIDATE_POLICY: RatePolicy = RatePolicy {
    purpose: "validate",
    window: Duration::from_secs(60),
    max: 60,
};

pub const CONFIRM_POLICY: RatePolicy = RatePolicy {
    purpose: "confirm",
    window: Duration::from_secs(60),
    max: 10,
};

#[derive(Debug)]
struct Window {
    started_at: Instant,
    count: u32,
}

/// Fixed-window counters keyed by purpose + client ip. Advisory abuse
/// mitigation only; correctness never depends on it.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            windows: DashMap::new(),
        }
    }

    pub fn check_limit(&self, key: &str, now: Instant, window: Duration, max: u32) -> bool {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(Window {
                started_at: now,
                count: 0,
            });
        if now.duration_since(entry.started_at) >= window {
            entry.started_at = now;
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);
        entry.count <= max
    }

    pub fn evict_idle(&self, now: Instant, max_idle: Duration) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now.duration_since(window.started_at) < max_idle);
        before - self.windows.len()
    }
}

#[derive(Clone)]
pub struct RateLimit {
    pub limiter: Arc<RateLimiter>,
    pub policy: RatePolicy,
}

pub async fn rate_limit(
    State(limit): State<RateLimit>,
    ConnectInfo(peer_address): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = format!(
        "{}:{}",
        limit.policy.purpose,
        client_key(request.headers(), peer_address)
    );
    if !limit
        .limiter
        .check_limit(&key, Instant::now(), limit.policy.window, limit.policy.max)
    {
        return Err(AppError::RateLimited);
    }
    Ok(next.run(request).await)
}

fn client_key(headers: &HeaderMap, peer_address: SocketAddr) -> String {
    get_header("X-Forwarded-For", headers)
        .and_then(|value| value.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| peer_address.ip().to_string())
}
