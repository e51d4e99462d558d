use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::AppError;
use crate::AppState;

/// Fixed-window request counter per client key.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<String, WindowEntry>>>,
    max_requests: u32,
    window: Duration,
}

struct WindowEntry {
    count: u32,
    reset_at: Instant,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    pub async fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        let entry = windows.entry(key.to_string()).or_insert(WindowEntry {
            count: 0,
            reset_at: now + self.window,
        });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }

        entry.count += 1;
        entry.count <= self.max_requests
    }

    /// Forgets windows that have already closed.
    pub async fn prune(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, entry| now < entry.reset_at);
        before - windows.len()
    }
}

/// Keyed by peer address, else the first `x-forwarded-for` hop. The layer
/// runs ahead of authentication, so callers are not known yet.
fn client_key(req: &Request) -> String {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return format!("ip:{}", addr.ip());
    }
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| format!("ip:{}", ip.trim()))
        .unwrap_or_else(|| "ip:unknown".to_string())
}

pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !state.rate_limiter.check(&client_key(&req)).await {
        return Err(AppError::RateLimited);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn window_caps_then_resets() {
        let limiter = RateLimiter::new(2, 60);
        assert!(limiter.check("ip:1").await);
        assert!(limiter.check("ip:1").await);
        assert!(!limiter.check("ip:1").await);
        assert!(limiter.check("ip:2").await);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check("ip:1").await);
    }

    #[test]
    fn key_prefers_peer_address_over_forwarded_header() {
        let mut req = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(client_key(&req), "ip:203.0.113.9");

        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 7], 4000))));
        assert_eq!(client_key(&req), "ip:192.0.2.7");
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_closed_windows() {
        let limiter = RateLimiter::new(5, 10);
        limiter.check("a").await;
        tokio::time::advance(Duration::from_secs(11)).await;
        limiter.check("b").await;
        assert_eq!(limiter.prune().await, 1);
    }
}
