// Request throttling for the guild listing and verification endpoints.
//
// Fixed-window counter per client key. The window store is injected so a
// shared backend can replace the in-memory map when running more than one
// instance; the in-memory store only limits a single process.

mod store;

pub use store::{InMemoryRateLimiterStore, RateLimiterStore, RateWindow};

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

/// Longest accepted window (one day).
pub const MAX_WINDOW_SECONDS: i64 = 86_400;

/// Bucket shared by every request that carries no client address.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Outcome of a throttle check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed { remaining: u32 },
    RateLimited { retry_after_seconds: u64 },
}

/// Per-client fixed-window request limiter.
pub struct RequestThrottle {
    store: Arc<dyn RateLimiterStore>,
    max_requests: u32,
    window: Duration,
}

impl RequestThrottle {
    pub fn new(store: Arc<dyn RateLimiterStore>, max_requests: u32, window_seconds: u64) -> Self {
        Self {
            store,
            max_requests,
            window: Duration::seconds(
                i64::try_from(window_seconds)
                    .unwrap_or(MAX_WINDOW_SECONDS)
                    .clamp(1, MAX_WINDOW_SECONDS),
            ),
        }
    }

    /// 100 requests per 60-second window over an in-memory store.
    pub fn in_memory_default() -> Self {
        Self::new(Arc::new(InMemoryRateLimiterStore::new()), 100, 60)
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Counts one request for `client_key` and decides whether it may proceed.
    pub async fn check(&self, client_key: &str) -> ThrottleDecision {
        self.check_at(client_key, Utc::now()).await
    }

    /// [`check`](Self::check) against an explicit clock reading.
    pub async fn check_at(&self, client_key: &str, now: DateTime<Utc>) -> ThrottleDecision {
        let window = self.store.hit(client_key, now, self.window).await;

        if window.count <= self.max_requests {
            return ThrottleDecision::Allowed {
                remaining: self.max_requests - window.count,
            };
        }

        let remaining_ms = (window.window_reset_at - now).num_milliseconds().max(0);
        // Round up, and never tell a client to retry immediately
        let retry_after_seconds = u64::try_from((remaining_ms + 999) / 1000)
            .unwrap_or(1)
            .max(1);

        debug!(
            client = %client_key,
            count = window.count,
            retry_after_seconds,
            "Request rate limited"
        );
        ThrottleDecision::RateLimited {
            retry_after_seconds,
        }
    }

    /// Drops windows that have already reset. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        self.store.sweep(Utc::now()).await
    }

    pub fn store(&self) -> &Arc<dyn RateLimiterStore> {
        &self.store
    }
}

/// Client identity for throttling: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, else the shared [`UNKNOWN_CLIENT`] bucket.
pub fn client_key(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Background task that sweeps expired windows on a fixed interval.
///
/// Owned by the process: `main` spawns it and aborts the handle on shutdown.
pub async fn run_sweep(throttle: Arc<RequestThrottle>, interval_seconds: u64) {
    // A zero period would panic inside the detached task
    let period = tokio::time::Duration::from_secs(interval_seconds.max(1));
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;
        let removed = throttle.sweep().await;
        let remaining = throttle.store().len().await;
        tracing::debug!(removed, remaining, "Rate limit sweep complete");
    }
}
