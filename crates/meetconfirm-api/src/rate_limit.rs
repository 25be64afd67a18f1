//! Fixed-window rate limiter for the public link routes.
//!
//! Counts requests per wall-clock second with two atomics. Bursts straddling
//! a second boundary can briefly see up to twice the limit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::pages;

#[derive(Clone)]
pub struct RateLimiter {
    max_per_sec: u64,
    count: Arc<AtomicU64>,
    window: Arc<AtomicU64>,
}

impl RateLimiter {
    pub fn new(max_per_sec: u64) -> Self {
        Self {
            max_per_sec: max_per_sec.max(1),
            count: Arc::new(AtomicU64::new(0)),
            window: Arc::new(AtomicU64::new(0)),
        }
    }

    fn try_acquire(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.try_acquire_at(now)
    }

    /// Take a permit in the window for `epoch_sec`.
    pub fn try_acquire_at(&self, epoch_sec: u64) -> bool {
        let current = self.window.load(Ordering::Relaxed);
        if epoch_sec != current
            && self
                .window
                .compare_exchange(current, epoch_sec, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.count.store(1, Ordering::Relaxed);
            return true;
        }
        self.count.fetch_add(1, Ordering::Relaxed) < self.max_per_sec
    }
}

pub async fn rate_limit(State(limiter): State<RateLimiter>, req: Request, next: Next) -> Response {
    if limiter.try_acquire() {
        next.run(req).await
    } else {
        pages::page(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests",
            "Please wait a moment and open the link again.",
        )
        .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_resets_each_second() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.try_acquire_at(100));
        assert!(limiter.try_acquire_at(100));
        assert!(!limiter.try_acquire_at(100));
        assert!(limiter.try_acquire_at(101));
        assert!(limiter.try_acquire_at(101));
        assert!(!limiter.try_acquire_at(101));
    }
}
