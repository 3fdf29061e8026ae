//! Per-client fixed-window rate limiting.
//!
//! Each client key owns a counter and the instant its current window opened. A
//! request arriving `time_frame` or later after that instant opens a new window
//! before it is counted, so a client can land up to twice the quota across a
//! window boundary.

use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use serde::Deserialize;
use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const REJECTION_MESSAGE: &str = "Too many requests. Please try again later.";

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_time_frame: u32,
    pub time_frame: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_time_frame: 150,
            time_frame: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    started: Instant,
}

/// Outcome of a single `allow` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub permitted: bool,
    /// Time until the caller's window resets. Zero when permitted.
    pub retry_after: Duration,
}

impl RateDecision {
    /// Whole seconds for a `Retry-After` header, rounded up and never below one.
    pub fn retry_after_seconds(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        let rounded = if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        };
        rounded.max(1)
    }
}

struct Inner {
    enabled: bool,
    limit: u32,
    time_frame: Duration,
    windows: DashMap<String, RateWindow>,
}

#[derive(Clone)]
pub struct FixedWindowRateLimiter {
    inner: Arc<Inner>,
}

impl FixedWindowRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                enabled: config.enabled,
                limit: config.requests_per_time_frame,
                time_frame: config.time_frame,
                windows: DashMap::new(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn allow(&self, key: &str) -> RateDecision {
        self.allow_at(key, Instant::now())
    }

    /// Counts one request for `key` at `now`.
    ///
    /// The shard lock held by the entry guard serializes concurrent callers on
    /// the same key, so check-and-increment is atomic per key.
    pub fn allow_at(&self, key: &str, now: Instant) -> RateDecision {
        let inner = &self.inner;
        if !inner.enabled {
            return RateDecision {
                permitted: true,
                retry_after: Duration::ZERO,
            };
        }

        let mut window = match inner.windows.get_mut(key) {
            Some(window) => window,
            None => inner
                .windows
                .entry(key.to_string())
                .or_insert(RateWindow {
                    count: 0,
                    started: now,
                }),
        };

        if now.saturating_duration_since(window.started) >= inner.time_frame {
            window.count = 0;
            window.started = now;
        }
        window.count = window.count.saturating_add(1);

        if window.count <= inner.limit {
            RateDecision {
                permitted: true,
                retry_after: Duration::ZERO,
            }
        } else {
            let elapsed = now.saturating_duration_since(window.started);
            RateDecision {
                permitted: false,
                retry_after: inner.time_frame.saturating_sub(elapsed),
            }
        }
    }

    /// Drops windows that have fully elapsed. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.inner.windows.len();
        let time_frame = self.inner.time_frame;
        self.inner
            .windows
            .retain(|_, window| now.saturating_duration_since(window.started) < time_frame);
        before.saturating_sub(self.inner.windows.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.inner.windows.len()
    }

    /// Periodically purges stale windows so idle clients do not accumulate.
    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let removed = limiter.purge_expired(Instant::now());
                if removed > 0 {
                    tracing::debug!(removed, "purged expired rate limit windows");
                }
            }
        })
    }
}

/// Client key for a request: the first `x-forwarded-for` entry, else the peer address.
pub fn client_key(request: &Request) -> Option<String> {
    let forwarded = request
        .headers()
        .get(FORWARDED_FOR_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

pub async fn rate_limit_middleware(
    State(limiter): State<FixedWindowRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !limiter.is_enabled() {
        return Ok(next.run(request).await);
    }

    let Some(key) = client_key(&request) else {
        tracing::warn!("could not determine client address, skipping rate limit");
        return Ok(next.run(request).await);
    };

    let decision = limiter.allow(&key);
    if decision.permitted {
        return Ok(next.run(request).await);
    }

    let retry_after = decision.retry_after_seconds();
    tracing::warn!(
        client_ip = %key,
        method = %request.method(),
        path = %request.uri().path(),
        retry_after_seconds = retry_after,
        "rate limit exceeded"
    );
    metrics::counter!("rate_limit_rejections_total").increment(1);

    Err(AppError::TooManyRequests(
        REJECTION_MESSAGE.to_string(),
        Some(retry_after),
    ))
}
