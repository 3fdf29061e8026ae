pub mod metrics;
pub mod rate_limit;
pub mod tracing;

pub use metrics::metrics_middleware;
pub use rate_limit::{FixedWindowRateLimiter, RateDecision, RateLimitConfig, rate_limit_middleware};
pub use tracing::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
