//! HTTP handlers for identity-service.

pub mod auth;
pub mod metrics;
pub mod user;

pub use auth::*;
pub use metrics::metrics;
pub use user::whoami;
