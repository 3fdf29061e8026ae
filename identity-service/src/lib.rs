pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{rate_limit_middleware, FixedWindowRateLimiter},
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::IdentityConfig;
use crate::middleware::{auth_middleware, require_role, RoleGate};
use crate::services::IdentityService;

/// Upper bound for a whole request, storage retries and notification included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub identity: IdentityService,
    pub rate_limiter: FixedWindowRateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    let staff_gate = RoleGate::new(
        state.identity.clone(),
        state.config.staff_registration_role.clone(),
    );

    let staff_routes = Router::new()
        .route("/auth/register-staff", post(handlers::register_staff))
        .route_layer(from_fn_with_state(staff_gate, require_role))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let user_routes = Router::new()
        .route("/user/whoami", get(handlers::whoami))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let v1 = Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(handlers::register))
        .route("/auth/activate", put(handlers::activate))
        .route("/auth/login", post(handlers::login))
        .route("/auth/password/forgot", post(handlers::forgot_password))
        .route("/auth/password/reset", put(handlers::reset_password))
        .merge(staff_routes)
        .merge(user_routes);

    Router::new()
        .nest("/v1", v1)
        .route("/metrics", get(handlers::metrics))
        .with_state(state.clone())
        // Global per-client rate limiting
        .layer(from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(from_fn(metrics_middleware))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
}

/// Service health check: reports availability once storage answers.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.identity.store().health_check().await.map_err(|e| {
        tracing::error!(error = %e, "storage health check failed");
        AppError::from(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "available",
        "environment": if state.config.is_prod() { "production" } else { "development" },
        "version": state.config.service_version,
    })))
}
