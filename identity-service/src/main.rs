use identity_service::{
    build_router,
    config::IdentityConfig,
    db,
    services::{
        IdentityService, IdentitySettings, JwtAuthenticator, PgCredentialStore, PgRoleDirectory,
        SmtpNotifier,
    },
    AppState,
};
use service_core::middleware::rate_limit::FixedWindowRateLimiter;
use service_core::observability::{init_metrics, init_tracing};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed, metrics disabled");
    }

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| service_core::error::AppError::DatabaseError(e.into()))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| service_core::error::AppError::DatabaseError(e.into()))?;

    let notifier = SmtpNotifier::new(&config.mail)
        .map_err(|e| service_core::error::AppError::ConfigError(e.into()))?;
    let authenticator = JwtAuthenticator::new(
        config.token.secret.as_bytes(),
        &config.token.issuer,
        &config.token.audience,
    );

    let identity = IdentityService::new(
        Arc::new(PgCredentialStore::new(pool.clone())),
        Arc::new(PgRoleDirectory::new(pool)),
        Arc::new(authenticator),
        Arc::new(notifier),
        IdentitySettings::from_config(&config),
    );

    let rate_limiter = FixedWindowRateLimiter::new(&config.rate_limit);
    if rate_limiter.is_enabled() {
        rate_limiter.spawn_sweeper(config.rate_limit.time_frame);
    }
    identity.spawn_token_sweeper(SWEEP_INTERVAL);

    let state = AppState {
        config: config.clone(),
        identity,
        rate_limiter,
    };
    let app = build_router(state);

    let addr: SocketAddr = config.common.bind_address().parse().map_err(|e| {
        service_core::error::AppError::ConfigError(anyhow::anyhow!("invalid bind address: {}", e))
    })?;

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
