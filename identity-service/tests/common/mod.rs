#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use identity_service::{
    build_router,
    config::{CodeConfig, DatabaseConfig, Environment, IdentityConfig, MailConfig, TokenConfig},
    models::{NewUserProfile, User},
    services::{
        CredentialStore, IdentityService, IdentitySettings, InMemoryIdentityStore,
        JwtAuthenticator, MockNotifier, RoleDirectory,
    },
    utils::{hash_password, Password},
    AppState,
};
use serde_json::Value;
use service_core::config::Config as CoreConfig;
use service_core::middleware::rate_limit::{FixedWindowRateLimiter, RateLimitConfig};
use std::{sync::Arc, time::Duration};
use tower::util::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "correct horse battery";
pub const CLIENT_IP: &str = "198.51.100.7";

pub fn test_config(rate_limit: RateLimitConfig) -> IdentityConfig {
    IdentityConfig {
        common: CoreConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        environment: Environment::Dev,
        service_name: "identity-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 0,
            max_idle_seconds: 60,
        },
        token: TokenConfig {
            secret: "integration-test-secret-0123456789abcdef".to_string(),
            issuer: "gym".to_string(),
            audience: "gym".to_string(),
            expiry_hours: 72,
        },
        mail: MailConfig {
            from: "no-reply@gym.test".to_string(),
            smtp_host: "localhost".to_string(),
            smtp_port: 2525,
            smtp_user: String::new(),
            smtp_password: String::new(),
            max_retries: 1,
        },
        codes: CodeConfig {
            activation_code_length: 5,
            reset_code_length: 6,
            invitation_expiry_hours: 72,
            password_reset_expiry_hours: 72,
        },
        staff_registration_role: "branch_admin".to_string(),
        rate_limit,
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryIdentityStore>,
    pub notifier: Arc<MockNotifier>,
    pub config: IdentityConfig,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_rate_limit(RateLimitConfig {
            enabled: false,
            requests_per_time_frame: 150,
            time_frame: Duration::from_secs(60),
        })
    }

    pub fn with_rate_limit(rate_limit: RateLimitConfig) -> Self {
        Self::with_config(test_config(rate_limit))
    }

    pub fn with_config(config: IdentityConfig) -> Self {
        let store = Arc::new(InMemoryIdentityStore::with_default_roles());
        let notifier = Arc::new(MockNotifier::new());
        let authenticator = JwtAuthenticator::new(
            config.token.secret.as_bytes(),
            &config.token.issuer,
            &config.token.audience,
        );
        let identity = IdentityService::new(
            store.clone(),
            store.clone(),
            Arc::new(authenticator),
            notifier.clone(),
            IdentitySettings::from_config(&config),
        );
        let state = AppState {
            config: config.clone(),
            identity,
            rate_limiter: FixedWindowRateLimiter::new(&config.rate_limit),
        };

        Self {
            router: build_router(state),
            store,
            notifier,
            config,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", CLIENT_IP);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Registers through the API and returns the activation code from the response.
    pub async fn register(&self, email: &str) -> TestResponse {
        self.request(
            Method::POST,
            "/v1/auth/register",
            Some(registration_body(email)),
            None,
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> TestResponse {
        self.request(
            Method::POST,
            "/v1/auth/login",
            Some(serde_json::json!({ "email": email, "password": password })),
            None,
        )
        .await
    }

    /// Registers, activates and logs in a client. Returns the bearer token.
    pub async fn active_client_token(&self, email: &str) -> String {
        let registered = self.register(email).await;
        assert_eq!(registered.status, StatusCode::CREATED);
        let code = registered.body["code"].as_str().unwrap().to_string();

        let activated = self
            .request(
                Method::PUT,
                "/v1/auth/activate",
                Some(serde_json::json!({ "code": code })),
                None,
            )
            .await;
        assert_eq!(activated.status, StatusCode::NO_CONTENT);

        self.token_for(email).await
    }

    /// Inserts an already-activated user holding `role` and returns a token for it.
    pub async fn seed_user_with_role(&self, email: &str, role: &str) -> String {
        let role = self.store.get_by_name(role).await.unwrap();
        let hash = hash_password(&Password::new(PASSWORD.to_string())).unwrap();
        let mut user = User::new(
            NewUserProfile {
                first_name: "Staff".to_string(),
                last_name: "Member".to_string(),
                email: email.to_string(),
                phone: None,
                identity_document: Uuid::new_v4().simple().to_string(),
                birth_date: None,
            },
            hash.into_bytes(),
            &role,
        );
        user.is_validated = true;
        self.store.create_user(&user).await.unwrap();

        self.token_for(email).await
    }

    /// Waits for the notification after the first `already_sent` and returns its code.
    pub async fn next_code(&self, already_sent: usize) -> String {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let sent = self.notifier.sent();
                if let Some(code) = sent.get(already_sent).and_then(|n| n.data_str("code")) {
                    return code.to_string();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no notification was sent")
    }

    async fn token_for(&self, email: &str) -> String {
        let login = self.login(email, PASSWORD).await;
        assert_eq!(login.status, StatusCode::OK);
        login.body["token"].as_str().unwrap().to_string()
    }
}

pub fn registration_body(email: &str) -> Value {
    serde_json::json!({
        "first_name": "Ana",
        "last_name": "Silva",
        "email": email,
        "phone": "+5511999999999",
        "identity_document": format!("DOC-{email}"),
        "password": PASSWORD,
        "birth_date": "1990-05-17"
    })
}
