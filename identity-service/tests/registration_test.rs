mod common;

use axum::http::{Method, StatusCode};
use common::{registration_body, TestApp};
use identity_service::config::Environment;
use serde_json::json;

#[tokio::test]
async fn test_register_returns_code_outside_production() {
    let app = TestApp::new();

    let response = app.register("ana@example.com").await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["message"], "user created");
    let code = response.body["code"].as_str().unwrap();
    assert_eq!(code.len(), 5);
    assert_eq!(app.notifier.last_code().as_deref(), Some(code));

    let user = app.store.find_user_by_email("ana@example.com").unwrap();
    assert!(!user.is_validated);
    assert_eq!(user.role_name, "client");
}

#[tokio::test]
async fn test_register_hides_code_in_production() {
    let mut config = common::test_config(Default::default());
    config.environment = Environment::Prod;
    config.rate_limit.enabled = false;
    let app = TestApp::with_config(config);

    let response = app.register("ana@example.com").await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert!(response.body.get("code").is_none());
}

#[tokio::test]
async fn test_register_duplicate_email_conflicts() {
    let app = TestApp::new();
    assert_eq!(app.register("ana@example.com").await.status, StatusCode::CREATED);

    let mut body = registration_body("ANA@example.com");
    body["identity_document"] = json!("OTHER-DOC");
    let response = app
        .request(Method::POST, "/v1/auth/register", Some(body), None)
        .await;

    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_register_rejects_invalid_payload() {
    let app = TestApp::new();

    let mut body = registration_body("not-an-email");
    body["password"] = json!("short");
    let response = app
        .request(Method::POST, "/v1/auth/register", Some(body), None)
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = app
        .request(
            Method::POST,
            "/v1/auth/register",
            Some(json!({ "email": "ana@example.com" })),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.user_count(), 0);
}

#[tokio::test]
async fn test_register_rolls_back_when_notification_fails() {
    let app = TestApp::new();
    app.notifier.set_failing(true);

    let response = app.register("ana@example.com").await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(app.store.find_user_by_email("ana@example.com").is_none());
    assert!(!response.body.to_string().contains("mock notifier"));
}

#[tokio::test]
async fn test_activate_then_reuse_code() {
    let app = TestApp::new();
    let code = app.register("ana@example.com").await.body["code"]
        .as_str()
        .unwrap()
        .to_string();

    let first = app
        .request(Method::PUT, "/v1/auth/activate", Some(json!({ "code": code })), None)
        .await;
    assert_eq!(first.status, StatusCode::NO_CONTENT);

    let second = app
        .request(Method::PUT, "/v1/auth/activate", Some(json!({ "code": code })), None)
        .await;
    assert_eq!(second.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_staff_registration_requires_gate_role() {
    let app = TestApp::new();
    let client_token = app.active_client_token("member@example.com").await;

    let mut body = registration_body("coach@example.com");
    body["role"] = json!("trainer");

    let response = app
        .request(
            Method::POST,
            "/v1/auth/register-staff",
            Some(body.clone()),
            Some(&client_token),
        )
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let admin_token = app
        .seed_user_with_role("admin@example.com", "branch_admin")
        .await;
    let response = app
        .request(
            Method::POST,
            "/v1/auth/register-staff",
            Some(body),
            Some(&admin_token),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);

    let coach = app.store.find_user_by_email("coach@example.com").unwrap();
    assert_eq!(coach.role_name, "trainer");
}

#[tokio::test]
async fn test_staff_registration_rejects_unknown_or_higher_role() {
    let app = TestApp::new();
    let admin_token = app
        .seed_user_with_role("admin@example.com", "branch_admin")
        .await;

    let mut body = registration_body("someone@example.com");
    body["role"] = json!("janitor");
    let response = app
        .request(
            Method::POST,
            "/v1/auth/register-staff",
            Some(body.clone()),
            Some(&admin_token),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    body["role"] = json!("super_admin");
    let response = app
        .request(
            Method::POST,
            "/v1/auth/register-staff",
            Some(body),
            Some(&admin_token),
        )
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert!(app.store.find_user_by_email("someone@example.com").is_none());
}

#[tokio::test]
async fn test_undefined_gate_role_is_a_server_error() {
    let mut config = common::test_config(Default::default());
    config.rate_limit.enabled = false;
    config.staff_registration_role = "branch_manager".to_string();
    let app = TestApp::with_config(config);
    let token = app
        .seed_user_with_role("root@example.com", "super_admin")
        .await;

    let mut body = registration_body("coach@example.com");
    body["role"] = json!("trainer");
    let response = app
        .request(
            Method::POST,
            "/v1/auth/register-staff",
            Some(body),
            Some(&token),
        )
        .await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!response.body.to_string().contains("branch_manager"));
    assert!(app.store.find_user_by_email("coach@example.com").is_none());
}
