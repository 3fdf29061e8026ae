use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{LoginRequest, LoginResponse},
    utils::{Password, ValidatedJson},
    AppState,
};

/// Login with email and password.
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let session = state
        .identity
        .login(&req.email, Password::new(req.password))
        .await?;

    Ok(Json(LoginResponse {
        token: session.token,
        token_type: "Bearer",
        expires_in: session.expires_in,
    }))
}
