use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{ForgotPasswordRequest, ResetPasswordRequest},
        MessageResponse,
    },
    utils::{Password, ValidatedJson},
    AppState,
};

const FORGOT_PASSWORD_MESSAGE: &str =
    "if an account exists for that email, a reset code has been sent";

/// Request a password reset code.
///
/// The lookup and delivery run after the response is sent. Every request gets
/// the same answer, so the response never reveals whether an account exists.
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ForgotPasswordRequest>,
) -> (StatusCode, Json<MessageResponse>) {
    state.identity.spawn_forgot_password(req.email);

    (
        StatusCode::ACCEPTED,
        Json(MessageResponse::new(FORGOT_PASSWORD_MESSAGE)),
    )
}

/// Redeem a reset code and set a new password.
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<StatusCode, AppError> {
    state
        .identity
        .reset_password(&req.code, Password::new(req.password))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
