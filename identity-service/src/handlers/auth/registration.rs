use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{ActivateRequest, RegisterRequest, RegisterResponse, StaffRegisterRequest},
    middleware::CurrentUser,
    services::{Registration, RegistrationReceipt, ServiceError},
    utils::{Password, ValidatedJson},
    AppState,
};

fn created(state: &AppState, receipt: RegistrationReceipt) -> impl IntoResponse {
    let code = (!state.config.is_prod()).then(|| receipt.code.as_str().to_string());
    (
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "user created".to_string(),
            user_id: receipt.user_id,
            status: receipt.status.0,
            code,
        }),
    )
}

fn registration(req: &RegisterRequest) -> Registration {
    Registration {
        profile: req.profile(),
        password: Password::new(req.password.clone()),
    }
}

/// Self-service registration of a client account.
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state.identity.register_client(registration(&req)).await?;
    Ok(created(&state, receipt))
}

/// Registration of an account with an explicit role by an authorized staff member.
/// Staff cannot hand out a role above their own.
pub async fn register_staff(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ValidatedJson(req): ValidatedJson<StaffRegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let unknown_role = || AppError::BadRequest(anyhow::anyhow!("role '{}' does not exist", req.role));

    let may_grant = match state.identity.check_role_precedence(&actor, &req.role).await {
        Ok(may_grant) => may_grant,
        Err(ServiceError::NotFound(_)) => return Err(unknown_role()),
        Err(e) => return Err(e.into()),
    };
    if !may_grant {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "cannot assign a role above your own"
        )));
    }

    let receipt = match state
        .identity
        .register_staff(registration(&req.user), &req.role)
        .await
    {
        Ok(receipt) => receipt,
        Err(ServiceError::NotFound(_)) => return Err(unknown_role()),
        Err(e) => return Err(e.into()),
    };

    tracing::info!(
        actor = %actor.user_id,
        user_id = %receipt.user_id,
        role = %req.role,
        "staff registration"
    );
    Ok(created(&state, receipt))
}

/// Redeem an activation code.
pub async fn activate(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ActivateRequest>,
) -> Result<StatusCode, AppError> {
    state.identity.activate(&req.code).await?;
    Ok(StatusCode::NO_CONTENT)
}
