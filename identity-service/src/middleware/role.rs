use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use super::auth::CurrentUser;
use crate::services::{IdentityService, ServiceError};

/// State for [`require_role`]: the minimum role a route demands.
#[derive(Clone)]
pub struct RoleGate {
    identity: IdentityService,
    required: String,
}

impl RoleGate {
    pub fn new(identity: IdentityService, required: impl Into<String>) -> Self {
        Self {
            identity,
            required: required.into(),
        }
    }
}

/// Lets the request through only if the authenticated user's role level is at
/// least the gate's. Must run after `auth_middleware`.
pub async fn require_role(
    State(gate): State<RoleGate>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let CurrentUser(user) = req
        .extensions()
        .get::<CurrentUser>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("user not found in request context")))?;

    let allowed = match gate.identity.check_role_precedence(&user, &gate.required).await {
        Ok(allowed) => allowed,
        Err(ServiceError::NotFound(_)) => {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "gate role '{}' does not exist",
                gate.required
            )));
        }
        Err(e) => {
            tracing::error!(required = %gate.required, error = %e, "role lookup failed");
            return Err(e.into());
        }
    };

    if !allowed {
        tracing::warn!(
            user_id = %user.user_id,
            role = %user.role_name,
            required = %gate.required,
            "insufficient role"
        );
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "your account does not have the necessary permissions to access this resource"
        )));
    }

    Ok(next.run(req).await)
}
