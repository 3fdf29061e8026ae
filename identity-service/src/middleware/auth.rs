use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::{models::User, AppState};

/// The authenticated user, placed in request extensions by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Requires `Authorization: Bearer <token>` naming a live user.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())?.to_string();

    let user = state.identity.current_user(&token).await?;

    req.extensions_mut().insert(CurrentUser(user));

    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("missing authorization header")))?;

    let malformed = || AppError::Unauthorized(anyhow::anyhow!("authorization header is malformed"));

    let value = value.to_str().map_err(|_| malformed())?;
    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(malformed()),
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("user not found in request context")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn accepts_well_formed_bearer() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn rejects_malformed_headers() {
        for value in ["abc.def.ghi", "Basic abc", "Bearer", "Bearer ", "Bearer a b", "bearer abc"] {
            assert!(bearer_token(&headers(value)).is_err(), "accepted {value:?}");
        }
    }

    #[test]
    fn rejects_missing_header() {
        assert!(bearer_token(&HeaderMap::new()).is_err());
    }
}
