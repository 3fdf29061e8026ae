use axum::Json;

use crate::{middleware::CurrentUser, models::UserResponse};

/// The authenticated user's own profile.
pub async fn whoami(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(user.sanitized())
}
