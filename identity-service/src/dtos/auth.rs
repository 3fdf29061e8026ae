use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::NewUserProfile;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100, message = "first_name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "last_name is required"))]
    pub last_name: String,
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 50, message = "identity_document is required"))]
    pub identity_document: String,
    #[validate(length(min = 8, max = 128, message = "must be between 8 and 128 characters"))]
    pub password: String,
    /// ISO 8601 calendar date, e.g. `1990-05-17`.
    pub birth_date: Option<NaiveDate>,
}

impl RegisterRequest {
    pub fn profile(&self) -> NewUserProfile {
        NewUserProfile {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.clone(),
            phone: self.phone.clone().filter(|p| !p.trim().is_empty()),
            identity_document: self.identity_document.trim().to_string(),
            birth_date: self.birth_date,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct StaffRegisterRequest {
    #[serde(flatten)]
    #[validate(nested)]
    pub user: RegisterRequest,
    #[validate(length(min = 1, max = 50, message = "role is required"))]
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user_id: Uuid,
    pub status: u16,
    /// Plaintext activation code, echoed only outside production.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ActivateRequest {
    #[validate(length(min = 4, max = 12))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 4, max = 12))]
    pub code: String,
    #[validate(length(min = 8, max = 128, message = "must be between 8 and 128 characters"))]
    pub password: String,
}
