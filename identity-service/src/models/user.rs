use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::Role;

/// User account as stored. `role_name` and `role_level` are joined from `roles`.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub identity_document: String,
    pub password_hash: Vec<u8>,
    pub birth_date: Option<NaiveDate>,
    pub profile_picture_url: Option<String>,
    pub is_validated: bool,
    pub role_id: Uuid,
    #[sqlx(default)]
    pub role_name: String,
    #[sqlx(default)]
    pub role_level: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Profile fields supplied at registration.
#[derive(Debug, Clone)]
pub struct NewUserProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub identity_document: String,
    pub birth_date: Option<NaiveDate>,
}

impl User {
    /// A fresh, unvalidated account holding `role`.
    pub fn new(profile: NewUserProfile, password_hash: Vec<u8>, role: &Role) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            first_name: profile.first_name,
            last_name: profile.last_name,
            email: normalize_email(&profile.email),
            phone: profile.phone,
            identity_document: profile.identity_document,
            password_hash,
            birth_date: profile.birth_date,
            profile_picture_url: None,
            is_validated: false,
            role_id: role.role_id,
            role_name: role.name.clone(),
            role_level: role.level,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self)
    }
}

/// Emails are compared case-insensitively; they are stored lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User as returned by the API. Never carries the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub profile_picture_url: Option<String>,
    pub is_validated: bool,
    pub role: String,
    pub role_level: i16,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            birth_date: user.birth_date,
            profile_picture_url: user.profile_picture_url.clone(),
            is_validated: user.is_validated,
            role: user.role_name.clone(),
            role_level: user.role_level,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_is_unvalidated_with_normalized_email() {
        let role = Role::new("client", 1, None);
        let user = User::new(
            NewUserProfile {
                first_name: "Ana".to_string(),
                last_name: "Silva".to_string(),
                email: "  Ana.Silva@Example.COM ".to_string(),
                phone: None,
                identity_document: "12345678".to_string(),
                birth_date: None,
            },
            b"hash".to_vec(),
            &role,
        );

        assert!(!user.is_validated);
        assert_eq!(user.email, "ana.silva@example.com");
        assert_eq!(user.role_id, role.role_id);
        assert_eq!(user.role_level, 1);
    }

    #[test]
    fn sanitized_user_omits_password_hash() {
        let role = Role::new("client", 1, None);
        let user = User::new(
            NewUserProfile {
                first_name: "Ana".to_string(),
                last_name: "Silva".to_string(),
                email: "ana@example.com".to_string(),
                phone: None,
                identity_document: "1".to_string(),
                birth_date: None,
            },
            b"secret-hash".to_vec(),
            &role,
        );

        let json = serde_json::to_value(user.sanitized()).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "client");
    }
}
