//! Role model - named access levels ordered by precedence.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Role entity. Higher `level` means more privilege.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Role {
    pub role_id: Uuid,
    pub name: String,
    pub level: i16,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: impl Into<String>, level: i16, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            role_id: Uuid::new_v4(),
            name: name.into(),
            level,
            description,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a holder of a role at `level` may act where this role is required.
    pub fn admits(&self, level: i16) -> bool {
        level >= self.level
    }
}

/// Roles seeded by the initial migration, mirrored for in-memory setups.
pub fn default_roles() -> Vec<Role> {
    [
        ("client", 1),
        ("trainer", 2),
        ("receptionist", 3),
        ("branch_admin", 4),
        ("super_admin", 5),
    ]
    .into_iter()
    .map(|(name, level)| Role::new(name, level, None))
    .collect()
}
