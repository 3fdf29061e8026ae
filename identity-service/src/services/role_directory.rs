use async_trait::async_trait;
use sqlx::postgres::PgPool;

use super::credential_store::{bounded, db_error};
use super::error::ServiceError;
use crate::models::Role;

/// Read access to the role catalogue.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    /// Exact-match lookup by name. Unknown names are `NotFound`.
    async fn get_by_name(&self, name: &str) -> Result<Role, ServiceError>;
}

#[derive(Clone)]
pub struct PgRoleDirectory {
    pool: PgPool,
}

impl PgRoleDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleDirectory for PgRoleDirectory {
    async fn get_by_name(&self, name: &str) -> Result<Role, ServiceError> {
        bounded("get role by name", async {
            sqlx::query_as::<_, Role>(
                "SELECT role_id, name, level, description, created_at, updated_at \
                 FROM roles WHERE name = $1",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get role by name"))?
            .ok_or_else(|| ServiceError::not_found(format!("role '{}' not found", name)))
        })
        .await
    }
}
