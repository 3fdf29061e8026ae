//! In-process identity store used by tests and local runs without PostgreSQL.
//!
//! All tables sit behind one mutex, so each operation observes and mutates a
//! consistent snapshot, matching the transactional behaviour of the SQL store.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard,
};
use uuid::Uuid;

use super::credential_store::CredentialStore;
use super::error::ServiceError;
use super::role_directory::RoleDirectory;
use crate::models::{default_roles, OneTimeToken, Role, User};
use crate::utils::{OneTimeCode, TokenHash};

#[derive(Default)]
struct Tables {
    roles: HashMap<String, Role>,
    users: HashMap<Uuid, User>,
    invitations: Vec<OneTimeToken>,
    password_resets: Vec<OneTimeToken>,
}

impl Tables {
    fn check_unique(&self, user: &User) -> Result<(), ServiceError> {
        for existing in self.users.values() {
            if existing.user_id == user.user_id {
                continue;
            }
            if existing.email == user.email {
                return Err(ServiceError::Conflict(
                    "a user with that email already exists".into(),
                ));
            }
            if existing.identity_document == user.identity_document {
                return Err(ServiceError::Conflict(
                    "a user with that identity document already exists".into(),
                ));
            }
        }
        Ok(())
    }

    fn with_role(&self, mut user: User) -> User {
        if let Some(role) = self.roles.values().find(|r| r.role_id == user.role_id) {
            user.role_name = role.name.clone();
            user.role_level = role.level;
        }
        user
    }

    fn live_token(tokens: &[OneTimeToken], hash: &TokenHash) -> Option<Uuid> {
        let now = Utc::now();
        tokens
            .iter()
            .find(|t| t.token == hash.as_str() && t.is_live_at(now))
            .map(|t| t.user_id)
    }
}

#[derive(Default)]
pub struct InMemoryIdentityStore {
    tables: Mutex<Tables>,
    fail_deletes: AtomicBool,
}

impl InMemoryIdentityStore {
    /// A store holding the standard role catalogue and no users.
    pub fn with_default_roles() -> Self {
        let store = Self::default();
        for role in default_roles() {
            store.insert_role(role);
        }
        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, ServiceError> {
        self.tables
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow!("identity store mutex poisoned: {}", e)))
    }

    pub fn insert_role(&self, role: Role) {
        if let Ok(mut tables) = self.lock() {
            tables.roles.insert(role.name.clone(), role);
        }
    }

    /// Makes `delete_user_cascade` fail, to exercise compensation failures.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Any user with this email, regardless of validation or deletion.
    pub fn find_user_by_email(&self, email: &str) -> Option<User> {
        let tables = self.lock().ok()?;
        tables
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .map(|u| tables.with_role(u))
    }

    pub fn user_count(&self) -> usize {
        self.lock().map(|t| t.users.len()).unwrap_or(0)
    }

    pub fn invitations_for(&self, user_id: Uuid) -> Vec<OneTimeToken> {
        self.lock()
            .map(|t| {
                t.invitations
                    .iter()
                    .filter(|i| i.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn password_resets_for(&self, user_id: Uuid) -> Vec<OneTimeToken> {
        self.lock()
            .map(|t| {
                t.password_resets
                    .iter()
                    .filter(|r| r.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryIdentityStore {
    async fn create_user(&self, user: &User) -> Result<(), ServiceError> {
        let mut tables = self.lock()?;
        tables.check_unique(user)?;
        tables.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn create_user_and_invite(
        &self,
        user: &User,
        token: &TokenHash,
        ttl: Duration,
    ) -> Result<(), ServiceError> {
        let mut tables = self.lock()?;
        tables.check_unique(user)?;
        tables.users.insert(user.user_id, user.clone());
        tables.invitations.push(OneTimeToken {
            token: token.as_str().to_string(),
            user_id: user.user_id,
            expiry: Utc::now() + ttl,
        });
        Ok(())
    }

    async fn activate(&self, code: &OneTimeCode) -> Result<Uuid, ServiceError> {
        let hash = code.hash();
        let mut tables = self.lock()?;
        let user_id = Tables::live_token(&tables.invitations, &hash)
            .ok_or_else(|| ServiceError::not_found("activation code not found or expired"))?;

        let user = tables
            .users
            .get_mut(&user_id)
            .filter(|u| u.is_active())
            .ok_or_else(|| ServiceError::not_found("activation code not found or expired"))?;
        user.is_validated = true;
        user.updated_at = Utc::now();

        tables.invitations.retain(|i| i.user_id != user_id);
        Ok(user_id)
    }

    async fn get_by_email(&self, email: &str) -> Result<User, ServiceError> {
        let tables = self.lock()?;
        let user = tables
            .users
            .values()
            .find(|u| u.email == email && u.is_validated && u.is_active())
            .cloned()
            .ok_or_else(|| ServiceError::not_found("user not found"))?;
        Ok(tables.with_role(user))
    }

    async fn get_by_id(&self, user_id: Uuid) -> Result<User, ServiceError> {
        let tables = self.lock()?;
        let user = tables
            .users
            .get(&user_id)
            .filter(|u| u.is_active())
            .cloned()
            .ok_or_else(|| ServiceError::not_found("user not found"))?;
        Ok(tables.with_role(user))
    }

    async fn update(&self, user: &User) -> Result<(), ServiceError> {
        let mut tables = self.lock()?;
        tables.check_unique(user)?;
        let mut updated = user.clone();
        updated.updated_at = Utc::now();
        tables.users.insert(user.user_id, updated);
        Ok(())
    }

    async fn delete_user_cascade(&self, user_id: Uuid) -> Result<(), ServiceError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ServiceError::Internal(anyhow!("delete rejected by test hook")));
        }
        let mut tables = self.lock()?;
        tables.invitations.retain(|i| i.user_id != user_id);
        tables.password_resets.retain(|r| r.user_id != user_id);
        tables.users.remove(&user_id);
        Ok(())
    }

    async fn create_password_reset_token(
        &self,
        user_id: Uuid,
        token: &TokenHash,
        ttl: Duration,
    ) -> Result<(), ServiceError> {
        let mut tables = self.lock()?;
        if !tables.users.contains_key(&user_id) {
            return Err(ServiceError::Internal(anyhow!(
                "reset token references unknown user {}",
                user_id
            )));
        }
        tables.password_resets.push(OneTimeToken {
            token: token.as_str().to_string(),
            user_id,
            expiry: Utc::now() + ttl,
        });
        Ok(())
    }

    async fn delete_password_reset_tokens(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let mut tables = self.lock()?;
        tables.password_resets.retain(|r| r.user_id != user_id);
        Ok(())
    }

    async fn reset_password(
        &self,
        code: &OneTimeCode,
        new_password_hash: Vec<u8>,
    ) -> Result<Uuid, ServiceError> {
        let hash = code.hash();
        let mut tables = self.lock()?;
        let user_id = Tables::live_token(&tables.password_resets, &hash)
            .ok_or_else(|| ServiceError::not_found("reset code not found or expired"))?;

        if let Some(user) = tables.users.get_mut(&user_id).filter(|u| u.is_active()) {
            user.password_hash = new_password_hash;
            user.updated_at = Utc::now();
        }

        tables.password_resets.retain(|r| r.user_id != user_id);
        Ok(user_id)
    }

    async fn purge_expired(&self) -> Result<u64, ServiceError> {
        let now = Utc::now();
        let mut tables = self.lock()?;
        let before = tables.invitations.len() + tables.password_resets.len();
        tables.invitations.retain(|i| i.is_live_at(now));
        tables.password_resets.retain(|r| r.is_live_at(now));
        let after = tables.invitations.len() + tables.password_resets.len();
        Ok((before - after) as u64)
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        self.lock().map(|_| ())
    }
}

#[async_trait]
impl RoleDirectory for InMemoryIdentityStore {
    async fn get_by_name(&self, name: &str) -> Result<Role, ServiceError> {
        self.lock()?
            .roles
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("role '{}' not found", name)))
    }
}
