//! Account lifecycle: registration, activation, login, and password reset.
//!
//! Registration is a short saga. The role is resolved, then the user and its
//! invitation are written in one transaction, then the activation code is
//! sent. If sending fails the written rows are deleted again before the
//! failure is reported, so no user is left behind who can never activate.

use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use tracing::{instrument, Instrument};
use uuid::Uuid;

use super::credential_store::CredentialStore;
use super::error::ServiceError;
use super::notifier::{DeliveryStatus, Notification, Notifier, NotifierError, Template};
use super::role_directory::RoleDirectory;
use super::token::Authenticator;
use crate::config::IdentityConfig;
use crate::models::{normalize_email, NewUserProfile, User};
use crate::utils::{dummy_verify, hash_password, password_matches, OneTimeCode, Password};

pub const CLIENT_ROLE: &str = "client";

#[derive(Debug, Clone)]
pub struct IdentitySettings {
    pub activation_code_length: usize,
    pub reset_code_length: usize,
    pub invitation_ttl: Duration,
    pub password_reset_ttl: Duration,
    pub token_ttl: Duration,
    pub token_issuer: String,
    pub token_audience: String,
    /// Notifications go to the plain, unauthenticated sandbox relay.
    pub sandbox: bool,
}

impl IdentitySettings {
    pub fn from_config(config: &IdentityConfig) -> Self {
        Self {
            activation_code_length: config.codes.activation_code_length,
            reset_code_length: config.codes.reset_code_length,
            invitation_ttl: Duration::hours(config.codes.invitation_expiry_hours),
            password_reset_ttl: Duration::hours(config.codes.password_reset_expiry_hours),
            token_ttl: Duration::hours(config.token.expiry_hours),
            token_issuer: config.token.issuer.clone(),
            token_audience: config.token.audience.clone(),
            sandbox: !config.is_prod(),
        }
    }
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            activation_code_length: 5,
            reset_code_length: 6,
            invitation_ttl: Duration::hours(72),
            password_reset_ttl: Duration::hours(72),
            token_ttl: Duration::hours(72),
            token_issuer: "identity-service".to_string(),
            token_audience: "identity-service".to_string(),
            sandbox: true,
        }
    }
}

/// Everything needed to open an account.
#[derive(Debug, Clone)]
pub struct Registration {
    pub profile: NewUserProfile,
    pub password: Password,
}

/// Result of a successful registration. `code` is the plaintext activation code.
#[derive(Debug, Clone)]
pub struct RegistrationReceipt {
    pub user_id: Uuid,
    pub status: DeliveryStatus,
    pub code: OneTimeCode,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn CredentialStore>,
    roles: Arc<dyn RoleDirectory>,
    authenticator: Arc<dyn Authenticator>,
    notifier: Arc<dyn Notifier>,
    settings: IdentitySettings,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        roles: Arc<dyn RoleDirectory>,
        authenticator: Arc<dyn Authenticator>,
        notifier: Arc<dyn Notifier>,
        settings: IdentitySettings,
    ) -> Self {
        Self {
            store,
            roles,
            authenticator,
            notifier,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn settings(&self) -> &IdentitySettings {
        &self.settings
    }

    // ==================== Registration ====================

    /// Self-service registration; the account gets the `client` role.
    pub async fn register_client(
        &self,
        registration: Registration,
    ) -> Result<RegistrationReceipt, ServiceError> {
        self.register(registration, CLIENT_ROLE).await
    }

    /// Registration of an account with an explicit role, on behalf of staff.
    pub async fn register_staff(
        &self,
        registration: Registration,
        role_name: &str,
    ) -> Result<RegistrationReceipt, ServiceError> {
        self.register(registration, role_name).await
    }

    #[instrument(skip(self, registration))]
    async fn register(
        &self,
        registration: Registration,
        role_name: &str,
    ) -> Result<RegistrationReceipt, ServiceError> {
        let role = self.roles.get_by_name(role_name).await?;

        let password_hash = hash_blocking(registration.password).await?;
        let user = User::new(registration.profile, password_hash, &role);
        let code = OneTimeCode::generate(self.settings.activation_code_length);

        self.store
            .create_user_and_invite(&user, &code.hash(), self.settings.invitation_ttl)
            .await?;

        let notification = Notification {
            template: Template::UserWelcome,
            recipient_name: user.display_name(),
            recipient_email: user.email.clone(),
            data: json!({ "username": user.first_name, "code": code.as_str() }),
            sandbox: self.settings.sandbox,
        };

        match self.notifier.send(notification).await {
            Ok(status) => {
                metrics::counter!("identity_registrations_total", "role" => role.name.clone())
                    .increment(1);
                tracing::info!(user_id = %user.user_id, role = %role.name, "user registered");
                Ok(RegistrationReceipt {
                    user_id: user.user_id,
                    status,
                    code,
                })
            }
            Err(err) => {
                self.compensate_registration(user.user_id, &err).await;
                Err(ServiceError::Internal(
                    anyhow::Error::new(err).context("failed to send activation code"),
                ))
            }
        }
    }

    async fn compensate_registration(&self, user_id: Uuid, cause: &NotifierError) {
        tracing::error!(
            user_id = %user_id,
            error = %cause,
            "activation notification failed, removing registration"
        );

        match self.store.delete_user_cascade(user_id).await {
            Ok(()) => {
                metrics::counter!("identity_registration_compensations_total", "outcome" => "applied")
                    .increment(1);
            }
            Err(delete_err) => {
                // The user row may now exist without a delivered code.
                tracing::error!(
                    user_id = %user_id,
                    error = %delete_err,
                    notification_error = %cause,
                    "compensation failed, registration left behind"
                );
                metrics::counter!("identity_registration_compensations_total", "outcome" => "failed")
                    .increment(1);
            }
        }
    }

    /// Redeems an activation code.
    #[instrument(skip_all)]
    pub async fn activate(&self, code: &str) -> Result<Uuid, ServiceError> {
        let user_id = self.store.activate(&OneTimeCode::from_input(code)).await?;
        tracing::info!(user_id = %user_id, "user activated");
        Ok(user_id)
    }

    // ==================== Sessions ====================

    /// Exchanges credentials of an activated account for a bearer token.
    ///
    /// An unknown or unactivated email is `NotFound`; a wrong password is `Unauthorized`.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: Password) -> Result<Session, ServiceError> {
        let email = normalize_email(email);

        let user = match self.store.get_by_email(&email).await {
            Ok(user) => user,
            Err(ServiceError::NotFound(msg)) => {
                run_blocking(move || dummy_verify(&password)).await?;
                return Err(ServiceError::NotFound(msg));
            }
            Err(e) => return Err(e),
        };

        let stored = user.password_hash.clone();
        let matches = run_blocking(move || password_matches(&password, &stored)).await?;
        if !matches {
            tracing::warn!(user_id = %user.user_id, "login rejected: wrong password");
            return Err(ServiceError::unauthorized("invalid credentials"));
        }

        let token = self.authenticator.issue(
            user.user_id,
            self.settings.token_ttl,
            &self.settings.token_issuer,
            &self.settings.token_audience,
        )?;

        Ok(Session {
            token,
            expires_in: self.settings.token_ttl.num_seconds(),
        })
    }

    /// Resolves a bearer token to the live user it names. Every failure is `Unauthorized`.
    pub async fn current_user(&self, token: &str) -> Result<User, ServiceError> {
        let claims = self.authenticator.verify(token)?;
        let user_id = claims.subject()?;

        self.store.get_by_id(user_id).await.map_err(|e| match e {
            ServiceError::NotFound(_) => ServiceError::unauthorized("user no longer exists"),
            other => {
                tracing::error!(user_id = %user_id, error = %other, "failed to load token subject");
                ServiceError::unauthorized("unable to authenticate user")
            }
        })
    }

    /// Whether `user` holds a role at least as high as `role_name`.
    pub async fn check_role_precedence(
        &self,
        user: &User,
        role_name: &str,
    ) -> Result<bool, ServiceError> {
        let required = self.roles.get_by_name(role_name).await?;
        Ok(required.admits(user.role_level))
    }

    // ==================== Password Reset ====================

    /// Sends a reset code to an activated account. On delivery failure the
    /// code is withdrawn and the failure is returned.
    #[instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> Result<DeliveryStatus, ServiceError> {
        let user = self.store.get_by_email(&normalize_email(email)).await?;
        let code = OneTimeCode::generate(self.settings.reset_code_length);

        self.store
            .create_password_reset_token(user.user_id, &code.hash(), self.settings.password_reset_ttl)
            .await?;

        let notification = Notification {
            template: Template::PasswordReset,
            recipient_name: user.display_name(),
            recipient_email: user.email.clone(),
            data: json!({ "username": user.first_name, "code": code.as_str() }),
            sandbox: self.settings.sandbox,
        };

        match self.notifier.send(notification).await {
            Ok(status) => Ok(status),
            Err(err) => {
                tracing::error!(user_id = %user.user_id, error = %err, "password reset notification failed");
                if let Err(delete_err) = self.store.delete_password_reset_tokens(user.user_id).await {
                    tracing::error!(
                        user_id = %user.user_id,
                        error = %delete_err,
                        "failed to withdraw undelivered reset code"
                    );
                }
                Err(ServiceError::Internal(
                    anyhow::Error::new(err).context("failed to send password reset code"),
                ))
            }
        }
    }

    /// Runs `forgot_password` on a background task and logs its outcome.
    ///
    /// The caller returns before the account lookup, so response time is the
    /// same for known, unknown and undeliverable addresses.
    pub fn spawn_forgot_password(&self, email: String) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(
            async move {
                match service.forgot_password(&email).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {
                        tracing::info!("password reset requested for unknown or inactive account");
                    }
                    Err(e) if e.is_notification_failure() => {
                        tracing::error!(error = %e, "password reset code could not be delivered");
                    }
                    Err(e) => tracing::error!(error = %e, "password reset request failed"),
                }
            }
            .in_current_span(),
        )
    }

    /// Redeems a reset code and stores the new password.
    #[instrument(skip_all)]
    pub async fn reset_password(&self, code: &str, new_password: Password) -> Result<(), ServiceError> {
        let password_hash = hash_blocking(new_password).await?;
        let user_id = self
            .store
            .reset_password(&OneTimeCode::from_input(code), password_hash)
            .await?;
        tracing::info!(user_id = %user_id, "password reset");
        Ok(())
    }

    /// Removes expired invitations and reset codes.
    pub async fn purge_expired(&self) -> Result<u64, ServiceError> {
        self.store.purge_expired().await
    }

    /// Runs `purge_expired` on a fixed interval until the task is aborted.
    pub fn spawn_token_sweeper(&self, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match service.purge_expired().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(removed, "purged expired one-time codes"),
                    Err(e) => tracing::error!(error = %e, "failed to purge expired one-time codes"),
                }
            }
        })
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("blocking task failed: {}", e)))
}

async fn hash_blocking(password: Password) -> Result<Vec<u8>, ServiceError> {
    run_blocking(move || hash_password(&password))
        .await?
        .map(|hash| hash.into_bytes())
        .map_err(ServiceError::Internal)
}
