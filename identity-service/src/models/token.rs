//! One-time tokens: account invitations and password resets.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Stored form of a one-time code. `token` is the hex SHA-256 digest, never the code.
#[derive(Debug, Clone, FromRow)]
pub struct OneTimeToken {
    pub token: String,
    pub user_id: Uuid,
    pub expiry: DateTime<Utc>,
}

impl OneTimeToken {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry > now
    }
}
