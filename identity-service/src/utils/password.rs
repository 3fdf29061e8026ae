use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::{fmt, sync::OnceLock};

/// Plaintext password. Debug output is redacted.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password([redacted])")
    }
}

/// Argon2id hash in PHC string form.
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    /// Reads a hash stored as raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, anyhow::Error> {
        let hash = std::str::from_utf8(bytes)
            .map_err(|e| anyhow::anyhow!("Stored password hash is not valid UTF-8: {}", e))?;
        Ok(Self(hash.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0.into_bytes()
    }
}

/// Hash a password using Argon2id with a fresh random salt.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let argon2 = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = argon2
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// Verify a password against a hash. Returns Ok(()) on match.
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<(), anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed_hash)
        .map_err(|_| anyhow::anyhow!("Password verification failed"))
}

/// Checks `password` against a stored hash, treating unreadable hashes as a mismatch.
pub fn password_matches(password: &Password, stored: &[u8]) -> bool {
    match PasswordHashString::from_bytes(stored) {
        Ok(hash) => verify_password(password, &hash).is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "stored password hash is unreadable");
            false
        }
    }
}

static DUMMY_HASH: OnceLock<Option<PasswordHashString>> = OnceLock::new();

/// Spends the same work as a real verification when there is no account to check,
/// so response timing does not reveal which emails are registered.
pub fn dummy_verify(password: &Password) {
    let dummy = DUMMY_HASH.get_or_init(|| {
        hash_password(&Password::new("dummy-password-for-timing".to_string())).ok()
    });
    if let Some(hash) = dummy {
        let _ = verify_password(password, hash);
    }
}
