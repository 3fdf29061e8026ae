use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ServiceError;

/// Signed bearer token issuance and verification.
pub trait Authenticator: Send + Sync {
    fn issue(
        &self,
        subject: Uuid,
        ttl: Duration,
        issuer: &str,
        audience: &str,
    ) -> Result<String, ServiceError>;

    /// Checks signature, algorithm, issuer, audience, `nbf` and `exp`.
    /// Any failure is `Unauthorized`.
    fn verify(&self, token: &str) -> Result<Claims, ServiceError>;
}

/// Registered claims carried by every access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Not before (Unix timestamp)
    pub nbf: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

impl Claims {
    pub fn new(subject: Uuid, ttl: Duration, issuer: &str, audience: &str) -> Self {
        let now = Utc::now();
        Self {
            sub: subject.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + ttl).timestamp(),
            iss: issuer.to_string(),
            aud: audience.to_string(),
        }
    }

    pub fn subject(&self) -> Result<Uuid, ServiceError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| ServiceError::unauthorized("token subject is not a valid user id"))
    }
}

/// HMAC-SHA256 JWTs bound to one issuer and audience.
#[derive(Clone)]
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &[u8], issuer: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["sub", "exp", "nbf", "iss", "aud"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Signs arbitrary claims with this authenticator's key.
    pub fn sign(&self, claims: &Claims) -> Result<String, ServiceError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to sign token: {}", e)))
    }
}

impl Authenticator for JwtAuthenticator {
    fn issue(
        &self,
        subject: Uuid,
        ttl: Duration,
        issuer: &str,
        audience: &str,
    ) -> Result<String, ServiceError> {
        self.sign(&Claims::new(subject, ttl, issuer, audience))
    }

    fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "token rejected");
                ServiceError::unauthorized("invalid or expired token")
            })?
            .claims;

        // The library accepts exp == now; a token is valid only strictly before exp.
        let now = Utc::now().timestamp();
        if claims.exp <= now || claims.nbf > now {
            return Err(ServiceError::unauthorized("invalid or expired token"));
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-key-with-enough-bytes!!";

    fn authenticator() -> JwtAuthenticator {
        JwtAuthenticator::new(SECRET, "gym", "gym")
    }

    #[test]
    fn issued_token_verifies_to_subject() -> Result<(), anyhow::Error> {
        let auth = authenticator();
        let user_id = Uuid::new_v4();

        let token = auth.issue(user_id, Duration::hours(72), "gym", "gym")?;
        let claims = auth.verify(&token)?;

        assert_eq!(claims.subject()?, user_id);
        assert_eq!(claims.exp - claims.iat, 72 * 3600);
        assert_eq!(claims.nbf, claims.iat);
        Ok(())
    }

    #[test]
    fn token_carries_exactly_the_registered_claims() -> Result<(), anyhow::Error> {
        let auth = authenticator();
        let token = auth.issue(Uuid::new_v4(), Duration::hours(1), "gym", "gym")?;

        let mut insecure = Validation::new(Algorithm::HS256);
        insecure.insecure_disable_signature_validation();
        insecure.validate_aud = false;
        let payload = decode::<serde_json::Value>(&token, &DecodingKey::from_secret(b""), &insecure)?;

        let mut keys: Vec<_> = payload
            .claims
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        assert_eq!(keys, vec!["aud", "exp", "iat", "iss", "nbf", "sub"]);
        Ok(())
    }

    #[test]
    fn expired_token_is_rejected() -> Result<(), anyhow::Error> {
        let auth = authenticator();
        let mut claims = Claims::new(Uuid::new_v4(), Duration::hours(1), "gym", "gym");
        claims.iat -= 7200;
        claims.nbf -= 7200;
        claims.exp = Utc::now().timestamp() - 1;

        let token = auth.sign(&claims)?;
        assert!(matches!(auth.verify(&token), Err(ServiceError::Unauthorized(_))));
        Ok(())
    }

    #[test]
    fn token_expiring_now_is_rejected() -> Result<(), anyhow::Error> {
        let auth = authenticator();
        let mut claims = Claims::new(Uuid::new_v4(), Duration::hours(1), "gym", "gym");
        claims.nbf -= 10;
        claims.exp = Utc::now().timestamp();

        let token = auth.sign(&claims)?;
        assert!(auth.verify(&token).is_err());
        Ok(())
    }

    #[test]
    fn not_yet_valid_token_is_rejected() -> Result<(), anyhow::Error> {
        let auth = authenticator();
        let mut claims = Claims::new(Uuid::new_v4(), Duration::hours(2), "gym", "gym");
        claims.nbf += 3600;

        let token = auth.sign(&claims)?;
        assert!(auth.verify(&token).is_err());
        Ok(())
    }

    #[test]
    fn wrong_audience_or_issuer_is_rejected() -> Result<(), anyhow::Error> {
        let auth = authenticator();

        let foreign_aud = auth.issue(Uuid::new_v4(), Duration::hours(1), "gym", "other")?;
        assert!(auth.verify(&foreign_aud).is_err());

        let foreign_iss = auth.issue(Uuid::new_v4(), Duration::hours(1), "other", "gym")?;
        assert!(auth.verify(&foreign_iss).is_err());
        Ok(())
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() -> Result<(), anyhow::Error> {
        let other = JwtAuthenticator::new(b"another-secret-entirely-0123456789", "gym", "gym");
        let token = other.issue(Uuid::new_v4(), Duration::hours(1), "gym", "gym")?;

        assert!(authenticator().verify(&token).is_err());
        Ok(())
    }

    #[test]
    fn garbage_is_rejected() {
        let auth = authenticator();
        for token in ["", "not-a-jwt", "a.b.c"] {
            assert!(matches!(auth.verify(token), Err(ServiceError::Unauthorized(_))));
        }
    }

    #[test]
    fn non_uuid_subject_is_unauthorized() {
        let mut claims = Claims::new(Uuid::new_v4(), Duration::hours(1), "gym", "gym");
        claims.sub = "admin".to_string();
        assert!(matches!(claims.subject(), Err(ServiceError::Unauthorized(_))));
    }
}
