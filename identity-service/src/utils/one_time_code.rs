//! Short human-typeable codes for account activation and password reset.
//!
//! Only the SHA-256 digest of a code is ever stored. The plaintext leaves the
//! process once, inside the notification sent to the user.

use rand::{rngs::OsRng, Rng};
use sha2::{Digest, Sha256};
use std::fmt;

pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Plaintext one-time code. Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct OneTimeCode(String);

impl OneTimeCode {
    /// Draws `length` symbols uniformly from [`CODE_ALPHABET`] using the OS CSPRNG.
    pub fn generate(length: usize) -> Self {
        let mut rng = OsRng;
        let code = (0..length)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Wraps a code typed by a user. Surrounding whitespace is dropped and
    /// letters are uppercased so `ab12c` and `AB12C` are the same code.
    pub fn from_input(input: &str) -> Self {
        Self(input.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> TokenHash {
        TokenHash::of(self)
    }
}

impl fmt::Debug for OneTimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OneTimeCode([redacted; {}])", self.0.len())
    }
}

/// Lowercase hex SHA-256 of a code; the only form that reaches storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenHash(String);

impl TokenHash {
    pub fn of(code: &OneTimeCode) -> Self {
        Self(hex::encode(Sha256::digest(code.as_str().as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_uses_alphabet_and_length() {
        for length in [4, 5, 6, 12] {
            let code = OneTimeCode::generate(length);
            assert_eq!(code.as_str().len(), length);
            assert!(code.as_str().bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn hash_is_lowercase_hex_sha256() {
        let code = OneTimeCode::from_input("ABC12");
        let hash = TokenHash::of(&code);

        assert_eq!(hash.as_str().len(), 64);
        assert_eq!(hash.as_str(), hex::encode(Sha256::digest(b"ABC12")));
        assert!(hash
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn user_input_is_normalized() {
        assert_eq!(
            OneTimeCode::from_input(" ab12c ").hash(),
            OneTimeCode::from_input("AB12C").hash()
        );
    }

    #[test]
    fn debug_does_not_leak_code() {
        let code = OneTimeCode::from_input("SECRET");
        assert!(!format!("{:?}", code).contains("SECRET"));
    }
}
