pub mod one_time_code;
pub mod password;
pub mod validation;

pub use one_time_code::{OneTimeCode, TokenHash, CODE_ALPHABET};
pub use password::{
    dummy_verify, hash_password, password_matches, verify_password, Password, PasswordHashString,
};
pub use validation::ValidatedJson;
