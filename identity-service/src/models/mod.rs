pub mod role;
pub mod token;
pub mod user;

pub use role::{default_roles, Role};
pub use token::OneTimeToken;
pub use user::{normalize_email, NewUserProfile, User, UserResponse};
