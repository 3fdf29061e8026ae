pub mod auth;
pub mod role;

pub use auth::{auth_middleware, CurrentUser};
pub use role::{require_role, RoleGate};
