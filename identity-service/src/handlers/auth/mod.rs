pub mod password;
pub mod registration;
pub mod session;

pub use password::{forgot_password, reset_password};
pub use registration::{activate, register, register_staff};
pub use session::login;
