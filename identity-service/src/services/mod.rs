pub mod credential_store;
pub mod error;
pub mod identity;
pub mod memory_store;
pub mod notifier;
pub mod role_directory;
pub mod token;

pub use credential_store::{CredentialStore, PgCredentialStore};
pub use error::ServiceError;
pub use identity::{
    IdentityService, IdentitySettings, Registration, RegistrationReceipt, Session, CLIENT_ROLE,
};
pub use memory_store::InMemoryIdentityStore;
pub use notifier::{
    DeliveryStatus, MockNotifier, Notification, Notifier, NotifierError, SmtpNotifier, Template,
};
pub use role_directory::{PgRoleDirectory, RoleDirectory};
pub use token::{Authenticator, Claims, JwtAuthenticator};
