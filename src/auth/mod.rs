// Authentication module
// Credential storage and single-flight token refresh

mod coordinator;
mod refresh;
mod store;
mod types;

pub use coordinator::{RefreshCoordinator, RefreshState};
pub use store::CredentialStore;
pub use types::{AuthState, Credential, RefreshMode, TokenData};

pub(crate) use types::{LoginRequest, LoginResponse};
