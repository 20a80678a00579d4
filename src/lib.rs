// Club Client - authenticated access to the club site backend

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod session;

pub use auth::{AuthState, Credential, CredentialStore, RefreshCoordinator, RefreshMode, RefreshState};
pub use error::{ClientError, RefreshError};
pub use http_client::{AuthClient, MultipartBody, RequestBody, RequestOptions};
