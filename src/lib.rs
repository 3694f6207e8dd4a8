pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod http;

// Re-export core components
pub use crate::api::{ProfileClient, UserProfile};
pub use crate::auth::credential::{AuthEvent, Credential, SessionState};
pub use crate::auth::flow::{
    AuthorizationFlow, ConsentOutcome, PkceAuthorizationFlow, UserConsent,
};
pub use crate::auth::pkce::PkcePair;
pub use crate::auth::refresh::RefreshCoordinator;
pub use crate::auth::session::AuthSessionController;
pub use crate::auth::storage::{CredentialStore, JsonFileStore, KeyValueStore, MemoryStore};
pub use crate::config::AuthConfig;
pub use crate::error::{AuthError, AuthResult};
pub use crate::events::{EventStream, Subscriber};
pub use crate::http::{HttpClient, HttpResponse, ReqwestHttpClient};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
