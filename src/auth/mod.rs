pub mod credential;
pub mod flow;
pub mod pkce;
pub mod refresh;
pub mod session;
pub mod storage;

pub use credential::{AuthEvent, Credential, SessionState};
pub use flow::{AuthorizationFlow, ConsentOutcome, PkceAuthorizationFlow, UserConsent};
pub use refresh::RefreshCoordinator;
pub use session::AuthSessionController;
pub use storage::{CredentialStore, JsonFileStore, KeyValueStore, MemoryStore};
