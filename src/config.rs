use std::env;

use chrono::Duration;

use crate::error::{AuthError, AuthResult};

/// Authorization endpoint of the music service account system
pub const DEFAULT_AUTHORIZE_ENDPOINT: &str = "https://accounts.spotify.com/authorize";

/// Token endpoint used for both code exchange and refresh grants
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://accounts.spotify.com/api/token";

/// Base URL for resource API calls
pub const DEFAULT_API_BASE: &str = "https://api.spotify.com";

/// Custom-scheme redirect target registered for the mobile client
pub const DEFAULT_REDIRECT_URI: &str = "resona://oauth";

/// Environment variable name for the OAuth client id
pub const CLIENT_ID_ENV: &str = "RESONA_CLIENT_ID";

/// Safety margin subtracted from a token's expiry so it cannot expire mid-request
const DEFAULT_REFRESH_SKEW_SECS: i64 = 60;

/// The fixed scope set the client requests
pub fn default_scopes() -> Vec<String> {
    [
        "user-read-email",
        "user-library-read",
        "user-read-recently-played",
        "user-top-read",
        "playlist-read-private",
        "playlist-read-collaborative",
        "playlist-modify-public",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Configuration for the credential lifecycle manager
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OAuth client identifier
    pub client_id: String,
    /// Redirect URI handed to the authorization endpoint
    pub redirect_uri: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Authorization (consent) endpoint
    pub authorize_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// Base URL for resource API calls
    pub api_base: String,
    /// Expiry margin that triggers an early refresh
    pub refresh_skew: Duration,
}

impl AuthConfig {
    /// Create a configuration with the service defaults
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: default_scopes(),
            authorize_endpoint: DEFAULT_AUTHORIZE_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            refresh_skew: Duration::seconds(DEFAULT_REFRESH_SKEW_SECS),
        }
    }

    /// Create a configuration from the environment
    pub fn from_env() -> AuthResult<Self> {
        match env::var(CLIENT_ID_ENV) {
            Ok(client_id) if !client_id.is_empty() => Ok(Self::new(client_id)),
            Ok(_) => Err(AuthError::internal(format!(
                "{CLIENT_ID_ENV} environment variable is empty"
            ))),
            Err(_) => Err(AuthError::internal(format!(
                "{CLIENT_ID_ENV} environment variable is not set"
            ))),
        }
    }

    /// Space-joined scope parameter for the authorize URL
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }
}
