use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::http::HttpClient;

/// Current user's profile, the subset of fields the client renders
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    /// Service-assigned user id
    pub id: String,
    /// Display name, if the user set one
    #[serde(default)]
    pub display_name: Option<String>,
    /// Account email address
    #[serde(default)]
    pub email: Option<String>,
}

/// Resource client for profile lookups.
///
/// Pass-through glue over the REST API: it consumes bearer tokens produced by
/// the credential manager and owns no auth decisions of its own. Transport
/// failures are retried a couple of times with backoff before surfacing.
pub struct ProfileClient {
    api_base: String,
    http: Arc<dyn HttpClient>,
}

impl ProfileClient {
    /// Create a client for the configured API base
    pub fn new(config: &AuthConfig, http: Arc<dyn HttpClient>) -> Self {
        Self {
            api_base: config.api_base.clone(),
            http,
        }
    }

    /// Fetch the profile of the user the access token belongs to
    pub async fn current_profile(&self, access_token: &str) -> AuthResult<UserProfile> {
        let url = format!("{}/v1/me", self.api_base);
        debug!(url = %url, "fetching current user profile");

        let strategy = ExponentialBackoff::from_millis(50).take(2);
        let response = Retry::spawn(strategy, || async {
            let mut headers = HashMap::new();
            headers.insert(
                "Authorization".to_string(),
                format!("Bearer {access_token}"),
            );
            self.http.get(&url, headers).await
        })
        .await
        .map_err(|err| AuthError::network("profile_fetch", err))?;

        if response.status() == 401 {
            return Err(AuthError::Unauthenticated);
        }
        if !response.is_success() {
            return Err(AuthError::network(
                "profile_fetch",
                format!("HTTP {}", response.status()),
            ));
        }

        response
            .json()
            .map_err(|err| AuthError::network("profile_fetch", err))
    }
}
