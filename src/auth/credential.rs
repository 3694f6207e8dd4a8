use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Credential triple produced by the token endpoint.
///
/// Owned by [`super::storage::CredentialStore`]; other components only see it
/// for the duration of a single operation and never cache it across awaits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token used for resource requests
    pub access_token: String,
    /// Token used to obtain new access tokens without re-running consent
    pub refresh_token: Option<String>,
    /// When the access token expires
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Create a new credential
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at,
        }
    }

    /// Check if the access token is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Check if the access token expires within the given margin
    pub fn expires_soon(&self, margin: Duration) -> bool {
        self.expires_at - Utc::now() <= margin
    }
}

/// Externally observed authentication state of the session.
///
/// Mutated exclusively by [`super::session::AuthSessionController`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// The first validity check has not completed yet
    Unknown,

    /// No usable credential
    Unauthenticated,

    /// A usable credential is available
    Authenticated,

    /// A refresh is in flight
    Refreshing,

    /// A terminal failure occurred
    Failed {
        /// Reason for the failure
        reason: String,
    },
}

impl SessionState {
    /// Whether the session holds a usable credential
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

/// Authentication events published to UI collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuthEvent {
    /// The session state changed
    StateChanged {
        /// The new state
        state: SessionState,
    },

    /// A new credential was stored after an exchange or refresh
    CredentialStored {
        /// When the new access token expires
        expires_at: DateTime<Utc>,
    },

    /// The stored credential was cleared
    CredentialCleared,
}

impl AuthEvent {
    /// Get a string representation of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            AuthEvent::StateChanged { .. } => "state_changed",
            AuthEvent::CredentialStored { .. } => "credential_stored",
            AuthEvent::CredentialCleared => "credential_cleared",
        }
    }
}
