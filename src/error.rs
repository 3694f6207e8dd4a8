use thiserror::Error;

/// Unified error type for credential lifecycle operations.
///
/// The type is `Clone` so a single refresh outcome can be handed to every
/// caller waiting on it; underlying sources are flattened into messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No usable credential is available
    #[error("not authenticated")]
    Unauthenticated,

    /// The consent step was dismissed before an authorization code was issued
    #[error("authorization cancelled by user")]
    UserCancelled,

    /// The refresh token was permanently rejected by the token endpoint
    #[error("refresh token rejected: {reason}")]
    InvalidGrant {
        /// Reason reported by the token endpoint
        reason: String,
    },

    /// The authorization code was rejected during exchange
    #[error("code exchange failed: {reason}")]
    ExchangeFailed {
        /// Reason reported by the token endpoint
        reason: String,
    },

    /// Transport failure; the stored credential is left untouched
    #[error("network error during {operation}: {message}")]
    Network {
        /// Operation that was being performed
        operation: String,
        /// Error message
        message: String,
    },

    /// The persistence layer failed; credential state is unknown, not absent
    #[error("credential storage error: {message}")]
    Storage {
        /// Error message
        message: String,
    },

    /// Internal error
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl AuthError {
    /// Create an invalid-grant error
    pub fn invalid_grant(reason: impl Into<String>) -> Self {
        Self::InvalidGrant {
            reason: reason.into(),
        }
    }

    /// Create a code-exchange failure
    pub fn exchange_failed(reason: impl Into<String>) -> Self {
        Self::ExchangeFailed {
            reason: reason.into(),
        }
    }

    /// Create a network error for the given operation
    pub fn network(operation: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::Network {
            operation: operation.into(),
            message: source.to_string(),
        }
    }

    /// Create a storage error
    pub fn storage(source: impl std::fmt::Display) -> Self {
        Self::Storage {
            message: source.to_string(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a later identical call may succeed without user action
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Whether the failure ends the current credential or attempt for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::InvalidGrant { .. } | Self::ExchangeFailed { .. })
    }
}

/// Result type for credential lifecycle operations
pub type AuthResult<T> = Result<T, AuthError>;
