use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::credential::Credential;
use super::pkce::PkcePair;
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::http::{HttpClient, HttpResponse};

/// Expiry assumed when the token endpoint omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Outcome of the external user-consent step
#[derive(Debug, Clone)]
pub enum ConsentOutcome {
    /// The user approved and the redirect carried an authorization code
    Authorized {
        /// The authorization code
        code: String,
    },
    /// The consent step was dismissed without a code
    Cancelled,
}

/// External collaborator that drives the consent screen.
///
/// The flow hands it the authorize URL and suspends until the user acts;
/// there is no timeout on this step.
#[async_trait]
pub trait UserConsent: Send + Sync {
    /// Present the authorize URL and return the outcome
    async fn request_consent(&self, authorize_url: &str) -> AuthResult<ConsentOutcome>;
}

/// The two token-endpoint operations of the credential lifecycle
#[async_trait]
pub trait AuthorizationFlow: Send + Sync {
    /// Run the interactive consent flow and exchange the code for tokens
    async fn authorize_interactive(&self, consent: &dyn UserConsent) -> AuthResult<Credential>;

    /// Exchange a refresh token for a new access token
    async fn refresh(&self, refresh_token: &str) -> AuthResult<Credential>;
}

/// Phases of a single authorization attempt, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptPhase {
    Idle,
    ChallengeGenerated,
    AwaitingUserConsent,
    CodeReceived,
    Exchanging,
}

impl AttemptPhase {
    fn successor(self) -> Option<AttemptPhase> {
        match self {
            Self::Idle => Some(Self::ChallengeGenerated),
            Self::ChallengeGenerated => Some(Self::AwaitingUserConsent),
            Self::AwaitingUserConsent => Some(Self::CodeReceived),
            Self::CodeReceived => Some(Self::Exchanging),
            Self::Exchanging => None,
        }
    }
}

/// One interactive authorization attempt, identified for log correlation
struct AuthorizationAttempt {
    id: Uuid,
    phase: AttemptPhase,
}

impl AuthorizationAttempt {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            phase: AttemptPhase::Idle,
        }
    }

    /// Move to the next phase; phases cannot be skipped
    fn advance(&mut self, next: AttemptPhase) -> AuthResult<()> {
        if self.phase.successor() != Some(next) {
            return Err(AuthError::internal(format!(
                "authorization attempt cannot move from {:?} to {:?}",
                self.phase, next
            )));
        }
        debug!(attempt = %self.id, phase = ?next, "authorization attempt advanced");
        self.phase = next;
        Ok(())
    }
}

/// Successful token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// OAuth error body returned by the token endpoint
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl OAuthErrorBody {
    fn reason(&self) -> String {
        self.error_description
            .clone()
            .unwrap_or_else(|| self.error.clone())
    }
}

/// Authorization-code-with-PKCE flow against the account service.
///
/// PKCE material lives only for the duration of one attempt and is dropped
/// after the exchange, successful or not.
pub struct PkceAuthorizationFlow {
    config: AuthConfig,
    http: Arc<dyn HttpClient>,
}

impl PkceAuthorizationFlow {
    /// Create a flow for the given configuration
    pub fn new(config: AuthConfig, http: Arc<dyn HttpClient>) -> Self {
        Self { config, http }
    }

    /// Build the authorize URL for a challenge
    pub fn authorize_url(&self, challenge: &str) -> AuthResult<String> {
        let scope = self.config.scope_param();
        let url = reqwest::Url::parse_with_params(
            &self.config.authorize_endpoint,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("code_challenge_method", "S256"),
                ("code_challenge", challenge),
            ],
        )
        .map_err(|err| AuthError::internal(format!("invalid authorize endpoint: {err}")))?;
        Ok(url.into())
    }

    async fn post_token(
        &self,
        operation: &str,
        params: &[(&str, String)],
    ) -> AuthResult<HttpResponse> {
        self.http
            .post_form(&self.config.token_endpoint, params)
            .await
            .map_err(|err| AuthError::network(operation, err))
    }

    fn decode_token(operation: &str, response: HttpResponse) -> AuthResult<TokenResponse> {
        response
            .json()
            .map_err(|err| AuthError::network(operation, err))
    }

    fn oauth_error(response: &HttpResponse) -> Option<OAuthErrorBody> {
        serde_json::from_str(response.body()).ok()
    }

    /// Build a credential from a token response.
    ///
    /// A response omitting `refresh_token` carries the prior one forward; the
    /// endpoint only returns a new value when the token rotates.
    fn credential_from(response: TokenResponse, prior_refresh: Option<&str>) -> Credential {
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        Credential::new(
            response.access_token,
            response
                .refresh_token
                .or_else(|| prior_refresh.map(String::from)),
            Utc::now() + Duration::seconds(expires_in),
        )
    }
}

#[async_trait]
impl AuthorizationFlow for PkceAuthorizationFlow {
    async fn authorize_interactive(&self, consent: &dyn UserConsent) -> AuthResult<Credential> {
        let mut attempt = AuthorizationAttempt::new();

        let pkce = PkcePair::generate();
        attempt.advance(AttemptPhase::ChallengeGenerated)?;

        let authorize_url = self.authorize_url(&pkce.challenge)?;
        attempt.advance(AttemptPhase::AwaitingUserConsent)?;

        let code = match consent.request_consent(&authorize_url).await? {
            ConsentOutcome::Authorized { code } => code,
            ConsentOutcome::Cancelled => {
                info!(attempt = %attempt.id, "consent dismissed without a code");
                return Err(AuthError::UserCancelled);
            }
        };
        attempt.advance(AttemptPhase::CodeReceived)?;

        attempt.advance(AttemptPhase::Exchanging)?;
        let params = [
            ("grant_type", "authorization_code".to_string()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.clone()),
            ("client_id", self.config.client_id.clone()),
            ("code_verifier", pkce.verifier.clone()),
        ];
        let response = self.post_token("code_exchange", &params).await?;

        if !response.is_success() {
            if response.status() >= 500 {
                return Err(AuthError::network(
                    "code_exchange",
                    format!("HTTP {}", response.status()),
                ));
            }
            let reason = Self::oauth_error(&response)
                .map(|body| body.reason())
                .unwrap_or_else(|| format!("HTTP {}", response.status()));
            warn!(attempt = %attempt.id, %reason, "authorization code rejected");
            return Err(AuthError::exchange_failed(reason));
        }

        let token = Self::decode_token("code_exchange", response)?;
        info!(attempt = %attempt.id, "authorization code exchanged");
        Ok(Self::credential_from(token, None))
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<Credential> {
        debug!("requesting access token refresh");

        let params = [
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", self.config.client_id.clone()),
        ];
        let response = self.post_token("token_refresh", &params).await?;

        if !response.is_success() {
            if let Some(body) = Self::oauth_error(&response) {
                if body.error == "invalid_grant" {
                    return Err(AuthError::invalid_grant(body.reason()));
                }
            }
            // anything short of an explicit grant rejection may clear up on retry
            return Err(AuthError::network(
                "token_refresh",
                format!("HTTP {}", response.status()),
            ));
        }

        let token = Self::decode_token("token_refresh", response)?;
        let credential = Self::credential_from(token, Some(refresh_token));
        info!(expires_at = %credential.expires_at, "access token refreshed");
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// HttpClient stub returning a canned token-endpoint response
    struct CannedHttp {
        status: u16,
        body: String,
    }

    #[async_trait]
    impl HttpClient for CannedHttp {
        async fn get(&self, _url: &str, _headers: HashMap<String, String>) -> anyhow::Result<HttpResponse> {
            unimplemented!("flow only posts")
        }

        async fn post_form(
            &self,
            _url: &str,
            _params: &[(&str, String)],
        ) -> anyhow::Result<HttpResponse> {
            Ok(HttpResponse::new(self.status, self.body.clone()))
        }
    }

    fn flow_with(status: u16, body: &str) -> PkceAuthorizationFlow {
        PkceAuthorizationFlow::new(
            AuthConfig::new("client-123"),
            Arc::new(CannedHttp {
                status,
                body: body.to_string(),
            }),
        )
    }

    struct ApprovingConsent;

    #[async_trait]
    impl UserConsent for ApprovingConsent {
        async fn request_consent(&self, _authorize_url: &str) -> AuthResult<ConsentOutcome> {
            Ok(ConsentOutcome::Authorized {
                code: "auth-code".to_string(),
            })
        }
    }

    struct DismissingConsent;

    #[async_trait]
    impl UserConsent for DismissingConsent {
        async fn request_consent(&self, _authorize_url: &str) -> AuthResult<ConsentOutcome> {
            Ok(ConsentOutcome::Cancelled)
        }
    }

    #[test]
    fn authorize_url_carries_the_request_parameters() {
        let flow = flow_with(200, "{}");
        let url = flow.authorize_url("challenge-abc").unwrap();
        let parsed = reqwest::Url::parse(&url).unwrap();
        let params: HashMap<String, String> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["redirect_uri"], "resona://oauth");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["code_challenge"], "challenge-abc");
        assert!(params["scope"].contains("user-library-read"));
    }

    #[test]
    fn attempt_phases_cannot_be_skipped() {
        let mut attempt = AuthorizationAttempt::new();
        assert!(attempt.advance(AttemptPhase::Exchanging).is_err());

        attempt.advance(AttemptPhase::ChallengeGenerated).unwrap();
        attempt.advance(AttemptPhase::AwaitingUserConsent).unwrap();
        assert!(attempt.advance(AttemptPhase::Exchanging).is_err());
        attempt.advance(AttemptPhase::CodeReceived).unwrap();
        attempt.advance(AttemptPhase::Exchanging).unwrap();
    }

    #[test]
    fn credential_from_keeps_prior_refresh_token() {
        let response = TokenResponse {
            access_token: "new-access".to_string(),
            expires_in: Some(1800),
            refresh_token: None,
        };
        let credential = PkceAuthorizationFlow::credential_from(response, Some("old-refresh"));
        assert_eq!(credential.refresh_token.as_deref(), Some("old-refresh"));
    }

    #[test]
    fn credential_from_defaults_the_expiry() {
        let response = TokenResponse {
            access_token: "new-access".to_string(),
            expires_in: None,
            refresh_token: Some("r".to_string()),
        };
        let before = Utc::now();
        let credential = PkceAuthorizationFlow::credential_from(response, None);
        let lifetime = credential.expires_at - before;
        assert!(lifetime >= Duration::seconds(3595) && lifetime <= Duration::seconds(3605));
    }

    #[tokio::test]
    async fn cancelled_consent_maps_to_user_cancelled() {
        let flow = flow_with(200, "{}");
        let result = flow.authorize_interactive(&DismissingConsent).await;
        assert_eq!(result.unwrap_err(), AuthError::UserCancelled);
    }

    #[tokio::test]
    async fn rejected_code_maps_to_exchange_failed() {
        let flow = flow_with(
            400,
            r#"{"error":"invalid_grant","error_description":"Authorization code expired"}"#,
        );
        let result = flow.authorize_interactive(&ApprovingConsent).await;
        assert_eq!(
            result.unwrap_err(),
            AuthError::exchange_failed("Authorization code expired")
        );
    }

    #[tokio::test]
    async fn server_failure_during_exchange_is_retryable() {
        let flow = flow_with(503, "upstream unavailable");
        let result = flow.authorize_interactive(&ApprovingConsent).await;
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn invalid_grant_on_refresh_is_terminal() {
        let flow = flow_with(
            400,
            r#"{"error":"invalid_grant","error_description":"Refresh token revoked"}"#,
        );
        let result = flow.refresh("revoked-token").await;
        assert_eq!(
            result.unwrap_err(),
            AuthError::invalid_grant("Refresh token revoked")
        );
    }

    #[tokio::test]
    async fn other_refresh_failures_are_retryable() {
        let flow = flow_with(500, "boom");
        assert!(flow.refresh("r").await.unwrap_err().is_retryable());

        let flow = flow_with(429, r#"{"error":"rate_limited"}"#);
        assert!(flow.refresh("r").await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn successful_exchange_builds_the_credential() {
        let flow = flow_with(
            200,
            r#"{"access_token":"fresh","token_type":"Bearer","expires_in":3600,"refresh_token":"rotated"}"#,
        );
        let credential = flow.authorize_interactive(&ApprovingConsent).await.unwrap();
        assert_eq!(credential.access_token, "fresh");
        assert_eq!(credential.refresh_token.as_deref(), Some("rotated"));
        assert!(!credential.is_expired());
    }
}
