use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::credential::{AuthEvent, SessionState};
use super::flow::{AuthorizationFlow, PkceAuthorizationFlow, UserConsent};
use super::refresh::RefreshCoordinator;
use super::storage::{CredentialStore, KeyValueStore};
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::events::{EventStream, Subscriber, EVENT_CHANNEL_CAPACITY, EVENT_REPLAY_BUFFER};
use crate::http::HttpClient;

/// The session state machine exposed to the rest of the application.
///
/// Composes the credential store, authorization flow and refresh coordinator,
/// and is the only component that mutates the externally observed state.
/// UI collaborators hold an `Arc` of this and nothing else.
pub struct AuthSessionController {
    store: Arc<CredentialStore>,
    flow: Arc<dyn AuthorizationFlow>,
    coordinator: Arc<RefreshCoordinator>,
    skew: chrono::Duration,
    state: RwLock<SessionState>,
    events: EventStream<AuthEvent>,
    // at most one interactive authorization at a time
    interactive: Mutex<()>,
}

impl AuthSessionController {
    /// Create a controller with the production flow over the given backend
    /// and HTTP client
    pub fn new(
        config: &AuthConfig,
        backend: Arc<dyn KeyValueStore>,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        let store = Arc::new(CredentialStore::new(backend));
        let flow: Arc<dyn AuthorizationFlow> =
            Arc::new(PkceAuthorizationFlow::new(config.clone(), http));
        Self::with_flow(store, flow, config.refresh_skew)
    }

    /// Create a controller over an explicit store and flow
    pub fn with_flow(
        store: Arc<CredentialStore>,
        flow: Arc<dyn AuthorizationFlow>,
        skew: chrono::Duration,
    ) -> Self {
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&flow),
            skew,
        ));
        Self {
            store,
            flow,
            coordinator,
            skew,
            state: RwLock::new(SessionState::Unknown),
            events: EventStream::new(EVENT_CHANNEL_CAPACITY, EVENT_REPLAY_BUFFER),
            interactive: Mutex::new(()),
        }
    }

    /// The current session state
    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Subscribe to auth events
    pub fn subscribe(&self) -> Subscriber<AuthEvent> {
        self.events.subscribe()
    }

    async fn set_state(&self, next: SessionState) {
        {
            let mut state = self.state.write().await;
            if *state == next {
                return;
            }
            *state = next.clone();
        }
        info!(state = ?next, "session state changed");
        self.events
            .publish(AuthEvent::StateChanged { state: next })
            .await;
    }

    /// Check whether a usable credential exists, refreshing it if needed,
    /// and settle the session state accordingly.
    ///
    /// A retryable failure leaves the previously observed state in place: a
    /// background check must never force a logout over a flaky network.
    pub async fn check_validity(&self) -> AuthResult<SessionState> {
        let prior = self.state().await;

        let credential = match self.store.load().await {
            Ok(credential) => credential,
            Err(err) => {
                // storage failure means "credential unknown", not "logged out"
                warn!(error = %err, "credential load failed during validity check");
                return Err(err);
            }
        };

        match credential {
            None => {
                self.set_state(SessionState::Unauthenticated).await;
                return Ok(SessionState::Unauthenticated);
            }
            Some(credential) if !credential.expires_soon(self.skew) => {
                self.set_state(SessionState::Authenticated).await;
                return Ok(SessionState::Authenticated);
            }
            Some(_) => {}
        }

        self.set_state(SessionState::Refreshing).await;
        match self.coordinator.get_usable_token().await {
            Ok(_) => {
                self.set_state(SessionState::Authenticated).await;
                Ok(SessionState::Authenticated)
            }
            Err(AuthError::Unauthenticated) => {
                self.set_state(SessionState::Unauthenticated).await;
                Ok(SessionState::Unauthenticated)
            }
            Err(err) if err.is_retryable() => {
                self.set_state(prior).await;
                Err(err)
            }
            Err(err) => {
                self.set_state(SessionState::Failed {
                    reason: err.to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    /// Run the interactive authorization flow.
    ///
    /// Returns `Ok(true)` once a credential is stored, `Ok(false)` when the
    /// user dismissed the consent step (a normal outcome, not an error).
    pub async fn authenticate(&self, consent: &dyn UserConsent) -> AuthResult<bool> {
        let Ok(_guard) = self.interactive.try_lock() else {
            return Err(AuthError::internal(
                "an interactive authorization is already running",
            ));
        };

        let generation = self.coordinator.generation();
        match self.flow.authorize_interactive(consent).await {
            Ok(credential) => {
                if self.coordinator.generation() != generation {
                    info!("logout superseded the interactive authorization; discarding credential");
                    self.set_state(SessionState::Unauthenticated).await;
                    return Ok(false);
                }
                self.store.save(&credential).await?;
                self.events
                    .publish(AuthEvent::CredentialStored {
                        expires_at: credential.expires_at,
                    })
                    .await;
                self.set_state(SessionState::Authenticated).await;
                Ok(true)
            }
            Err(AuthError::UserCancelled) => {
                self.set_state(SessionState::Unauthenticated).await;
                Ok(false)
            }
            Err(err) => {
                self.set_state(SessionState::Failed {
                    reason: err.to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    /// Clear the stored credential and move to `Unauthenticated`.
    ///
    /// An in-flight refresh is superseded: its result, on later arrival, is
    /// discarded rather than written back.
    pub async fn logout(&self) -> AuthResult<()> {
        info!("logging out");
        self.coordinator.invalidate();
        self.store.clear().await?;
        self.events.publish(AuthEvent::CredentialCleared).await;
        self.set_state(SessionState::Unauthenticated).await;
        Ok(())
    }

    /// Return a usable bearer token for downstream resource calls
    pub async fn usable_token(&self) -> AuthResult<String> {
        self.coordinator.get_usable_token().await
    }
}
