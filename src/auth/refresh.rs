use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::credential::Credential;
use super::flow::AuthorizationFlow;
use super::storage::CredentialStore;
use crate::error::{AuthError, AuthResult};

/// Shared outcome of an in-flight refresh; `None` until the leader settles it
type PendingOutcome = watch::Receiver<Option<AuthResult<Credential>>>;

/// At most one of these exists per refresh-token value at any time.
/// Concurrent callers clone the receiver and await the shared outcome
/// instead of issuing their own refresh call.
struct InFlightRefresh {
    refresh_token: String,
    outcome: PendingOutcome,
}

/// Role a caller takes when a refresh is needed
enum RefreshRole {
    Leader(watch::Sender<Option<AuthResult<Credential>>>),
    Waiter(PendingOutcome),
}

/// Decides whether the cached credential is usable and performs at-most-one
/// concurrent refresh against the token endpoint.
///
/// All credential reads and writes on the refresh path go through here; UI
/// collaborators never touch the store directly.
pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    flow: Arc<dyn AuthorizationFlow>,
    skew: chrono::Duration,
    in_flight: Mutex<Option<InFlightRefresh>>,
    generation: AtomicU64,
}

impl RefreshCoordinator {
    /// Create a coordinator over the given store and flow
    pub fn new(
        store: Arc<CredentialStore>,
        flow: Arc<dyn AuthorizationFlow>,
        skew: chrono::Duration,
    ) -> Self {
        Self {
            store,
            flow,
            skew,
            in_flight: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Current logout generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate any in-flight refresh; its result will be discarded.
    /// Called on logout before the store is cleared.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Return a usable access token, refreshing it first when needed.
    ///
    /// The cached token is returned without any network call while it is
    /// outside the skew window. Otherwise exactly one refresh runs per
    /// refresh-token value, and every concurrent caller observes that one
    /// outcome.
    pub async fn get_usable_token(&self) -> AuthResult<String> {
        let generation = self.generation();

        let credential = self
            .store
            .load()
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        if !credential.expires_soon(self.skew) {
            return Ok(credential.access_token);
        }

        let refresh_token = match credential.refresh_token {
            Some(token) => token,
            None => {
                // expired with nothing to renew it; the credential is dead
                debug!("expired credential has no refresh token");
                self.store.clear().await?;
                return Err(AuthError::Unauthenticated);
            }
        };

        let role = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some(pending) if pending.refresh_token == refresh_token => {
                    debug!("attaching to in-flight refresh");
                    RefreshRole::Waiter(pending.outcome.clone())
                }
                _ => {
                    let (sender, receiver) = watch::channel(None);
                    *slot = Some(InFlightRefresh {
                        refresh_token: refresh_token.clone(),
                        outcome: receiver,
                    });
                    RefreshRole::Leader(sender)
                }
            }
        };

        match role {
            RefreshRole::Leader(sender) => {
                let outcome = self.run_refresh(&refresh_token, generation).await;
                *self.in_flight.lock().await = None;
                let _ = sender.send(Some(outcome.clone()));
                outcome.map(|credential| credential.access_token)
            }
            RefreshRole::Waiter(mut receiver) => loop {
                if let Some(outcome) = receiver.borrow_and_update().clone() {
                    return outcome.map(|credential| credential.access_token);
                }
                receiver
                    .changed()
                    .await
                    .map_err(|_| AuthError::internal("refresh abandoned before completion"))?;
            },
        }
    }

    /// Perform one refresh and settle the store accordingly
    async fn run_refresh(&self, refresh_token: &str, generation: u64) -> AuthResult<Credential> {
        // a caller that finished a refresh while we claimed the slot already
        // stored a fresh credential; reuse it instead of burning the grant
        if let Some(current) = self.store.load().await? {
            if !current.expires_soon(self.skew) {
                return Ok(current);
            }
        }

        match self.flow.refresh(refresh_token).await {
            Ok(renewed) => {
                if self.generation() != generation {
                    info!("logout superseded the refresh; discarding its result");
                    return Err(AuthError::Unauthenticated);
                }
                self.store.save(&renewed).await?;
                Ok(renewed)
            }
            Err(AuthError::InvalidGrant { reason }) => {
                warn!(%reason, "refresh token permanently rejected; clearing credential");
                if self.generation() == generation {
                    self.store.clear().await?;
                }
                Err(AuthError::Unauthenticated)
            }
            Err(err) => {
                // retryable failure: the stored credential stays untouched so
                // a later call can try again
                warn!(error = %err, "token refresh failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::flow::{ConsentOutcome, UserConsent};
    use crate::auth::storage::MemoryStore;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// AuthorizationFlow stub with a programmable refresh outcome and an
    /// optional gate that holds the refresh open until the test releases it.
    struct StubFlow {
        refresh_calls: AtomicUsize,
        outcome: Box<dyn Fn() -> AuthResult<Credential> + Send + Sync>,
        gate: Option<Arc<Notify>>,
    }

    impl StubFlow {
        fn returning(outcome: impl Fn() -> AuthResult<Credential> + Send + Sync + 'static) -> Self {
            Self {
                refresh_calls: AtomicUsize::new(0),
                outcome: Box::new(outcome),
                gate: None,
            }
        }

        fn gated(
            gate: Arc<Notify>,
            outcome: impl Fn() -> AuthResult<Credential> + Send + Sync + 'static,
        ) -> Self {
            Self {
                refresh_calls: AtomicUsize::new(0),
                outcome: Box::new(outcome),
                gate: Some(gate),
            }
        }

        fn calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthorizationFlow for StubFlow {
        async fn authorize_interactive(
            &self,
            _consent: &dyn UserConsent,
        ) -> AuthResult<Credential> {
            unimplemented!("coordinator never runs the interactive flow")
        }

        async fn refresh(&self, _refresh_token: &str) -> AuthResult<Credential> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            (self.outcome)()
        }
    }

    fn renewed_credential() -> Credential {
        Credential::new(
            "access-b",
            Some("refresh-r".to_string()),
            Utc::now() + Duration::hours(1),
        )
    }

    fn expired_credential() -> Credential {
        Credential::new(
            "access-a",
            Some("refresh-r".to_string()),
            Utc::now() - Duration::seconds(1),
        )
    }

    async fn coordinator_with(
        flow: Arc<StubFlow>,
        seeded: Option<Credential>,
    ) -> (Arc<RefreshCoordinator>, Arc<CredentialStore>) {
        let store = Arc::new(CredentialStore::new(Arc::new(MemoryStore::new())));
        if let Some(credential) = seeded {
            store.save(&credential).await.unwrap();
        }
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&store),
            flow,
            Duration::seconds(60),
        ));
        (coordinator, store)
    }

    #[tokio::test]
    async fn empty_store_is_unauthenticated() {
        let flow = Arc::new(StubFlow::returning(|| Ok(renewed_credential())));
        let (coordinator, _) = coordinator_with(Arc::clone(&flow), None).await;

        let result = coordinator.get_usable_token().await;
        assert_eq!(result.unwrap_err(), AuthError::Unauthenticated);
        assert_eq!(flow.calls(), 0);
    }

    #[tokio::test]
    async fn fresh_credential_is_returned_without_refresh() {
        let flow = Arc::new(StubFlow::returning(|| Ok(renewed_credential())));
        let fresh = Credential::new(
            "access-a",
            Some("refresh-r".to_string()),
            Utc::now() + Duration::seconds(120),
        );
        let (coordinator, _) = coordinator_with(Arc::clone(&flow), Some(fresh)).await;

        assert_eq!(coordinator.get_usable_token().await.unwrap(), "access-a");
        assert_eq!(flow.calls(), 0);
    }

    #[tokio::test]
    async fn credential_inside_the_skew_window_is_refreshed() {
        let flow = Arc::new(StubFlow::returning(|| Ok(renewed_credential())));
        let expiring = Credential::new(
            "access-a",
            Some("refresh-r".to_string()),
            Utc::now() + Duration::seconds(30),
        );
        let (coordinator, _) = coordinator_with(Arc::clone(&flow), Some(expiring)).await;

        assert_eq!(coordinator.get_usable_token().await.unwrap(), "access-b");
        assert_eq!(flow.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let gate = Arc::new(Notify::new());
        let flow = Arc::new(StubFlow::gated(Arc::clone(&gate), || {
            Ok(renewed_credential())
        }));
        let (coordinator, _) = coordinator_with(Arc::clone(&flow), Some(expired_credential())).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            tasks.push(tokio::spawn(
                async move { coordinator.get_usable_token().await },
            ));
        }

        // let every caller reach the coordinator before releasing the refresh
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        gate.notify_waiters();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "access-b");
        }
        assert_eq!(flow.calls(), 1, "exactly one refresh call must be issued");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failure() {
        let gate = Arc::new(Notify::new());
        let flow = Arc::new(StubFlow::gated(Arc::clone(&gate), || {
            Err(AuthError::network("token_refresh", "connection reset"))
        }));
        let (coordinator, store) =
            coordinator_with(Arc::clone(&flow), Some(expired_credential())).await;

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let coordinator = Arc::clone(&coordinator);
            tasks.push(tokio::spawn(
                async move { coordinator.get_usable_token().await },
            ));
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        gate.notify_waiters();

        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(err.is_retryable());
        }
        assert_eq!(flow.calls(), 1);
        // a retryable failure leaves the stored credential untouched
        let remaining = store.load().await.unwrap().unwrap();
        assert_eq!(remaining.access_token, "access-a");
        assert_eq!(remaining.refresh_token.as_deref(), Some("refresh-r"));
    }

    #[tokio::test]
    async fn invalid_grant_clears_the_credential_for_good() {
        let flow = Arc::new(StubFlow::returning(|| {
            Err(AuthError::invalid_grant("revoked"))
        }));
        let (coordinator, store) =
            coordinator_with(Arc::clone(&flow), Some(expired_credential())).await;

        let first = coordinator.get_usable_token().await;
        assert_eq!(first.unwrap_err(), AuthError::Unauthenticated);
        assert_eq!(store.load().await.unwrap(), None);

        // no further network call once the credential is gone
        let second = coordinator.get_usable_token().await;
        assert_eq!(second.unwrap_err(), AuthError::Unauthenticated);
        assert_eq!(flow.calls(), 1);
    }

    #[tokio::test]
    async fn expired_credential_without_refresh_token_is_cleared() {
        let flow = Arc::new(StubFlow::returning(|| Ok(renewed_credential())));
        let dead = Credential::new("access-a", None, Utc::now() - Duration::seconds(1));
        let (coordinator, store) = coordinator_with(Arc::clone(&flow), Some(dead)).await;

        let result = coordinator.get_usable_token().await;
        assert_eq!(result.unwrap_err(), AuthError::Unauthenticated);
        assert_eq!(store.load().await.unwrap(), None);
        assert_eq!(flow.calls(), 0);
    }

    #[tokio::test]
    async fn logout_during_refresh_discards_the_result() {
        let gate = Arc::new(Notify::new());
        let flow = Arc::new(StubFlow::gated(Arc::clone(&gate), || {
            Ok(renewed_credential())
        }));
        let (coordinator, store) =
            coordinator_with(Arc::clone(&flow), Some(expired_credential())).await;

        let refresh = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.get_usable_token().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // logout while the refresh is held open
        coordinator.invalidate();
        store.clear().await.unwrap();
        gate.notify_waiters();

        let result = refresh.await.unwrap();
        assert_eq!(result.unwrap_err(), AuthError::Unauthenticated);
        // the renewed credential must not repopulate the store
        assert_eq!(store.load().await.unwrap(), None);
    }
}
