//! Single-flight access token renewal.
//!
//! Any number of requests may observe an expired access token at the same
//! time. The first caller becomes the renewal owner and issues the one and
//! only renewal call; everyone else queues as a waiter and receives the same
//! outcome, in arrival order, once the renewal settles.
//!
//! ```text
//!            expiry observed                 renewal settled
//!   Idle ───────────────────────▶ Refreshing ────────────────▶ Idle
//!                                   │   ▲
//!                  expiry observed  └───┘  (queued as waiter)
//! ```

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use plantorium_core::CredentialPair;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use super::{AuthError, RefreshTransport};
use crate::storage::{PersistenceAdapter, StorageError, storage_keys};

type Waiter = oneshot::Sender<Result<SecretString, AuthError>>;

enum RefreshState {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

/// What a caller of `ensure_fresh_token` does once the state lock is released.
enum Entry {
    /// A renewal settled after the caller's request was sent.
    Current(SecretString),
    /// Another caller owns the renewal; wait for its outcome.
    Wait(oneshot::Receiver<Result<SecretString, AuthError>>),
    /// This caller owns the renewal.
    Renew(SecretString),
}

/// Owner of the stored credential pair and of the renewal protocol.
///
/// This is the only component that writes `accessToken`, `refreshToken`
/// and `orderToken`.
pub struct TokenCoordinator {
    storage: Arc<dyn PersistenceAdapter>,
    refresher: Arc<dyn RefreshTransport>,
    refresh_timeout: Duration,
    state: Mutex<RefreshState>,
}

impl TokenCoordinator {
    /// Create a coordinator in the `Idle` state.
    #[must_use]
    pub fn new(
        storage: Arc<dyn PersistenceAdapter>,
        refresher: Arc<dyn RefreshTransport>,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            refresher,
            refresh_timeout,
            state: Mutex::new(RefreshState::Idle),
        }
    }

    // =========================================================================
    // Stored credentials
    // =========================================================================

    /// Persist a freshly issued credential pair (sign-in).
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the pair cannot be written.
    pub fn store_session(&self, pair: &CredentialPair) -> Result<(), AuthError> {
        self.persist(pair)?;
        info!("session stored");
        Ok(())
    }

    /// The stored credential pair, if both tokens are present.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if storage cannot be read.
    pub fn session(&self) -> Result<Option<CredentialPair>, AuthError> {
        let access = self.read(storage_keys::ACCESS_TOKEN)?;
        let refresh = self.read(storage_keys::REFRESH_TOKEN)?;
        Ok(match (access, refresh) {
            (Some(access), Some(refresh)) => {
                CredentialPair::new(access.expose_secret(), refresh.expose_secret()).ok()
            }
            _ => None,
        })
    }

    /// The stored access token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if storage cannot be read.
    pub fn access_token(&self) -> Result<Option<SecretString>, AuthError> {
        self.read(storage_keys::ACCESS_TOKEN)
    }

    /// The stored order-scoped (checkout) token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if storage cannot be read.
    pub fn order_token(&self) -> Result<Option<SecretString>, AuthError> {
        self.read(storage_keys::ORDER_TOKEN)
    }

    /// Store the order-scoped token issued when a checkout starts.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the token cannot be written.
    pub fn set_order_token(&self, token: &SecretString) -> Result<(), AuthError> {
        self.storage
            .set(storage_keys::ORDER_TOKEN, token.expose_secret())?;
        Ok(())
    }

    /// Forget the order-scoped token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the token cannot be removed.
    pub fn clear_order_token(&self) -> Result<(), AuthError> {
        self.storage.remove(storage_keys::ORDER_TOKEN)?;
        Ok(())
    }

    /// Remove every stored credential.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if any key cannot be removed. All keys
    /// are attempted regardless.
    pub fn clear_session(&self) -> Result<(), AuthError> {
        let results = [
            self.storage.remove(storage_keys::ACCESS_TOKEN),
            self.storage.remove(storage_keys::REFRESH_TOKEN),
            self.storage.remove(storage_keys::ORDER_TOKEN),
        ];
        results
            .into_iter()
            .collect::<Result<Vec<()>, StorageError>>()?;
        Ok(())
    }

    /// Whether a renewal is currently in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), RefreshState::Refreshing { .. })
    }

    #[cfg(test)]
    fn queued_waiters(&self) -> usize {
        match &*self.lock_state() {
            RefreshState::Refreshing { waiters } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    // =========================================================================
    // Renewal
    // =========================================================================

    /// Obtain a valid access token after a request observed expiry.
    ///
    /// `stale` is the access token the failed request carried. When the
    /// stored token already differs from it, a renewal has completed since
    /// that request was sent and the stored token is returned as-is.
    ///
    /// While a renewal is in flight, callers queue behind it instead of
    /// issuing their own renewal call.
    ///
    /// # Errors
    ///
    /// - `AuthError::AuthExpired` if no refresh token is stored (no network call)
    /// - `AuthError::RefreshFailed` / `RefreshTimedOut` if the renewal fails;
    ///   stored credentials are cleared
    /// - `AuthError::Cancelled` if the renewal owner was dropped mid-flight
    #[instrument(skip_all)]
    pub async fn ensure_fresh_token(
        &self,
        stale: Option<&SecretString>,
    ) -> Result<SecretString, AuthError> {
        match self.enter(stale)? {
            Entry::Current(token) => {
                debug!("access token already renewed");
                Ok(token)
            }
            Entry::Wait(receiver) => {
                debug!("renewal in flight, waiting");
                receiver.await.unwrap_or(Err(AuthError::Cancelled))
            }
            Entry::Renew(refresh_token) => self.renew(refresh_token).await,
        }
    }

    fn enter(&self, stale: Option<&SecretString>) -> Result<Entry, AuthError> {
        let mut state = self.lock_state();

        if let RefreshState::Refreshing { waiters } = &mut *state {
            let (sender, receiver) = oneshot::channel();
            waiters.push(sender);
            return Ok(Entry::Wait(receiver));
        }

        if let Some(stale) = stale
            && let Some(current) = self.read(storage_keys::ACCESS_TOKEN)?
            && current.expose_secret() != stale.expose_secret()
        {
            return Ok(Entry::Current(current));
        }

        let Some(refresh_token) = self.read(storage_keys::REFRESH_TOKEN)? else {
            warn!("no refresh token stored, session expired");
            drop(state);
            self.clear_quietly();
            return Err(AuthError::AuthExpired);
        };

        *state = RefreshState::Refreshing {
            waiters: Vec::new(),
        };
        Ok(Entry::Renew(refresh_token))
    }

    async fn renew(&self, refresh_token: SecretString) -> Result<SecretString, AuthError> {
        let flight = InFlight {
            coordinator: self,
            settled: false,
        };

        info!("renewing access token");
        let outcome = tokio::time::timeout(
            self.refresh_timeout,
            self.refresher.refresh(&refresh_token),
        )
        .await
        .unwrap_or(Err(AuthError::RefreshTimedOut(self.refresh_timeout)));

        let result = self.settle(outcome);
        flight.disarm();
        result
    }

    /// Persist or clear credentials, return to `Idle`, and resolve waiters
    /// in arrival order before handing the outcome back to the owner.
    fn settle(
        &self,
        outcome: Result<CredentialPair, AuthError>,
    ) -> Result<SecretString, AuthError> {
        let result = match outcome {
            Ok(pair) => match self.persist(&pair) {
                Ok(()) => {
                    info!("access token renewed");
                    Ok(pair.access_token().clone())
                }
                Err(e) => {
                    warn!(error = %e, "failed to persist renewed credentials");
                    self.clear_quietly();
                    Err(e)
                }
            },
            Err(e) => {
                warn!(error = %e, "access token renewal failed, clearing session");
                self.clear_quietly();
                Err(e)
            }
        };

        let waiters = self.take_waiters();
        debug!(waiters = waiters.len(), "resolving queued callers");
        for waiter in waiters {
            // A waiter that gave up has dropped its receiver.
            let _ = waiter.send(result.clone());
        }

        result
    }

    fn abandon(&self) {
        let waiters = self.take_waiters();
        warn!(waiters = waiters.len(), "renewal owner dropped, cancelling waiters");
        for waiter in waiters {
            let _ = waiter.send(Err(AuthError::Cancelled));
        }
    }

    fn take_waiters(&self) -> Vec<Waiter> {
        match mem::replace(&mut *self.lock_state(), RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        }
    }

    // =========================================================================
    // Storage helpers
    // =========================================================================

    fn read(&self, key: &str) -> Result<Option<SecretString>, AuthError> {
        Ok(self
            .storage
            .get(key)?
            .filter(|value| !value.trim().is_empty())
            .map(SecretString::from))
    }

    fn persist(&self, pair: &CredentialPair) -> Result<(), AuthError> {
        self.storage
            .set(storage_keys::ACCESS_TOKEN, pair.access_token().expose_secret())?;
        self.storage
            .set(storage_keys::REFRESH_TOKEN, pair.refresh_token().expose_secret())?;
        Ok(())
    }

    fn clear_quietly(&self) {
        if let Err(e) = self.clear_session() {
            warn!(error = %e, "failed to clear stored credentials");
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TokenCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCoordinator")
            .field("refresh_timeout", &self.refresh_timeout)
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

/// Returns the coordinator to `Idle` if the renewal owner is dropped before
/// the renewal settles, so queued waiters are never left hanging.
struct InFlight<'a> {
    coordinator: &'a TokenCoordinator,
    settled: bool,
}

impl InFlight<'_> {
    fn disarm(mut self) {
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.abandon();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::BoxFuture;

    use super::*;
    use crate::storage::MemoryStore;

    /// How the scripted refresher answers.
    #[derive(Clone, Copy)]
    enum Script {
        Succeed,
        Reject,
        Hang,
    }

    struct ScriptedRefresher {
        calls: AtomicUsize,
        delay: Duration,
        script: Script,
    }

    impl ScriptedRefresher {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
                script,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RefreshTransport for ScriptedRefresher {
        fn refresh<'a>(
            &'a self,
            refresh_token: &'a SecretString,
        ) -> BoxFuture<'a, Result<CredentialPair, AuthError>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                match self.script {
                    Script::Hang => std::future::pending().await,
                    Script::Reject => {
                        tokio::time::sleep(self.delay).await;
                        Err(AuthError::RefreshFailed("Authentication Failed!".to_string()))
                    }
                    Script::Succeed => {
                        tokio::time::sleep(self.delay).await;
                        Ok(CredentialPair::new(
                            format!("access-{call}"),
                            format!("{}-next", refresh_token.expose_secret()),
                        )
                        .unwrap())
                    }
                }
            })
        }
    }

    fn signed_in_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.set(storage_keys::ACCESS_TOKEN, "access-0").unwrap();
        store.set(storage_keys::REFRESH_TOKEN, "refresh-0").unwrap();
        store.set(storage_keys::ORDER_TOKEN, "order-0").unwrap();
        store
    }

    fn coordinator(
        store: &Arc<MemoryStore>,
        refresher: &Arc<ScriptedRefresher>,
        timeout: Duration,
    ) -> Arc<TokenCoordinator> {
        Arc::new(TokenCoordinator::new(
            Arc::clone(store) as Arc<dyn PersistenceAdapter>,
            Arc::clone(refresher) as Arc<dyn RefreshTransport>,
            timeout,
        ))
    }

    async fn wait_until_refreshing(coordinator: &TokenCoordinator) {
        while !coordinator.is_refreshing() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_renewal() {
        let store = signed_in_store();
        let refresher = ScriptedRefresher::new(Script::Succeed);
        let coordinator = coordinator(&store, &refresher, Duration::from_secs(5));
        let stale = SecretString::from("access-0");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            let stale = stale.clone();
            handles.push(tokio::spawn(async move {
                coordinator.ensure_fresh_token(Some(&stale)).await
            }));
        }

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.expose_secret(), "access-1");
        }

        assert_eq!(refresher.calls(), 1);
        assert!(!coordinator.is_refreshing());
        let session = coordinator.session().unwrap().unwrap();
        assert_eq!(session.access_token().expose_secret(), "access-1");
        assert_eq!(session.refresh_token().expose_secret(), "refresh-0-next");
    }

    #[tokio::test]
    async fn test_waiters_resolve_in_arrival_order() {
        let store = signed_in_store();
        let refresher = ScriptedRefresher::new(Script::Succeed);
        let coordinator = coordinator(&store, &refresher, Duration::from_secs(5));

        let Entry::Renew(refresh_token) = coordinator.enter(None).unwrap() else {
            panic!("first caller should own the renewal");
        };

        let resolved = Arc::new(Mutex::new(Vec::new()));
        let mut waiters = Vec::new();
        for arrival in 0..4_usize {
            let task_coordinator = Arc::clone(&coordinator);
            let resolved = Arc::clone(&resolved);
            waiters.push(tokio::spawn(async move {
                let token = task_coordinator.ensure_fresh_token(None).await;
                resolved.lock().unwrap().push(arrival);
                token
            }));
            while coordinator.queued_waiters() <= arrival {
                tokio::task::yield_now().await;
            }
        }

        let token = coordinator.renew(refresh_token).await.unwrap();
        assert_eq!(token.expose_secret(), "access-1");

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap().expose_secret(), "access-1");
        }
        assert_eq!(*resolved.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_waiters_hold_outcome_before_owner_returns() {
        let store = signed_in_store();
        let refresher = ScriptedRefresher::new(Script::Succeed);
        let coordinator = coordinator(&store, &refresher, Duration::from_secs(5));

        let Entry::Renew(refresh_token) = coordinator.enter(None).unwrap() else {
            panic!("first caller should own the renewal");
        };
        let mut receivers = Vec::new();
        for queued in 1..=3 {
            let Entry::Wait(receiver) = coordinator.enter(None).unwrap() else {
                panic!("renewal in flight, caller should wait");
            };
            receivers.push(receiver);
            assert_eq!(coordinator.queued_waiters(), queued);
        }

        let owner = coordinator.renew(refresh_token).await.unwrap();

        // No yield since the owner returned: every waiter was resolved first.
        for mut receiver in receivers {
            let token = receiver.try_recv().unwrap().unwrap();
            assert_eq!(token.expose_secret(), owner.expose_secret());
        }
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_renewal_failure_rejects_everyone_and_clears_session() {
        let store = signed_in_store();
        let refresher = ScriptedRefresher::new(Script::Reject);
        let coordinator = coordinator(&store, &refresher, Duration::from_secs(5));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                coordinator.ensure_fresh_token(None).await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(
                err,
                AuthError::RefreshFailed("Authentication Failed!".to_string())
            );
        }

        assert_eq!(refresher.calls(), 1);
        assert!(coordinator.session().unwrap().is_none());
        assert!(coordinator.order_token().unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_fails_without_network() {
        let store = Arc::new(MemoryStore::new());
        store.set(storage_keys::ACCESS_TOKEN, "access-0").unwrap();
        let refresher = ScriptedRefresher::new(Script::Succeed);
        let coordinator = coordinator(&store, &refresher, Duration::from_secs(5));

        let err = coordinator.ensure_fresh_token(None).await.unwrap_err();
        assert_eq!(err, AuthError::AuthExpired);
        assert_eq!(refresher.calls(), 0);
        assert!(coordinator.access_token().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_token_returns_current_without_renewal() {
        let store = signed_in_store();
        store.set(storage_keys::ACCESS_TOKEN, "access-7").unwrap();
        let refresher = ScriptedRefresher::new(Script::Succeed);
        let coordinator = coordinator(&store, &refresher, Duration::from_secs(5));

        let token = coordinator
            .ensure_fresh_token(Some(&SecretString::from("access-6")))
            .await
            .unwrap();
        assert_eq!(token.expose_secret(), "access-7");
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_sequential_renewals_each_hit_the_network() {
        let store = signed_in_store();
        let refresher = ScriptedRefresher::new(Script::Succeed);
        let coordinator = coordinator(&store, &refresher, Duration::from_secs(5));

        let first = coordinator.ensure_fresh_token(None).await.unwrap();
        let second = coordinator.ensure_fresh_token(Some(&first)).await.unwrap();

        assert_eq!(first.expose_secret(), "access-1");
        assert_eq!(second.expose_secret(), "access-2");
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test]
    async fn test_renewal_timeout_clears_session() {
        let store = signed_in_store();
        let refresher = ScriptedRefresher::new(Script::Hang);
        let timeout = Duration::from_millis(30);
        let coordinator = coordinator(&store, &refresher, timeout);

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                wait_until_refreshing(&coordinator).await;
                coordinator.ensure_fresh_token(None).await
            })
        };

        let err = coordinator.ensure_fresh_token(None).await.unwrap_err();
        assert_eq!(err, AuthError::RefreshTimedOut(timeout));
        assert_eq!(
            waiter.await.unwrap().unwrap_err(),
            AuthError::RefreshTimedOut(timeout)
        );
        assert!(coordinator.session().unwrap().is_none());
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_dropped_owner_cancels_waiters() {
        let store = signed_in_store();
        let refresher = ScriptedRefresher::new(Script::Hang);
        let coordinator = coordinator(&store, &refresher, Duration::from_secs(60));

        let owner = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.ensure_fresh_token(None).await })
        };
        wait_until_refreshing(&coordinator).await;

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.ensure_fresh_token(None).await })
        };
        while coordinator.queued_waiters() == 0 {
            tokio::task::yield_now().await;
        }

        owner.abort();
        assert!(owner.await.unwrap_err().is_cancelled());

        assert_eq!(waiter.await.unwrap().unwrap_err(), AuthError::Cancelled);
        assert!(!coordinator.is_refreshing());
        // Cancellation says nothing about the refresh token; keep the session.
        assert!(coordinator.session().unwrap().is_some());
    }

    #[test]
    fn test_store_and_clear_session() {
        let store = Arc::new(MemoryStore::new());
        let refresher = ScriptedRefresher::new(Script::Succeed);
        let coordinator = coordinator(&store, &refresher, Duration::from_secs(5));

        let pair = CredentialPair::new("a1", "r1").unwrap();
        coordinator.store_session(&pair).unwrap();
        coordinator
            .set_order_token(&SecretString::from("o1"))
            .unwrap();
        assert!(coordinator.session().unwrap().is_some());
        assert_eq!(
            coordinator.order_token().unwrap().unwrap().expose_secret(),
            "o1"
        );

        coordinator.clear_session().unwrap();
        assert!(coordinator.session().unwrap().is_none());
        assert!(coordinator.order_token().unwrap().is_none());
    }
}
