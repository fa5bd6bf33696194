//! Single source of truth for the current user and their role.
//!
//! The store is an explicit, cloneable value (no ambient global): every
//! view or component that needs identity gets a `SessionStore` handed in.
//!
//! Role resolution runs after the identity is known and is retried with
//! backoff. Each sign-in or sign-out bumps an epoch; a resolution that
//! finishes under a stale epoch is discarded, so a late role lookup can
//! never resurrect a session the user already left.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use medicare_core::{Identity, Role, Session, SessionState};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::SessionConfig;
use crate::error::{AuthError, RoleLookupError, SessionError};
use crate::remote::{Credentials, IdentityProvider, RoleSource};

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    roles: Arc<dyn RoleSource>,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    epoch: AtomicU64,
    /// `login` calls in progress; they establish the session themselves.
    logins: AtomicUsize,
    failures: broadcast::Sender<RoleLookupError>,
    /// Every identity change, in order; `None` = signed out.
    transitions: broadcast::Sender<Option<Identity>>,
}

struct LoginInFlight<'a>(&'a AtomicUsize);

impl<'a> LoginInFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoginInFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

/// Identity changes, starting with the current value.
///
/// Every sign-in and sign-out is delivered, even when several happen
/// between two calls to [`next`](Self::next).
pub struct AuthStateChanges {
    rx: broadcast::Receiver<Option<Identity>>,
    seed: Option<Option<Identity>>,
    last: Option<Identity>,
}

impl AuthStateChanges {
    /// Next identity (`None` = signed out). The first call returns the
    /// identity current at subscription; later calls wait for a change.
    /// Returns `None` once the store is gone.
    pub async fn next(&mut self) -> Option<Option<Identity>> {
        if let Some(current) = self.seed.take() {
            self.last = current.clone();
            return Some(current);
        }
        loop {
            let change = match self.rx.recv().await {
                Ok(change) => change,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Auth state listener lagged by {n} changes");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };
            // Published before the seed was read; already delivered.
            if change == self.last {
                continue;
            }
            self.last = change.clone();
            return Some(change);
        }
    }
}

impl SessionStore {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        roles: Arc<dyn RoleSource>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::SignedOut);
        let (failures, _) = broadcast::channel(16);
        let (transitions, _) = broadcast::channel(config.auth_change_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                provider,
                roles,
                config,
                state,
                epoch: AtomicU64::new(0),
                logins: AtomicUsize::new(0),
                failures,
                transitions,
            }),
        }
    }

    /// Latest known session. Never blocks.
    pub fn current_session(&self) -> Session {
        self.inner.state.borrow().session()
    }

    pub fn current_state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Watch the full session state (role changes included).
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn on_auth_state_change(&self) -> AuthStateChanges {
        let rx = self.inner.transitions.subscribe();
        let seed = self.inner.state.borrow().identity().cloned();
        AuthStateChanges {
            rx,
            seed: Some(seed),
            last: None,
        }
    }

    /// Role lookups that gave up, including ones started by the provider
    /// rather than by `login`.
    pub fn role_failures(&self) -> broadcast::Receiver<RoleLookupError> {
        self.inner.failures.subscribe()
    }

    /// One role lookup, no retry.
    pub async fn resolve_role(&self, identity: &Identity) -> Result<Role, RoleLookupError> {
        let raw = self
            .inner
            .roles
            .role_of(identity)
            .await
            .map_err(|cause| RoleLookupError::Remote { attempts: 1, cause })?;
        match raw {
            None => Err(RoleLookupError::Missing {
                uid: identity.uid.clone(),
            }),
            Some(raw) => Role::parse(&raw).ok_or(RoleLookupError::Unrecognized(raw)),
        }
    }

    /// Sign in, then resolve the role before returning.
    ///
    /// A rejected login leaves the session as it was. A role that cannot be
    /// resolved leaves the session signed out.
    pub async fn login(&self, credentials: &Credentials) -> Result<Identity, SessionError> {
        let _in_flight = LoginInFlight::enter(&self.inner.logins);
        let identity = self
            .inner
            .provider
            .sign_in(credentials)
            .await
            .map_err(|cause| {
                log::warn!("Login for {} rejected: {cause}", credentials.email);
                AuthError::from(cause)
            })?;
        log::info!("Signed in {}", identity.uid);
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.establish(identity.clone(), epoch).await?;
        Ok(identity)
    }

    /// Clear the session locally, then ask the provider to end it.
    /// The local part always happens; the remote part is best-effort.
    pub async fn logout(&self) {
        self.sign_out_locally();
        if let Err(e) = self.inner.provider.sign_out().await {
            log::warn!("Remote sign-out failed (local session already cleared): {e}");
        }
    }

    /// Follow the provider's identity feed (sign-ins and sign-outs made
    /// outside `login`/`logout`, token expiry, ...).
    ///
    /// Changes are checked against the provider's current identity, so a
    /// change that was already superseded when it arrives is skipped.
    pub fn attach(&self) -> JoinHandle<()> {
        let mut feed = self.inner.provider.auth_state_changes();
        let store = self.clone();
        tokio::spawn(async move {
            while let Some(change) = feed.recv().await {
                if store.inner.logins.load(Ordering::SeqCst) > 0 {
                    log::debug!("Identity change during login, left to login");
                    continue;
                }
                match change {
                    Ok(Some(identity)) => {
                        if store.current_state().identity() == Some(&identity) {
                            continue;
                        }
                        if store.inner.provider.current_identity().as_ref() != Some(&identity) {
                            log::debug!("Skipping stale sign-in of {}", identity.uid);
                            continue;
                        }
                        let dispatched = store.inner.epoch.load(Ordering::SeqCst);
                        let store = store.clone();
                        tokio::spawn(async move {
                            let Some(epoch) = store.claim_epoch(dispatched) else {
                                log::debug!("Session changed before resolving {}", identity.uid);
                                return;
                            };
                            // Failure is published on `role_failures`.
                            let _ = store.establish(identity, epoch).await;
                        });
                    }
                    Ok(None) => {
                        if store.inner.provider.current_identity().is_none() {
                            store.sign_out_locally();
                        }
                    }
                    Err(e) => {
                        log::warn!("Identity provider error, treating as signed out: {e}");
                        store.sign_out_locally();
                    }
                }
            }
            log::debug!("Identity provider feed ended");
        })
    }

    /// Always invalidates resolutions in progress, even when already signed out.
    fn sign_out_locally(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let previous = self.set_state(SessionState::SignedOut);
        if let Some(identity) = previous.identity() {
            log::info!("Signed out {}", identity.uid);
        }
    }

    /// Replace the state, announcing the change if the identity moved.
    /// The announcement goes out under the state lock, so transitions keep
    /// the order of the states they describe.
    fn set_state(&self, next: SessionState) -> SessionState {
        let mut previous = SessionState::SignedOut;
        let transitions = &self.inner.transitions;
        self.inner.state.send_modify(|state| {
            previous = std::mem::replace(state, next);
            if previous.identity() != state.identity() {
                // No listeners is fine.
                let _ = transitions.send(state.identity().cloned());
            }
        });
        previous
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.inner.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Advance the epoch only if nothing changed since `seen`.
    fn claim_epoch(&self, seen: u64) -> Option<u64> {
        self.inner
            .epoch
            .compare_exchange(seen, seen + 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| seen + 1)
    }

    /// RoleResolving → SignedIn(role), or → SignedOut once retries run out.
    /// `epoch` must have just been claimed by the caller.
    async fn establish(&self, identity: Identity, epoch: u64) -> Result<Role, RoleLookupError> {
        self.set_state(SessionState::RoleResolving {
            identity: identity.clone(),
        });

        let policy = &self.inner.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        let outcome = loop {
            match self.resolve_role(&identity).await {
                Ok(role) => break Ok(role),
                Err(RoleLookupError::Remote { cause, .. }) => {
                    log::warn!(
                        "Role lookup for {} failed (attempt {attempt}/{max_attempts}): {cause}",
                        identity.uid
                    );
                    if attempt >= max_attempts {
                        break Err(RoleLookupError::Remote {
                            attempts: attempt,
                            cause,
                        });
                    }
                    tokio::time::sleep(policy.backoff(attempt)).await;
                    if !self.is_current(epoch) {
                        break Err(RoleLookupError::Remote {
                            attempts: attempt,
                            cause,
                        });
                    }
                    attempt += 1;
                }
                Err(other) => break Err(other),
            }
        };

        if !self.is_current(epoch) {
            log::debug!("Discarding role resolution for {}: session changed", identity.uid);
            return outcome;
        }

        match outcome {
            Ok(role) => {
                log::info!("Resolved role {role} for {}", identity.uid);
                self.set_state(SessionState::SignedIn { identity, role });
                Ok(role)
            }
            Err(err) => {
                log::error!("Could not resolve role for {}: {err}", identity.uid);
                self.inner.epoch.fetch_add(1, Ordering::SeqCst);
                self.set_state(SessionState::SignedOut);
                let _ = self.inner.failures.send(err.clone());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthFailure, RemoteError};
    use crate::memory::InMemoryBackend;

    fn store(backend: &InMemoryBackend) -> SessionStore {
        SessionStore::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_initial_state_signed_out() {
        let backend = InMemoryBackend::new();
        let sessions = store(&backend);
        assert_eq!(sessions.current_state(), SessionState::SignedOut);
        assert_eq!(sessions.current_session(), Session::signed_out());
    }

    #[tokio::test]
    async fn test_login_resolves_role() {
        let backend = InMemoryBackend::new();
        backend.register_user("pat@example.com", "pw", Some("patient"));
        let sessions = store(&backend);

        let identity = sessions
            .login(&Credentials::new("pat@example.com", "pw"))
            .await
            .unwrap();
        assert_eq!(
            sessions.current_state(),
            SessionState::SignedIn {
                identity,
                role: Role::Patient
            }
        );
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let backend = InMemoryBackend::new();
        backend.register_user("pat@example.com", "pw", Some("patient"));
        let sessions = store(&backend);

        let err = sessions
            .login(&Credentials::new("pat@example.com", "wrong"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::Auth(AuthError {
                reason: AuthFailure::InvalidCredentials
            })
        );
        assert_eq!(sessions.current_state(), SessionState::SignedOut);
        assert_eq!(backend.stats().role_lookups, 0);
    }

    #[tokio::test]
    async fn test_missing_role_never_defaults() {
        let backend = InMemoryBackend::new();
        backend.register_user("new@example.com", "pw", None);
        let sessions = store(&backend);

        let err = sessions
            .login(&Credentials::new("new@example.com", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::RoleLookup(RoleLookupError::Missing { .. })));
        assert_eq!(sessions.current_state(), SessionState::SignedOut);
        // Not a transient failure: no retry
        assert_eq!(backend.stats().role_lookups, 1);
    }

    #[tokio::test]
    async fn test_unrecognized_role() {
        let backend = InMemoryBackend::new();
        backend.register_user("x@example.com", "pw", Some("superuser"));
        let sessions = store(&backend);

        let err = sessions
            .login(&Credentials::new("x@example.com", "pw"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::RoleLookup(RoleLookupError::Unrecognized("superuser".into()))
        );
    }

    #[tokio::test]
    async fn test_logout_clears_even_if_remote_fails() {
        let backend = InMemoryBackend::new();
        backend.register_user("pat@example.com", "pw", Some("patient"));
        let sessions = store(&backend);
        sessions
            .login(&Credentials::new("pat@example.com", "pw"))
            .await
            .unwrap();

        backend.fail_sign_out(RemoteError::Network("offline".into()));
        sessions.logout().await;
        assert_eq!(sessions.current_session(), Session::signed_out());
    }

    #[tokio::test]
    async fn test_auth_state_changes_fire_immediately_then_on_change() {
        let backend = InMemoryBackend::new();
        backend.register_user("pat@example.com", "pw", Some("patient"));
        let sessions = store(&backend);
        let mut changes = sessions.on_auth_state_change();

        assert_eq!(changes.next().await, Some(None));

        let identity = sessions
            .login(&Credentials::new("pat@example.com", "pw"))
            .await
            .unwrap();
        // RoleResolving and SignedIn carry the same identity: one change
        assert_eq!(changes.next().await, Some(Some(identity)));

        sessions.logout().await;
        assert_eq!(changes.next().await, Some(None));
    }

    #[tokio::test]
    async fn test_auth_state_changes_between_polls_all_delivered() {
        let backend = InMemoryBackend::new();
        backend.register_user("pat@example.com", "pw", Some("patient"));
        let sessions = store(&backend);
        let mut changes = sessions.on_auth_state_change();
        assert_eq!(changes.next().await, Some(None));

        let identity = sessions
            .login(&Credentials::new("pat@example.com", "pw"))
            .await
            .unwrap();
        sessions.logout().await;

        let wait = tokio::time::Duration::from_millis(200);
        assert_eq!(
            tokio::time::timeout(wait, changes.next()).await.unwrap(),
            Some(Some(identity))
        );
        assert_eq!(tokio::time::timeout(wait, changes.next()).await.unwrap(), Some(None));
    }

    #[tokio::test]
    async fn test_auth_state_changes_seeded_with_current_identity() {
        let backend = InMemoryBackend::new();
        backend.register_user("pat@example.com", "pw", Some("patient"));
        let sessions = store(&backend);
        let identity = sessions
            .login(&Credentials::new("pat@example.com", "pw"))
            .await
            .unwrap();

        let mut changes = sessions.on_auth_state_change();
        assert_eq!(changes.next().await, Some(Some(identity)));
        sessions.logout().await;
        assert_eq!(changes.next().await, Some(None));
    }
}
