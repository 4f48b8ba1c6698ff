/*
 *  credential/mod.rs
 *
 *  wallboard - worth a glance
 *  (c) 2020-26 Stuart Hunter
 *
 *  OAuth2 credential lifecycle: restore, sign-in, proactive renewal and
 *  revocation recovery for the photo widget
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

pub mod provider;
pub mod store;

pub use provider::{AuthGrant, AuthRequest, AuthorizationProvider, RefreshTokenGrant, Unconfigured};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StoreError};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::PhotosConfig;
use crate::error::AuthError;
use crate::timebase::{Clock, SystemClock};

/// Bearer token plus its absolute expiry (ms since epoch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub expires_at: i64,
}

impl Credential {
    pub fn from_grant(grant: &AuthGrant, now_ms: i64) -> Self {
        let lifetime_ms = i64::try_from(grant.expires_in_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        Self { access_token: grant.access_token.clone(), expires_at: now_ms.saturating_add(lifetime_ms) }
    }

    pub fn is_usable_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at
    }

    pub fn remaining(&self, now_ms: i64) -> Duration {
        Duration::from_millis(u64::try_from(self.expires_at - now_ms).unwrap_or(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    SignedOut,
    Authenticating,
    Authenticated,
    Renewing,
    Revoked,
}

/// How long to wait before renewing a credential with `lifetime` left.
///
/// Lifetimes shorter than the margin renew at their halfway point.
pub fn renewal_delay(lifetime: Duration, renew_before_expiry: Duration) -> Duration {
    if lifetime > renew_before_expiry {
        lifetime - renew_before_expiry
    } else {
        lifetime / 2
    }
}

struct Inner {
    state: AuthState,
    credential: Option<Credential>,
    /// Bumped whenever an outstanding flow result must be thrown away.
    epoch: u64,
    renewal: Option<JoinHandle<()>>,
    renewal_seq: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<AuthState>,
    store: Arc<dyn CredentialStore>,
    provider: Arc<dyn AuthorizationProvider>,
    clock: Arc<dyn Clock>,
    renew_before_expiry: Duration,
}

/// Owns the photo credential. The only writer of the credential store.
#[derive(Clone)]
pub struct CredentialManager {
    shared: Arc<Shared>,
}

impl CredentialManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn AuthorizationProvider>,
        renew_before_expiry: Duration,
    ) -> Self {
        Self::with_clock(store, provider, renew_before_expiry, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn AuthorizationProvider>,
        renew_before_expiry: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state_tx, _) = watch::channel(AuthState::SignedOut);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: AuthState::SignedOut,
                    credential: None,
                    epoch: 0,
                    renewal: None,
                    renewal_seq: 0,
                }),
                state_tx,
                store,
                provider,
                clock,
                renew_before_expiry,
            }),
        }
    }

    /// File-backed store plus the refresh-token grant, or an `Unconfigured`
    /// provider when the client credentials are incomplete.
    pub fn from_config(cfg: &PhotosConfig) -> Self {
        let path = cfg.credential_path.clone().unwrap_or_else(FileCredentialStore::default_path);
        let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(path));
        let provider: Arc<dyn AuthorizationProvider> = match RefreshTokenGrant::new(
            cfg.token_url.as_str(),
            cfg.client_id.clone().unwrap_or_default(),
            cfg.client_secret.clone().unwrap_or_default(),
            cfg.refresh_token.clone().unwrap_or_default(),
        ) {
            Ok(grant) => Arc::new(grant),
            Err(AuthError::NotConfigured(missing)) => {
                info!("Photo library not configured ({} missing)", missing);
                Arc::new(Unconfigured::new(missing))
            }
            Err(e) => {
                warn!("Photo authorization unavailable: {}", e);
                Arc::new(Unconfigured::new(e.to_string()))
            }
        };
        Self::new(store, provider, Duration::from_secs(cfg.renew_before_expiry_secs))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, next: AuthState) {
        if inner.state != next {
            info!("Photos auth: {:?} -> {:?}", inner.state, next);
            inner.state = next;
            self.shared.state_tx.send_replace(next);
        }
    }

    fn clear_store(&self) {
        if let Err(e) = self.shared.store.clear() {
            warn!("Failed to clear saved credential: {}", e);
        }
    }

    fn cancel_renewal(&self, inner: &mut Inner) {
        inner.renewal_seq += 1;
        if let Some(handle) = inner.renewal.take() {
            debug!("Pending token renewal cancelled");
            handle.abort();
        }
    }

    /// Replace any pending renewal with one due `renew_before_expiry` ahead
    /// of a credential that has `lifetime` left.
    fn schedule_renewal(&self, inner: &mut Inner, lifetime: Duration) {
        self.cancel_renewal(inner);
        let delay = renewal_delay(lifetime, self.shared.renew_before_expiry);
        let seq = inner.renewal_seq;
        let this = self.clone();
        debug!("Token renewal scheduled in {:?}", delay);
        inner.renewal = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.renew(seq).await;
        }));
    }

    fn accept_grant(&self, inner: &mut Inner, grant: &AuthGrant) {
        let credential = Credential::from_grant(grant, self.shared.clock.now_ms());
        // saves and clears run under the lock so the file follows state order
        if let Err(e) = self.shared.store.save(&credential) {
            warn!("Failed to persist credential: {}", e);
        }
        inner.credential = Some(credential);
        self.set_state(inner, AuthState::Authenticated);
        self.schedule_renewal(inner, Duration::from_secs(grant.expires_in_seconds));
    }

    /// Pick up a persisted credential at startup.
    pub fn restore(&self) -> AuthState {
        let loaded = match self.shared.store.load() {
            Ok(c) => c,
            Err(e) => {
                warn!("Discarding unreadable saved credential: {}", e);
                self.clear_store();
                None
            }
        };

        let now = self.shared.clock.now_ms();
        let mut inner = self.lock();
        if inner.state != AuthState::SignedOut {
            debug!("restore() ignored in state {:?}", inner.state);
            return inner.state;
        }
        match loaded {
            Some(credential) if credential.is_usable_at(now) => {
                let remaining = credential.remaining(now);
                info!("Restored saved credential, {}s left", remaining.as_secs());
                inner.credential = Some(credential);
                self.set_state(&mut inner, AuthState::Authenticated);
                self.schedule_renewal(&mut inner, remaining);
            }
            Some(_) => {
                info!("Saved credential has expired, discarding");
                self.clear_store();
            }
            None => debug!("No saved credential"),
        }
        inner.state
    }

    /// Run the authorization flow and adopt the resulting credential.
    pub async fn sign_in(&self) -> Result<(), AuthError> {
        let (epoch, prior) = {
            let mut inner = self.lock();
            if matches!(inner.state, AuthState::Authenticating | AuthState::Renewing) {
                return Err(AuthError::InProgress);
            }
            self.cancel_renewal(&mut inner);
            inner.epoch += 1;
            let prior = inner.state;
            self.set_state(&mut inner, AuthState::Authenticating);
            (inner.epoch, prior)
        };

        let mut pending = PendingSignIn { manager: self, epoch, prior, settled: false };
        let result = self.shared.provider.authorize(AuthRequest::SignIn).await;
        pending.settled = true;

        let mut inner = self.lock();
        if inner.epoch != epoch {
            debug!("Sign-in result discarded");
            return Err(AuthError::Superseded);
        }
        match result {
            Ok(grant) => {
                info!("Signed in, token valid for {}s", grant.expires_in_seconds);
                self.accept_grant(&mut inner, &grant);
                Ok(())
            }
            Err(e) => {
                error!("Sign in failed: {}", e);
                inner.credential = None;
                self.clear_store();
                let next = if prior == AuthState::Revoked { AuthState::Revoked } else { AuthState::SignedOut };
                self.set_state(&mut inner, next);
                Err(e)
            }
        }
    }

    async fn renew(&self, seq: u64) {
        let epoch = {
            let mut inner = self.lock();
            if inner.renewal_seq != seq || inner.state != AuthState::Authenticated {
                return;
            }
            // this task is the pending renewal; detach rather than abort it
            inner.renewal = None;
            self.set_state(&mut inner, AuthState::Renewing);
            inner.epoch
        };

        let result = self.shared.provider.authorize(AuthRequest::Renewal).await;

        let mut inner = self.lock();
        if inner.epoch != epoch {
            debug!("Renewal result discarded");
            return;
        }
        match result {
            Ok(grant) => {
                info!("Token renewed, valid for {}s", grant.expires_in_seconds);
                self.accept_grant(&mut inner, &grant);
            }
            Err(e) => {
                error!("Token renewal failed, re-authentication required: {}", e);
                inner.credential = None;
                self.clear_store();
                self.set_state(&mut inner, AuthState::Revoked);
            }
        }
    }

    /// A downstream API rejected the token (401/403).
    pub fn on_unauthorized(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        self.cancel_renewal(&mut inner);
        if inner.credential.take().is_some() || inner.state != AuthState::SignedOut {
            warn!("Credential rejected by API, signing out");
        }
        self.clear_store();
        self.set_state(&mut inner, AuthState::Revoked);
        self.set_state(&mut inner, AuthState::SignedOut);
    }

    pub fn sign_out(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        self.cancel_renewal(&mut inner);
        inner.credential = None;
        self.clear_store();
        self.set_state(&mut inner, AuthState::SignedOut);
    }

    /// Cancel the renewal timer and discard any outstanding flow result.
    /// A credential already held is kept.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        self.cancel_renewal(&mut inner);
        match inner.state {
            AuthState::Authenticating => self.set_state(&mut inner, AuthState::SignedOut),
            AuthState::Renewing => self.set_state(&mut inner, AuthState::Authenticated),
            _ => {}
        }
    }

    fn usable<'a>(&self, inner: &'a Inner) -> Option<&'a Credential> {
        if !matches!(inner.state, AuthState::Authenticated | AuthState::Renewing) {
            return None;
        }
        let now = self.shared.clock.now_ms();
        inner.credential.as_ref().filter(|c| c.is_usable_at(now))
    }

    pub fn is_authenticated(&self) -> bool {
        let inner = self.lock();
        self.usable(&inner).is_some()
    }

    /// Snapshot of the current bearer token, if one is usable.
    pub fn access_token(&self) -> Option<String> {
        let inner = self.lock();
        self.usable(&inner).map(|c| c.access_token.clone())
    }

    pub fn state(&self) -> AuthState {
        self.lock().state
    }

    pub fn has_pending_renewal(&self) -> bool {
        self.lock().renewal.is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.shared.state_tx.subscribe()
    }
}

/// Rolls `Authenticating` back when a sign-in future is dropped before the
/// provider answers.
struct PendingSignIn<'a> {
    manager: &'a CredentialManager,
    epoch: u64,
    prior: AuthState,
    settled: bool,
}

impl Drop for PendingSignIn<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut inner = self.manager.lock();
        if inner.epoch != self.epoch || inner.state != AuthState::Authenticating {
            return;
        }
        debug!("Sign-in abandoned");
        inner.epoch += 1;
        inner.credential = None;
        let next = if self.prior == AuthState::Revoked { AuthState::Revoked } else { AuthState::SignedOut };
        self.manager.set_state(&mut inner, next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timebase::ManualClock;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const T0: i64 = 1_700_000_000_000;

    #[derive(Default)]
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<AuthGrant, AuthError>>>,
        calls: AtomicUsize,
        gated: AtomicBool,
        gate: Notify,
    }

    impl ScriptedProvider {
        fn new(outcomes: Vec<Result<AuthGrant, AuthError>>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(outcomes.into()), ..Default::default() })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthorizationProvider for ScriptedProvider {
        async fn authorize(&self, _request: AuthRequest) -> Result<AuthGrant, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.gated.load(Ordering::SeqCst) {
                self.gate.notified().await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(AuthError::Flow("script exhausted".into())))
        }
    }

    fn grant(token: &str, secs: u64) -> Result<AuthGrant, AuthError> {
        Ok(AuthGrant { access_token: token.into(), expires_in_seconds: secs })
    }

    struct Fixture {
        manager: CredentialManager,
        store: Arc<MemoryCredentialStore>,
        provider: Arc<ScriptedProvider>,
        clock: Arc<ManualClock>,
    }

    fn fixture(store: MemoryCredentialStore, outcomes: Vec<Result<AuthGrant, AuthError>>, renew_before: Duration) -> Fixture {
        let store = Arc::new(store);
        let provider = ScriptedProvider::new(outcomes);
        let clock = Arc::new(ManualClock::new(T0));
        let manager = CredentialManager::with_clock(store.clone(), provider.clone(), renew_before, clock.clone());
        Fixture { manager, store, provider, clock }
    }

    fn stored(token: &str, expires_at: i64) -> MemoryCredentialStore {
        let store = MemoryCredentialStore::new();
        store.save(&Credential { access_token: token.into(), expires_at }).unwrap();
        store
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_renewal_delay() {
        assert_eq!(renewal_delay(Duration::from_secs(3600), Duration::from_secs(300)), Duration::from_secs(3300));
        assert_eq!(renewal_delay(Duration::from_secs(10), Duration::from_secs(5)), Duration::from_secs(5));
        assert_eq!(renewal_delay(Duration::from_secs(60), Duration::from_secs(300)), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_valid_credential() {
        let f = fixture(stored("saved", T0 + 60_000), vec![], Duration::from_secs(5));
        assert_eq!(f.manager.restore(), AuthState::Authenticated);
        assert!(f.manager.is_authenticated());
        assert_eq!(f.manager.access_token().as_deref(), Some("saved"));
        assert!(f.manager.has_pending_renewal());
        assert_eq!(f.provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_expired_credential_clears_store() {
        let f = fixture(stored("old", T0 - 1), vec![], Duration::from_secs(5));
        assert_eq!(f.manager.restore(), AuthState::SignedOut);
        assert!(!f.manager.is_authenticated());
        assert!(f.store.raw().is_none());
        assert!(!f.manager.has_pending_renewal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_corrupt_credential_clears_store() {
        let f = fixture(MemoryCredentialStore::with_raw("{\"accessToken\":"), vec![], Duration::from_secs(5));
        assert_eq!(f.manager.restore(), AuthState::SignedOut);
        assert!(f.store.raw().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_in_persists_and_authenticates() {
        let f = fixture(MemoryCredentialStore::new(), vec![grant("fresh", 3600)], Duration::from_secs(300));
        let mut states = f.manager.subscribe();

        f.manager.sign_in().await.unwrap();

        assert_eq!(f.manager.state(), AuthState::Authenticated);
        assert_eq!(*states.borrow_and_update(), AuthState::Authenticated);
        assert_eq!(
            f.store.load().unwrap(),
            Some(Credential { access_token: "fresh".into(), expires_at: T0 + 3_600_000 })
        );
        assert!(f.manager.has_pending_renewal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_fires_at_margin_not_before() {
        let f = fixture(
            MemoryCredentialStore::new(),
            vec![grant("first", 10), grant("second", 10)],
            Duration::from_millis(5000),
        );
        f.manager.sign_in().await.unwrap();
        assert_eq!(f.provider.calls(), 1);

        tokio::time::advance(Duration::from_millis(4900)).await;
        settle().await;
        assert_eq!(f.provider.calls(), 1);
        assert_eq!(f.manager.access_token().as_deref(), Some("first"));

        f.clock.advance_ms(5_000);
        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(f.provider.calls(), 2);
        assert_eq!(f.manager.state(), AuthState::Authenticated);
        assert_eq!(f.manager.access_token().as_deref(), Some("second"));
        assert_eq!(f.store.load().unwrap().unwrap().expires_at, T0 + 5_000 + 10_000);
        assert!(f.manager.has_pending_renewal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_revokes_without_retry() {
        let f = fixture(
            MemoryCredentialStore::new(),
            vec![grant("first", 10), Err(AuthError::Flow("consent withdrawn".into()))],
            Duration::from_secs(5),
        );
        f.manager.sign_in().await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(f.manager.state(), AuthState::Revoked);
        assert!(!f.manager.is_authenticated());
        assert!(f.store.raw().is_none());
        assert!(!f.manager.has_pending_renewal());

        tokio::time::advance(Duration::from_secs(3600)).await;
        settle().await;
        assert_eq!(f.provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_in_after_revocation_recovers() {
        let f = fixture(
            MemoryCredentialStore::new(),
            vec![grant("first", 10), Err(AuthError::Flow("expired".into())), grant("again", 3600)],
            Duration::from_secs(5),
        );
        f.manager.sign_in().await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(f.manager.state(), AuthState::Revoked);

        f.manager.sign_in().await.unwrap();
        assert_eq!(f.manager.access_token().as_deref(), Some("again"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_unauthorized_signs_out_and_cancels_renewal() {
        let f = fixture(MemoryCredentialStore::new(), vec![grant("first", 10)], Duration::from_secs(5));
        f.manager.sign_in().await.unwrap();
        assert!(f.manager.has_pending_renewal());

        f.manager.on_unauthorized();

        assert_eq!(f.manager.state(), AuthState::SignedOut);
        assert!(!f.manager.is_authenticated());
        assert!(f.manager.access_token().is_none());
        assert!(!f.manager.has_pending_renewal());
        assert!(f.store.raw().is_none());

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(f.provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_unauthorized_during_renewal_discards_result() {
        let f = fixture(
            MemoryCredentialStore::new(),
            vec![grant("first", 10), grant("late", 10)],
            Duration::from_secs(5),
        );
        f.manager.sign_in().await.unwrap();
        f.provider.gated.store(true, Ordering::SeqCst);

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(f.manager.state(), AuthState::Renewing);
        assert!(f.manager.is_authenticated());

        f.manager.on_unauthorized();
        f.provider.gate.notify_one();
        settle().await;

        assert_eq!(f.manager.state(), AuthState::SignedOut);
        assert!(f.manager.access_token().is_none());
        assert!(f.store.raw().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_in_failure_is_typed_and_signed_out() {
        let f = fixture(
            MemoryCredentialStore::new(),
            vec![Err(AuthError::Flow("access_denied".into()))],
            Duration::from_secs(5),
        );
        let err = f.manager.sign_in().await.unwrap_err();
        assert_eq!(err, AuthError::Flow("access_denied".into()));
        assert_eq!(f.manager.state(), AuthState::SignedOut);
        assert!(!f.manager.has_pending_renewal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sign_in_rejected() {
        let f = fixture(MemoryCredentialStore::new(), vec![grant("only", 3600)], Duration::from_secs(5));
        f.provider.gated.store(true, Ordering::SeqCst);

        let manager = f.manager.clone();
        let first = tokio::spawn(async move { manager.sign_in().await });
        settle().await;
        assert_eq!(f.manager.state(), AuthState::Authenticating);
        assert_eq!(f.manager.sign_in().await, Err(AuthError::InProgress));

        f.provider.gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(f.provider.calls(), 1);
        assert!(f.manager.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_is_not_usable() {
        let f = fixture(MemoryCredentialStore::new(), vec![grant("short", 3600)], Duration::from_secs(300));
        f.manager.sign_in().await.unwrap();
        f.manager.shutdown();
        f.clock.advance_ms(3_600_000);
        assert_eq!(f.manager.state(), AuthState::Authenticated);
        assert!(!f.manager.is_authenticated());
        assert!(f.manager.access_token().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_clears_everything() {
        let f = fixture(stored("saved", T0 + 60_000), vec![], Duration::from_secs(5));
        f.manager.restore();
        f.manager.sign_out();
        assert_eq!(f.manager.state(), AuthState::SignedOut);
        assert!(f.store.raw().is_none());
        assert!(!f.manager.has_pending_renewal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_sign_in_replaces_pending_renewal() {
        let f = fixture(
            MemoryCredentialStore::new(),
            vec![grant("first", 10), grant("second", 10), grant("renewed", 10)],
            Duration::from_secs(5),
        );
        f.manager.sign_in().await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        f.clock.advance_ms(2_000);
        f.manager.sign_in().await.unwrap();
        assert_eq!(f.provider.calls(), 2);
        assert!(f.manager.has_pending_renewal());

        // the first timer would have fired at 5s
        tokio::time::advance(Duration::from_millis(3500)).await;
        settle().await;
        assert_eq!(f.provider.calls(), 2);
        assert_eq!(f.manager.access_token().as_deref(), Some("second"));

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(f.provider.calls(), 3);
        assert_eq!(f.manager.access_token().as_deref(), Some("renewed"));
        assert!(f.manager.has_pending_renewal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_outstanding_sign_in() {
        let f = fixture(MemoryCredentialStore::new(), vec![grant("late", 3600)], Duration::from_secs(300));
        f.provider.gated.store(true, Ordering::SeqCst);

        let manager = f.manager.clone();
        let outstanding = tokio::spawn(async move { manager.sign_in().await });
        settle().await;
        assert_eq!(f.manager.state(), AuthState::Authenticating);

        f.manager.shutdown();
        assert_eq!(f.manager.state(), AuthState::SignedOut);
        f.provider.gate.notify_one();

        assert_eq!(outstanding.await.unwrap(), Err(AuthError::Superseded));
        assert!(!f.manager.has_pending_renewal());
        assert!(!f.manager.is_authenticated());
        assert!(f.store.raw().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_sign_in_can_be_retried() {
        let f = fixture(MemoryCredentialStore::new(), vec![grant("retry", 3600)], Duration::from_secs(300));
        f.provider.gated.store(true, Ordering::SeqCst);

        let manager = f.manager.clone();
        let outstanding = tokio::spawn(async move { manager.sign_in().await });
        settle().await;
        assert_eq!(f.manager.state(), AuthState::Authenticating);

        outstanding.abort();
        assert!(outstanding.await.unwrap_err().is_cancelled());
        assert_eq!(f.manager.state(), AuthState::SignedOut);

        f.provider.gated.store(false, Ordering::SeqCst);
        f.manager.sign_in().await.unwrap();
        assert_eq!(f.manager.access_token().as_deref(), Some("retry"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_in_survives_store_failure() {
        struct ReadOnly;

        impl CredentialStore for ReadOnly {
            fn load(&self) -> Result<Option<Credential>, StoreError> {
                Ok(None)
            }
            fn save(&self, _credential: &Credential) -> Result<(), StoreError> {
                Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only")))
            }
            fn clear(&self) -> Result<(), StoreError> {
                Ok(())
            }
        }

        let provider = ScriptedProvider::new(vec![grant("unsaved", 3600)]);
        let manager = CredentialManager::new(Arc::new(ReadOnly), provider, Duration::from_secs(300));
        manager.sign_in().await.unwrap();
        assert_eq!(manager.state(), AuthState::Authenticated);
        assert_eq!(manager.access_token().as_deref(), Some("unsaved"));
        assert!(manager.has_pending_renewal());
        manager.shutdown();
    }
}
