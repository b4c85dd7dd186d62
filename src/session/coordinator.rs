//! Client-side session state machine.
//!
//! ```text
//!  Anonymous ──login──► Authenticated ──UNAUTHORIZED / logout──► Invalidating
//!      ▲                                                              │
//!      └──── redirect_completed ──── LoggedOut ◄──── cleanup done ────┘
//! ```
//!
//! Phase and epoch live in one `AtomicU64` (`epoch << 2 | phase`) so the
//! `Authenticated → Invalidating` claim is a single compare-and-swap: the first
//! observer of an `UNAUTHORIZED` response for the current epoch runs the
//! logout sequence, everyone else (and every late response from an older
//! epoch) is a no-op.

use super::{cache::ResultCache, credential::CredentialSource};
use crate::{
    notify::{Notifications, ToastKind},
    token::Principal,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, PoisonError, RwLock,
};
use thiserror::Error;
use tracing::{debug, info, instrument};

pub const SESSION_EXPIRED_TOAST: &str = "Session expired, please log in again.";
pub const SIGNED_OUT_TOAST: &str = "You have been signed out.";
pub const DEFAULT_LOGIN_PATH: &str = "/login";

const PHASE_BITS: u64 = 2;
const PHASE_MASK: u64 = 0b11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Anonymous = 0,
    Authenticated = 1,
    Invalidating = 2,
    LoggedOut = 3,
}

impl Phase {
    const fn from_bits(bits: u64) -> Self {
        match bits & PHASE_MASK {
            0 => Self::Anonymous,
            1 => Self::Authenticated,
            2 => Self::Invalidating,
            _ => Self::LoggedOut,
        }
    }
}

const fn pack(epoch: u64, phase: Phase) -> u64 {
    (epoch << PHASE_BITS) | phase as u64
}

const fn unpack(word: u64) -> (u64, Phase) {
    (word >> PHASE_BITS, Phase::from_bits(word))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticated(Principal),
    Invalidating,
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("already authenticated; log out first")]
    AlreadyAuthenticated,
    #[error("logout in progress")]
    LogoutInProgress,
}

/// Routing collaborator; redirects are fire-and-forget.
pub trait Navigator: Send + Sync {
    fn redirect(&self, path: &str);
}

/// Navigator for headless clients: records the redirect in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn redirect(&self, path: &str) {
        info!(path, "Redirecting to login");
    }
}

#[derive(Debug, Clone, Copy)]
enum LogoutCause {
    Unauthorized,
    User,
}

pub struct SessionCoordinator {
    word: AtomicU64,
    principal: RwLock<Option<Principal>>,
    credentials: Arc<dyn CredentialSource>,
    cache: Arc<ResultCache>,
    notifications: Arc<Notifications>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (epoch, phase) = unpack(self.word.load(Ordering::Acquire));
        f.debug_struct("SessionCoordinator")
            .field("epoch", &epoch)
            .field("phase", &phase)
            .field("login_path", &self.login_path)
            .finish_non_exhaustive()
    }
}

impl SessionCoordinator {
    #[must_use]
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        cache: Arc<ResultCache>,
        notifications: Arc<Notifications>,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
    ) -> Self {
        Self {
            word: AtomicU64::new(pack(0, Phase::Anonymous)),
            principal: RwLock::new(None),
            credentials,
            cache,
            notifications,
            navigator,
            login_path: login_path.into(),
        }
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        unpack(self.word.load(Ordering::Acquire)).0
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        unpack(self.word.load(Ordering::Acquire)).1
    }

    /// Current epoch and whether the session is authenticated under it.
    #[must_use]
    pub fn snapshot(&self) -> (u64, bool) {
        let (epoch, phase) = unpack(self.word.load(Ordering::Acquire));
        (epoch, phase == Phase::Authenticated)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.phase() == Phase::Authenticated
    }

    #[must_use]
    pub fn principal(&self) -> Option<Principal> {
        self.principal
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        let principal = self.principal.read().unwrap_or_else(PoisonError::into_inner);
        match self.phase() {
            Phase::Anonymous => SessionState::Anonymous,
            Phase::Authenticated => principal
                .clone()
                .map_or(SessionState::Anonymous, SessionState::Authenticated),
            Phase::Invalidating => SessionState::Invalidating,
            Phase::LoggedOut => SessionState::LoggedOut,
        }
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn credentials(&self) -> Arc<dyn CredentialSource> {
        Arc::clone(&self.credentials)
    }

    #[must_use]
    pub fn cache(&self) -> Arc<ResultCache> {
        Arc::clone(&self.cache)
    }

    #[must_use]
    pub fn notifications(&self) -> Arc<Notifications> {
        Arc::clone(&self.notifications)
    }

    /// Enter `Authenticated` from `Anonymous` or `LoggedOut`; returns the new epoch.
    ///
    /// # Errors
    /// [`SessionError::AlreadyAuthenticated`] or [`SessionError::LogoutInProgress`].
    pub fn login(&self, principal: Principal) -> Result<u64, SessionError> {
        let mut slot = self.principal.write().unwrap_or_else(PoisonError::into_inner);
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let (epoch, phase) = unpack(current);
            match phase {
                Phase::Authenticated => return Err(SessionError::AlreadyAuthenticated),
                Phase::Invalidating => return Err(SessionError::LogoutInProgress),
                Phase::Anonymous | Phase::LoggedOut => {}
            }
            let next = pack(epoch + 1, Phase::Authenticated);
            match self
                .word
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    info!(subject = %principal.subject, epoch = epoch + 1, "Session started");
                    *slot = Some(principal);
                    return Ok(epoch + 1);
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// React to an `UNAUTHORIZED` response for a call sent under `epoch`.
    ///
    /// Returns `true` only for the caller that ran the logout sequence.
    #[instrument(skip(self))]
    pub async fn handle_unauthorized(&self, epoch: u64) -> bool {
        if !self.claim(epoch) {
            debug!("Unauthorized signal ignored; session already handled or stale");
            return false;
        }
        self.finish(epoch + 1, LogoutCause::Unauthorized).await;
        true
    }

    /// User-initiated logout. Returns `false` when not authenticated.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> bool {
        let (epoch, authenticated) = self.snapshot();
        if !authenticated || !self.claim(epoch) {
            return false;
        }
        self.finish(epoch + 1, LogoutCause::User).await;
        true
    }

    /// `LoggedOut → Anonymous` once the login surface is showing.
    pub fn redirect_completed(&self) -> bool {
        let current = self.word.load(Ordering::Acquire);
        let (epoch, phase) = unpack(current);
        phase == Phase::LoggedOut
            && self
                .word
                .compare_exchange(
                    current,
                    pack(epoch, Phase::Anonymous),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
    }

    fn claim(&self, epoch: u64) -> bool {
        self.word
            .compare_exchange(
                pack(epoch, Phase::Authenticated),
                pack(epoch + 1, Phase::Invalidating),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    async fn finish(&self, epoch: u64, cause: LogoutCause) {
        self.principal
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        self.credentials.clear().await;
        self.cache.invalidate_all();

        match cause {
            LogoutCause::Unauthorized => {
                info!(epoch, "Session expired; logging out");
                self.notifications
                    .enqueue(ToastKind::Warning, SESSION_EXPIRED_TOAST);
            }
            LogoutCause::User => {
                info!(epoch, "Signed out");
                self.notifications.enqueue(ToastKind::Info, SIGNED_OUT_TOAST);
            }
        }

        self.navigator.redirect(&self.login_path);

        self.word
            .store(pack(epoch, Phase::LoggedOut), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::credential::{Credential, CredentialError};
    use crate::BoxFuture;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    #[derive(Default)]
    struct CountingCredentials {
        clears: AtomicUsize,
    }

    impl CredentialSource for CountingCredentials {
        fn refresh(&self, _force: bool) -> BoxFuture<'_, Result<Credential, CredentialError>> {
            Box::pin(async { Err(CredentialError::NotSignedIn) })
        }

        fn clear(&self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                tokio::task::yield_now().await;
                self.clears.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[derive(Default)]
    struct RecordingNavigator {
        paths: Mutex<Vec<String>>,
    }

    impl Navigator for RecordingNavigator {
        fn redirect(&self, path: &str) {
            self.paths
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(path.to_string());
        }
    }

    struct Harness {
        coordinator: Arc<SessionCoordinator>,
        credentials: Arc<CountingCredentials>,
        cache: Arc<ResultCache>,
        notifications: Arc<Notifications>,
        navigator: Arc<RecordingNavigator>,
    }

    fn harness() -> Harness {
        let credentials = Arc::new(CountingCredentials::default());
        let cache = Arc::new(ResultCache::new());
        let notifications = Arc::new(Notifications::new());
        let navigator = Arc::new(RecordingNavigator::default());
        let coordinator = Arc::new(SessionCoordinator::new(
            credentials.clone(),
            cache.clone(),
            notifications.clone(),
            navigator.clone(),
            DEFAULT_LOGIN_PATH,
        ));
        Harness {
            coordinator,
            credentials,
            cache,
            notifications,
            navigator,
        }
    }

    fn principal() -> Principal {
        Principal {
            subject: "user-9".to_string(),
            email: None,
            name: None,
            issued_at: 0,
            expires_at: 0,
        }
    }

    #[test]
    fn packing() {
        for phase in [
            Phase::Anonymous,
            Phase::Authenticated,
            Phase::Invalidating,
            Phase::LoggedOut,
        ] {
            assert_eq!(unpack(pack(41, phase)), (41, phase));
        }
    }

    #[test]
    fn login_transitions() {
        let h = harness();
        assert_eq!(h.coordinator.state(), SessionState::Anonymous);

        assert_eq!(h.coordinator.login(principal()), Ok(1));
        assert_eq!(h.coordinator.state(), SessionState::Authenticated(principal()));
        assert_eq!(
            h.coordinator.login(principal()),
            Err(SessionError::AlreadyAuthenticated)
        );
    }

    #[tokio::test]
    async fn concurrent_unauthorized_logs_out_once() {
        let h = harness();
        let epoch = h.coordinator.login(principal()).unwrap_or_default();
        h.cache.put("notes.list", &serde_json::Value::Null, epoch, serde_json::json!([]));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let coordinator = h.coordinator.clone();
            tasks.push(tokio::spawn(async move {
                coordinator.handle_unauthorized(epoch).await
            }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap_or(false) {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(h.coordinator.state(), SessionState::LoggedOut);
        assert_eq!(h.credentials.clears.load(Ordering::SeqCst), 1);
        assert_eq!(h.cache.invalidation_count(), 1);
        assert!(h.cache.is_empty());
        assert_eq!(
            h.navigator.paths.lock().unwrap_or_else(PoisonError::into_inner).clone(),
            vec!["/login".to_string()]
        );

        let toasts = h.notifications.pending();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].kind, ToastKind::Warning);
        assert_eq!(toasts[0].message, SESSION_EXPIRED_TOAST);
    }

    #[tokio::test]
    async fn late_signal_from_older_epoch_is_ignored() {
        let h = harness();
        let old = h.coordinator.login(principal()).unwrap_or_default();
        assert!(h.coordinator.handle_unauthorized(old).await);
        assert!(h.coordinator.redirect_completed());
        assert_eq!(h.coordinator.state(), SessionState::Anonymous);

        let current = h.coordinator.login(principal()).unwrap_or_default();
        assert!(current > old);

        assert!(!h.coordinator.handle_unauthorized(old).await);
        assert!(h.coordinator.is_authenticated());
        assert_eq!(h.cache.invalidation_count(), 1);
        assert_eq!(h.notifications.pending().len(), 1);
    }

    #[tokio::test]
    async fn unauthorized_while_anonymous_is_noop() {
        let h = harness();
        assert!(!h.coordinator.handle_unauthorized(h.coordinator.epoch()).await);
        assert_eq!(h.coordinator.state(), SessionState::Anonymous);
        assert_eq!(h.cache.invalidation_count(), 0);
        assert!(h.navigator.paths.lock().unwrap_or_else(PoisonError::into_inner).is_empty());
    }

    #[tokio::test]
    async fn user_logout_shows_info_toast() {
        let h = harness();
        assert!(!h.coordinator.logout().await);

        h.coordinator.login(principal()).unwrap_or_default();
        assert!(h.coordinator.logout().await);
        assert!(!h.coordinator.logout().await);

        assert_eq!(h.coordinator.state(), SessionState::LoggedOut);
        assert_eq!(h.coordinator.principal(), None);
        let toasts = h.notifications.pending();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].kind, ToastKind::Info);
        assert_eq!(toasts[0].message, SIGNED_OUT_TOAST);

        // Logging back in straight from LoggedOut is allowed.
        assert!(h.coordinator.login(principal()).is_ok());
        assert!(!h.coordinator.redirect_completed());
    }
}
