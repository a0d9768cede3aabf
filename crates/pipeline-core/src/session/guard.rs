//! Session guard: `Checking -> Authorized | Unauthorized`.
//!
//! The start of a session is recorded in local storage the first time the
//! guard sees it, and the session is forced out once it is older than
//! `max_age`, whatever the auth service says. While authorized the guard
//! follows auth events and drops to `Unauthorized` on any sign-out.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::{GuardSettings, GuardState, Session};
use crate::error::{PipelineError, PipelineResult};
use crate::notify::Subscription;
use crate::service::{AuthEvent, AuthService, LocalStorage};

pub struct SessionGuard {
    auth: Arc<dyn AuthService>,
    storage: Arc<dyn LocalStorage>,
    settings: GuardSettings,
    state: Arc<watch::Sender<GuardState>>,
    /// Bumped on teardown. A follower only transitions while its own
    /// generation is current.
    generation: Arc<AtomicU64>,
    subscription: Option<Subscription>,
}

impl SessionGuard {
    pub fn new(
        auth: Arc<dyn AuthService>,
        storage: Arc<dyn LocalStorage>,
        settings: GuardSettings,
    ) -> Self {
        let (state, _rx) = watch::channel(GuardState::Checking);
        Self {
            auth,
            storage,
            settings,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            subscription: None,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<GuardState> {
        self.state.subscribe()
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    /// Run the entry check against the current time.
    pub async fn enter(&mut self) -> PipelineResult<Session> {
        self.enter_at(Utc::now()).await
    }

    /// Run the entry check as of `now`.
    pub async fn enter_at(&mut self, now: DateTime<Utc>) -> PipelineResult<Session> {
        self.teardown();
        self.state.send_replace(GuardState::Checking);
        // Events raised while the checks below are in flight stay queued here.
        let mut events = self.auth.subscribe();

        let auth_session = match self.auth.current_session().await {
            Ok(Some(s)) => s,
            Ok(None) => {
                debug!("No active session");
                return Err(self.deny(PipelineError::NotAuthenticated));
            }
            Err(e) => {
                warn!(error = %e, "Session lookup failed");
                return Err(self.deny(PipelineError::Service(e)));
            }
        };

        let started_at = self.session_start(now).await;
        let session = Session {
            user_id: auth_session.user_id,
            started_at,
        };

        let age = session.age(now);
        if age > self.settings.max_age {
            info!(
                user_id = %session.user_id,
                age_minutes = age.num_minutes(),
                "Session exceeded maximum age, signing out"
            );
            if let Err(e) = self.storage.remove(&self.settings.storage_key).await {
                warn!(error = %e, "Could not clear session start");
            }
            if let Err(e) = self.auth.sign_out().await {
                warn!(error = %e, "Sign-out request failed");
            }
            return Err(self.deny(PipelineError::SessionExpired {
                age_minutes: age.num_minutes(),
            }));
        }

        if self.ended_during_check(&mut events).await {
            info!(user_id = %session.user_id, "Signed out during session check");
            if let Err(e) = self.storage.remove(&self.settings.storage_key).await {
                warn!(error = %e, "Could not clear session start");
            }
            return Err(self.deny(PipelineError::NotAuthenticated));
        }

        debug!(user_id = %session.user_id, "Session authorized");
        self.state.send_replace(GuardState::Authorized {
            session: session.clone(),
        });
        self.subscription = Some(self.follow_auth_events(events));
        Ok(session)
    }

    /// Stop following auth events. No transition fires after this.
    pub fn teardown(&mut self) {
        let generation = &self.generation;
        // Taken under the state lock, so a follower mid-transition finishes
        // before this returns and any later one sees the new generation.
        self.state.send_if_modified(|_| {
            generation.fetch_add(1, Ordering::AcqRel);
            false
        });
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.as_ref().is_some_and(Subscription::is_active)
    }

    fn deny(&self, err: PipelineError) -> PipelineError {
        self.state.send_replace(GuardState::Unauthorized {
            redirect_to: self.settings.sign_in_path.clone(),
        });
        err
    }

    /// Read the stored start time, recording `now` when it is missing or unreadable.
    async fn session_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let key = &self.settings.storage_key;
        let stored = match self.storage.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Could not read session start");
                None
            }
        };

        let parsed = stored
            .as_deref()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        if let Some(started) = parsed {
            return started;
        }

        if stored.is_some() {
            debug!("Replacing unreadable session start");
        }
        if let Err(e) = self.storage.set(key, &now.timestamp_millis().to_string()).await {
            warn!(error = %e, "Could not record session start");
        }
        now
    }

    /// Drain what was queued while checking. True when the session ended.
    async fn ended_during_check(&self, events: &mut broadcast::Receiver<AuthEvent>) -> bool {
        let mut lagged = false;
        loop {
            match events.try_recv() {
                Ok(event) if event.ends_session() => return true,
                Ok(_) => continue,
                Err(TryRecvError::Lagged(_)) => lagged = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        lagged && matches!(self.auth.current_session().await, Ok(None))
    }

    fn follow_auth_events(&self, mut rx: broadcast::Receiver<AuthEvent>) -> Subscription {
        let auth = self.auth.clone();
        let storage = self.storage.clone();
        let state = self.state.clone();
        let generation = self.generation.clone();
        let epoch = generation.load(Ordering::Acquire);
        let key = self.settings.storage_key.clone();
        let redirect_to = self.settings.sign_in_path.clone();

        let handle = tokio::spawn(async move {
            let current = || generation.load(Ordering::Acquire) == epoch;
            loop {
                let ended = match rx.recv().await {
                    Ok(event) => event.ends_session(),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Auth events lagged, re-checking session");
                        matches!(auth.current_session().await, Ok(None))
                    }
                    Err(RecvError::Closed) => break,
                };
                if !ended {
                    continue;
                }
                if !current() {
                    break;
                }
                info!("Signed out elsewhere, leaving protected view");
                if let Err(e) = storage.remove(&key).await {
                    warn!(error = %e, "Could not clear session start");
                }
                state.send_if_modified(|s| {
                    if !current() {
                        return false;
                    }
                    *s = GuardState::Unauthorized {
                        redirect_to: redirect_to.clone(),
                    };
                    true
                });
                break;
            }
        });
        Subscription::new("auth-state", handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceResult;
    use crate::memory::{InMemoryAuthService, InMemoryLocalStorage};
    use crate::service::AuthSession;
    use crate::session::SESSION_START_KEY;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Barrier;
    use std::time::Duration as StdDuration;

    fn auth_session() -> AuthSession {
        AuthSession {
            user_id: "u1".to_string(),
            email: None,
            issued_at: Utc::now(),
        }
    }

    type Fixture = (
        SessionGuard,
        Arc<InMemoryAuthService>,
        Arc<InMemoryLocalStorage>,
        DateTime<Utc>,
    );

    async fn guard_started(hours_ago: i64) -> Fixture {
        // Whole milliseconds, matching what the guard stores.
        let now = Utc.timestamp_millis_opt(Utc::now().timestamp_millis()).unwrap();
        let auth = Arc::new(InMemoryAuthService::new(Some(auth_session())));
        let storage = Arc::new(InMemoryLocalStorage::new());
        let start = now - Duration::hours(hours_ago);
        storage
            .set(SESSION_START_KEY, &start.timestamp_millis().to_string())
            .await
            .unwrap();
        let guard = SessionGuard::new(auth.clone(), storage.clone(), GuardSettings::default());
        (guard, auth, storage, now)
    }

    /// Storage that signs the user out from elsewhere while it is read.
    struct SignOutOnRead {
        auth: Arc<InMemoryAuthService>,
        inner: InMemoryLocalStorage,
    }

    #[async_trait]
    impl LocalStorage for SignOutOnRead {
        async fn get(&self, key: &str) -> ServiceResult<Option<String>> {
            self.auth.push(AuthEvent::SignedOut).await;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> ServiceResult<()> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> ServiceResult<()> {
            self.inner.remove(key).await
        }
    }

    /// Storage whose `remove` parks its thread until the test lets it go.
    struct GatedRemove {
        inner: InMemoryLocalStorage,
        entered: Barrier,
        release: Barrier,
    }

    #[async_trait]
    impl LocalStorage for GatedRemove {
        async fn get(&self, key: &str) -> ServiceResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> ServiceResult<()> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> ServiceResult<()> {
            self.entered.wait();
            self.release.wait();
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn test_expired_session_signs_out() {
        let (mut guard, auth, storage, now) = guard_started(9).await;
        let err = guard.enter_at(now).await.unwrap_err();

        assert!(matches!(err, PipelineError::SessionExpired { age_minutes: 540 }));
        assert_eq!(auth.sign_out_count(), 1);
        assert_eq!(storage.get(SESSION_START_KEY).await.unwrap(), None);
        assert_eq!(
            guard.state(),
            GuardState::Unauthorized { redirect_to: "/login".to_string() }
        );
        assert!(!guard.is_subscribed());
    }

    #[tokio::test]
    async fn test_recent_session_authorizes() {
        let (mut guard, auth, _storage, now) = guard_started(1).await;
        let session = guard.enter_at(now).await.unwrap();

        assert_eq!(session.user_id, "u1");
        assert_eq!(session.age(now), Duration::hours(1));
        assert!(guard.state().is_authorized());
        assert_eq!(auth.sign_out_count(), 0);
        assert!(guard.is_subscribed());
    }

    #[tokio::test]
    async fn test_first_check_records_start() {
        let auth = Arc::new(InMemoryAuthService::new(Some(auth_session())));
        let storage = Arc::new(InMemoryLocalStorage::new());
        let mut guard = SessionGuard::new(auth, storage.clone(), GuardSettings::default());
        let now = Utc::now();

        let session = guard.enter_at(now).await.unwrap();
        assert_eq!(session.started_at.timestamp_millis(), now.timestamp_millis());
        assert_eq!(
            storage.get(SESSION_START_KEY).await.unwrap(),
            Some(now.timestamp_millis().to_string())
        );
    }

    #[tokio::test]
    async fn test_unreadable_start_is_replaced() {
        let auth = Arc::new(InMemoryAuthService::new(Some(auth_session())));
        let storage = Arc::new(InMemoryLocalStorage::new());
        storage.set(SESSION_START_KEY, "yesterday").await.unwrap();
        let mut guard = SessionGuard::new(auth, storage.clone(), GuardSettings::default());

        assert!(guard.enter().await.is_ok());
        let stored = storage.get(SESSION_START_KEY).await.unwrap().unwrap();
        assert!(stored.parse::<i64>().is_ok());
    }

    #[tokio::test]
    async fn test_no_session_redirects() {
        let auth = Arc::new(InMemoryAuthService::new(None));
        let storage = Arc::new(InMemoryLocalStorage::new());
        let mut guard = SessionGuard::new(auth, storage.clone(), GuardSettings::default());

        assert!(matches!(guard.enter().await, Err(PipelineError::NotAuthenticated)));
        assert_eq!(
            guard.state(),
            GuardState::Unauthorized { redirect_to: "/login".to_string() }
        );
        assert_eq!(storage.get(SESSION_START_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sign_out_event_forces_redirect() {
        let (mut guard, auth, storage, now) = guard_started(2).await;
        guard.enter_at(now).await.unwrap();
        let mut rx = guard.watch();

        auth.push(AuthEvent::SignedOut).await;
        tokio::time::timeout(StdDuration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();

        assert!(!guard.state().is_authorized());
        assert_eq!(storage.get(SESSION_START_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_event_keeps_authorization() {
        let (mut guard, auth, _storage, now) = guard_started(2).await;
        guard.enter_at(now).await.unwrap();

        auth.push(AuthEvent::TokenRefreshed(auth_session())).await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(guard.state().is_authorized());
    }

    #[tokio::test]
    async fn test_teardown_ignores_later_events() {
        let (mut guard, auth, _storage, now) = guard_started(2).await;
        guard.enter_at(now).await.unwrap();
        guard.teardown();
        tokio::task::yield_now().await;

        auth.push(AuthEvent::SessionMissing).await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(guard.state().is_authorized());
    }

    #[tokio::test]
    async fn test_sign_out_during_check_denies() {
        let auth = Arc::new(InMemoryAuthService::new(Some(auth_session())));
        let storage = Arc::new(SignOutOnRead {
            auth: auth.clone(),
            inner: InMemoryLocalStorage::new(),
        });
        let mut guard = SessionGuard::new(auth.clone(), storage.clone(), GuardSettings::default());

        let result = guard.enter().await;
        assert!(matches!(result, Err(PipelineError::NotAuthenticated)));
        assert_eq!(
            guard.state(),
            GuardState::Unauthorized { redirect_to: "/login".to_string() }
        );
        assert!(!guard.is_subscribed());
        assert_eq!(storage.inner.get(SESSION_START_KEY).await.unwrap(), None);
        assert_eq!(auth.listener_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_teardown_wins_over_sign_out_in_flight() {
        let auth = Arc::new(InMemoryAuthService::new(Some(auth_session())));
        let storage = Arc::new(GatedRemove {
            inner: InMemoryLocalStorage::new(),
            entered: Barrier::new(2),
            release: Barrier::new(2),
        });
        let mut guard = SessionGuard::new(auth.clone(), storage.clone(), GuardSettings::default());
        guard.enter().await.unwrap();

        auth.push(AuthEvent::SignedOut).await;
        // The follower is now past the event and inside `remove`.
        storage.entered.wait();
        guard.teardown();
        storage.release.wait();

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(guard.state().is_authorized());
    }
}
