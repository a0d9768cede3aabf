//! Resolves the active user's preferences and keeps them current.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::Preferences;
use crate::error::PipelineError;
use crate::notify::{ChangeFeed, Subscription, PREFERENCES_TABLE};
use crate::service::{AuthService, PreferenceStore};

/// What presentation sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreferenceState {
    pub loading: bool,
    pub preferences: Option<Preferences>,
}

impl PreferenceState {
    fn loading() -> Self {
        Self {
            loading: true,
            preferences: None,
        }
    }

    fn resolved(preferences: Option<Preferences>) -> Self {
        Self {
            loading: false,
            preferences,
        }
    }
}

/// Single writer of the preference state.
pub struct PreferenceSync {
    auth: Arc<dyn AuthService>,
    store: Arc<dyn PreferenceStore>,
    state: Arc<watch::Sender<PreferenceState>>,
    subscription: Option<Subscription>,
}

impl PreferenceSync {
    pub fn new(auth: Arc<dyn AuthService>, store: Arc<dyn PreferenceStore>) -> Self {
        let (state, _rx) = watch::channel(PreferenceState::loading());
        Self {
            auth,
            store,
            state: Arc::new(state),
            subscription: None,
        }
    }

    pub fn state(&self) -> PreferenceState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PreferenceState> {
        self.state.subscribe()
    }

    /// Resolve preferences for the signed-in user and follow later changes.
    pub async fn activate(&mut self, feed: &dyn ChangeFeed) -> PreferenceState {
        self.teardown();
        // Changes made while the first fetch is in flight stay queued here.
        let mut stream = feed.subscribe(PREFERENCES_TABLE);

        let user_id = match self.auth.current_session().await {
            Ok(Some(session)) => session.user_id,
            Ok(None) => {
                debug!("No session, preferences not loaded");
                self.state.send_replace(PreferenceState::resolved(None));
                return self.state();
            }
            Err(e) => {
                warn!(error = %e, "Session lookup failed, preferences not loaded");
                self.state.send_replace(PreferenceState::resolved(None));
                return self.state();
            }
        };

        let prefs = resolve(self.store.as_ref(), &user_id).await;
        self.state.send_replace(PreferenceState::resolved(Some(prefs)));

        let store = self.store.clone();
        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                debug!(op = ?event.op, user_id = %user_id, "Preferences changed, re-fetching");
                let prefs = resolve(store.as_ref(), &user_id).await;
                state.send_replace(PreferenceState::resolved(Some(prefs)));
            }
        });
        self.subscription = Some(Subscription::new("preferences", handle));

        self.state()
    }

    /// Stop following changes.
    pub fn teardown(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.as_ref().is_some_and(Subscription::is_active)
    }
}

/// Fetch the user's record, falling back to defaults when it is missing or
/// the store fails.
async fn resolve(store: &dyn PreferenceStore, user_id: &str) -> Preferences {
    match store.fetch_preferences(user_id).await {
        Ok(Some(prefs)) => prefs,
        Ok(None) => {
            debug!(user_id = %user_id, "No preference record, using defaults");
            Preferences::default()
        }
        Err(e) => {
            let err = PipelineError::PreferenceFetchFailed(e.to_string());
            warn!(user_id = %user_id, error = %err, "Falling back to default preferences");
            Preferences::default()
        }
    }
}
