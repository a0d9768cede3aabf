//! Preference route handlers.

use axum::{extract::State, Extension, Json};
use pipeline_core::preferences::{PreferenceState, PreferenceSync};

use crate::auth::CurrentSession;
use crate::state::AppState;

/// Preferences for the signed-in user, defaults when none are stored.
pub async fn get_preferences(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
) -> Json<PreferenceState> {
    let mut sync = PreferenceSync::new(state.sessions.auth(&current.token), state.preferences.clone());
    let resolved = sync.activate(&state.feed).await;
    sync.teardown();
    Json(resolved)
}
