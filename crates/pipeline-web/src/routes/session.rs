//! Session route handlers.

use axum::{extract::State, http::StatusCode, Extension, Json};
use pipeline_core::service::{AuthService, LocalStorage};
use pipeline_core::session::Session;
use pipeline_core::PipelineError;
use tracing::info;

use crate::auth::CurrentSession;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn current_session(Extension(current): Extension<CurrentSession>) -> Json<Session> {
    Json(current.session)
}

pub async fn sign_out(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
) -> Result<StatusCode, ApiError> {
    let storage = state.sessions.storage(&current.token);
    storage
        .remove(&state.guard.storage_key)
        .await
        .map_err(PipelineError::from)?;
    state
        .sessions
        .auth(&current.token)
        .sign_out()
        .await
        .map_err(PipelineError::from)?;
    info!(user_id = %current.session.user_id, "Signed out");
    Ok(StatusCode::NO_CONTENT)
}
