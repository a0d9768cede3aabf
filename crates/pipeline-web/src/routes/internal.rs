//! Internal notification endpoints.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use pipeline_core::notify::{ChangeEvent, ChangeOp, CARDS_TABLE, PREFERENCES_TABLE};
use tracing::{info, warn};

pub use pipeline_core::notifier::NOTIFY_TOKEN_HEADER;

use crate::state::{AppState, WebSocketMessage};

/// Receive a data-change notification from an out-of-process writer.
///
/// Changes go through the change feed so the board reloads before clients
/// are told to refresh. Session and move outcomes only ever come from this
/// process, so any other message is refused.
pub async fn notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(msg): Json<WebSocketMessage>,
) -> StatusCode {
    if let Some(expected) = state.notify_token.as_deref() {
        let presented = headers
            .get(NOTIFY_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected) {
            warn!("Rejected internal notification without a valid token");
            return StatusCode::UNAUTHORIZED;
        }
    }

    match msg {
        WebSocketMessage::BoardRefresh => {
            info!("Board changed out of process");
            state
                .feed
                .publish(ChangeEvent::new(CARDS_TABLE, ChangeOp::Update, None));
        }
        WebSocketMessage::PreferencesChanged { user_id } => {
            info!(user_id = ?user_id, "Preferences changed out of process");
            state.feed.publish(ChangeEvent::new(
                PREFERENCES_TABLE,
                ChangeOp::Update,
                user_id.as_deref(),
            ));
        }
        other => {
            warn!(msg = ?other, "Rejected internal notification");
            return StatusCode::BAD_REQUEST;
        }
    }
    StatusCode::OK
}
