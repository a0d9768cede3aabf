//! WebSocket handler for real-time updates.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{
    sink::{Sink, SinkExt},
    stream::{Stream, StreamExt},
};
use pipeline_core::session::{GuardState, SessionGuard};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::auth::{authorize, session_token};
use crate::error::ApiError;
use crate::state::{AppState, WebSocketMessage};

#[derive(Deserialize)]
pub struct WsParams {
    /// Browsers cannot set headers on the upgrade request.
    pub session: Option<String>,
}

/// WebSocket upgrade handler. The session is checked before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = params.session.or_else(|| session_token(&headers));
    let (guard, current) = authorize(&state, token, false).await?;
    let user_id = current.session.user_id;
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, guard, user_id))
        .into_response())
}

/// Handle individual WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState, guard: SessionGuard, user_id: String) {
    let (sender, receiver) = socket.split();
    pump(sender, receiver, state, guard, user_id).await;
}

/// Forward board messages to the client until it disconnects or signs out.
/// Both halves are stopped, and the guard torn down, whichever ends first.
pub(crate) async fn pump<S, R, E>(
    mut sender: S,
    mut receiver: R,
    state: AppState,
    mut guard: SessionGuard,
    user_id: String,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Send + 'static,
{
    let mut rx = state.tx.subscribe();
    let mut guard_state = guard.watch();
    // A sign-out that landed before this point is still delivered.
    guard_state.mark_changed();

    let receiver_count = state.tx.receiver_count();
    info!(user_id = %user_id, receiver_count, "WebSocket client connected");

    let mut send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                received = rx.recv() => match received {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "WebSocket client lagged, sending refresh");
                        WebSocketMessage::BoardRefresh
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = guard_state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = guard_state.borrow_and_update().clone();
                    match current {
                        GuardState::Unauthorized { redirect_to } => {
                            let _ = send_json(&mut sender, &WebSocketMessage::SignedOut { redirect_to }).await;
                            let _ = sender.send(Message::Close(None)).await;
                            break;
                        }
                        _ => continue,
                    }
                }
            };

            if send_json(&mut sender, &msg).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    // Handle incoming messages from client
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    debug!("Received from WebSocket client: {}", text);
                }
                Message::Close(_) => {
                    debug!("WebSocket client sent close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    guard.teardown();

    info!(user_id = %user_id, "WebSocket client disconnected");
}

async fn send_json<S>(sender: &mut S, msg: &WebSocketMessage) -> anyhow::Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(msg)?;
    debug!(message = %json, "Sending message to WebSocket client");
    sender.send(Message::Text(json.into())).await?;
    Ok(())
}
