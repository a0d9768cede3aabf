//! Application state.

use pipeline_core::board::{BoardController, BoardEvent};
use pipeline_core::notify::{BroadcastChangeFeed, ChangeFeed, Subscription, PREFERENCES_TABLE};
use pipeline_core::service::{AuthService, LocalStorage, PreferenceStore};
use pipeline_core::session::GuardSettings;
use pipeline_core::PipelineConfig;
use pipeline_redis::{AuthEvents, RedisAuthService, RedisLocalStorage, RedisPool};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// WebSocket message types.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum WebSocketMessage {
    CardMoved { card_id: String, stage_id: String, index: usize },
    MoveConfirmed { card_id: String },
    MoveRolledBack { card_id: String, reason: String },
    BoardRefresh,
    PreferencesChanged { user_id: Option<String> },
    SignedOut { redirect_to: String },
}

impl WebSocketMessage {
    fn from_board(event: BoardEvent) -> Self {
        match event {
            BoardEvent::Loaded { .. } => Self::BoardRefresh,
            BoardEvent::CardMoved {
                card_id,
                stage_id,
                index,
                ..
            } => Self::CardMoved {
                card_id,
                stage_id,
                index,
            },
            BoardEvent::MoveConfirmed { card_id, .. } => Self::MoveConfirmed { card_id },
            BoardEvent::MoveRolledBack { card_id, reason, .. } => {
                Self::MoveRolledBack { card_id, reason }
            }
        }
    }
}

/// Builds the per-session collaborators for a session token.
pub trait SessionServices: Send + Sync {
    fn auth(&self, token: &str) -> Arc<dyn AuthService>;
    fn storage(&self, token: &str) -> Arc<dyn LocalStorage>;
}

/// Sessions backed by Redis, one local storage namespace per token.
pub struct RedisSessions {
    pool: RedisPool,
    events: AuthEvents,
}

impl RedisSessions {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            events: AuthEvents::new(),
        }
    }
}

impl SessionServices for RedisSessions {
    fn auth(&self, token: &str) -> Arc<dyn AuthService> {
        Arc::new(RedisAuthService::new(self.pool.clone(), token, self.events.clone()))
    }

    fn storage(&self, token: &str) -> Arc<dyn LocalStorage> {
        Arc::new(RedisLocalStorage::new(self.pool.clone(), token))
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub board: BoardController,
    pub preferences: Arc<dyn PreferenceStore>,
    pub sessions: Arc<dyn SessionServices>,
    pub feed: BroadcastChangeFeed,
    pub guard: GuardSettings,
    pub won_stage: String,
    /// Secret out-of-process writers present on `/internal/notify`.
    pub notify_token: Option<String>,
    pub tx: broadcast::Sender<WebSocketMessage>,
}

impl AppState {
    pub fn new(
        board: BoardController,
        preferences: Arc<dyn PreferenceStore>,
        sessions: Arc<dyn SessionServices>,
        feed: BroadcastChangeFeed,
        config: &PipelineConfig,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self {
            board,
            preferences,
            sessions,
            feed,
            guard: config.guard_settings(),
            won_stage: config.board.won_stage.clone(),
            notify_token: config.web.notify_token.clone(),
            tx,
        }
    }

    /// Broadcast a message to all WebSocket clients.
    pub fn broadcast(&self, msg: WebSocketMessage) {
        let _ = self.tx.send(msg);
    }

    /// Start forwarding board and preference changes to WebSocket clients.
    ///
    /// The relays stop when the returned subscriptions are dropped.
    pub fn start_relays(&self) -> Vec<Subscription> {
        let mut board_events = self.board.subscribe();
        let tx = self.tx.clone();
        let board_relay = tokio::spawn(async move {
            loop {
                match board_events.recv().await {
                    Ok(event) => {
                        let _ = tx.send(WebSocketMessage::from_board(event));
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "Board relay lagged, asking clients to refresh");
                        let _ = tx.send(WebSocketMessage::BoardRefresh);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut prefs = self.feed.subscribe(PREFERENCES_TABLE);
        let tx = self.tx.clone();
        let prefs_relay = tokio::spawn(async move {
            while let Some(event) = prefs.next().await {
                let _ = tx.send(WebSocketMessage::PreferencesChanged {
                    user_id: event.record_id,
                });
            }
        });

        vec![
            Subscription::new("board-relay", board_relay),
            Subscription::new("preferences-relay", prefs_relay),
            self.board.watch_changes(&self.feed),
        ]
    }
}
