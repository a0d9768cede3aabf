//! Collaborator capabilities the board consumes.
//!
//! Storage, authentication and local scalar storage are injected as trait
//! objects so the board, session guard and preference sync run the same
//! against Redis or the in-memory fakes in [`crate::memory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::board::Card;
use crate::error::ServiceResult;
use crate::preferences::Preferences;

/// Card persistence.
#[async_trait]
pub trait CardStore: Send + Sync {
    /// Fetch every card currently on the pipeline.
    async fn fetch_cards(&self) -> ServiceResult<Vec<Card>>;

    /// Record a card's new stage and its index within that stage.
    async fn update_card_stage_and_order(
        &self,
        card_id: &str,
        stage_id: &str,
        index: usize,
    ) -> ServiceResult<()>;
}

/// Per-user preference records. At most one record exists per user.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn fetch_preferences(&self, user_id: &str) -> ServiceResult<Option<Preferences>>;
}

/// Session reported by the authentication service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user_id: String,
    pub email: Option<String>,
    pub issued_at: DateTime<Utc>,
}

/// Auth state change pushed by the authentication service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "session", rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn(AuthSession),
    TokenRefreshed(AuthSession),
    SignedOut,
    SessionMissing,
}

impl AuthEvent {
    /// Events after which no session may be assumed.
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::SignedOut | Self::SessionMissing)
    }
}

/// Authentication service.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn current_session(&self) -> ServiceResult<Option<AuthSession>>;

    async fn sign_out(&self) -> ServiceResult<()>;

    /// Receive auth state changes from now on. Dropping the receiver
    /// unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Durable scalar storage scoped to one browsing context.
#[async_trait]
pub trait LocalStorage: Send + Sync {
    async fn get(&self, key: &str) -> ServiceResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> ServiceResult<()>;

    async fn remove(&self, key: &str) -> ServiceResult<()>;
}
