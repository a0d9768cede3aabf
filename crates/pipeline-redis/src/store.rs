//! Adapters from the Redis queries to the board's collaborator traits.

use async_trait::async_trait;
use pipeline_core::board::Card;
use pipeline_core::notify::{BroadcastChangeFeed, ChangeEvent, ChangeOp, CARDS_TABLE, PREFERENCES_TABLE};
use pipeline_core::preferences::Preferences;
use pipeline_core::service::{AuthEvent, AuthService, AuthSession, CardStore, LocalStorage, PreferenceStore};
use pipeline_core::ServiceResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

use crate::client::{RedisPool, RedisResult};
use crate::queries::{cards, local, preferences, sessions};

/// Card store that publishes a change event after every write.
#[derive(Clone)]
pub struct RedisCardStore {
    pool: RedisPool,
    feed: BroadcastChangeFeed,
}

impl RedisCardStore {
    pub fn new(pool: RedisPool, feed: BroadcastChangeFeed) -> Self {
        Self { pool, feed }
    }

    /// Insert or replace a card.
    pub async fn save(&self, card: &Card) -> RedisResult<()> {
        cards::save_card(&self.pool, card).await?;
        self.feed
            .publish(ChangeEvent::new(CARDS_TABLE, ChangeOp::Update, Some(&card.id)));
        Ok(())
    }

    pub async fn delete(&self, card_id: &str) -> RedisResult<()> {
        cards::delete_card(&self.pool, card_id).await?;
        self.feed
            .publish(ChangeEvent::new(CARDS_TABLE, ChangeOp::Delete, Some(card_id)));
        Ok(())
    }
}

#[async_trait]
impl CardStore for RedisCardStore {
    async fn fetch_cards(&self) -> ServiceResult<Vec<Card>> {
        Ok(cards::list_cards(&self.pool).await?)
    }

    async fn update_card_stage_and_order(
        &self,
        card_id: &str,
        stage_id: &str,
        index: usize,
    ) -> ServiceResult<()> {
        cards::move_card(&self.pool, card_id, stage_id, index).await?;
        self.feed
            .publish(ChangeEvent::new(CARDS_TABLE, ChangeOp::Update, Some(card_id)));
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisPreferenceStore {
    pool: RedisPool,
    feed: BroadcastChangeFeed,
}

impl RedisPreferenceStore {
    pub fn new(pool: RedisPool, feed: BroadcastChangeFeed) -> Self {
        Self { pool, feed }
    }

    pub async fn save(&self, user_id: &str, prefs: &Preferences) -> RedisResult<()> {
        preferences::save_preferences(&self.pool, user_id, prefs).await?;
        self.feed
            .publish(ChangeEvent::new(PREFERENCES_TABLE, ChangeOp::Update, Some(user_id)));
        Ok(())
    }

    /// Drop the stored row so the user falls back to defaults.
    pub async fn reset(&self, user_id: &str) -> RedisResult<()> {
        preferences::delete_preferences(&self.pool, user_id).await?;
        self.feed
            .publish(ChangeEvent::new(PREFERENCES_TABLE, ChangeOp::Delete, Some(user_id)));
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for RedisPreferenceStore {
    async fn fetch_preferences(&self, user_id: &str) -> ServiceResult<Option<Preferences>> {
        Ok(preferences::get_preferences(&self.pool, user_id).await?)
    }
}

/// Per-token auth event channels shared by every [`RedisAuthService`].
#[derive(Clone, Default)]
pub struct AuthEvents {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<AuthEvent>>>>,
}

impl AuthEvents {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, token: &str) -> broadcast::Sender<AuthEvent> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(token.to_string())
            .or_insert_with(|| broadcast::channel(16).0)
            .clone()
    }

    /// Deliver `event` to everyone following `token`.
    pub fn publish(&self, token: &str, event: AuthEvent) {
        let ends = event.ends_session();
        let _ = self.sender(token).send(event);
        if ends {
            self.channels
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(token);
        }
    }
}

/// Auth service bound to one session token.
#[derive(Clone)]
pub struct RedisAuthService {
    pool: RedisPool,
    token: String,
    events: AuthEvents,
}

impl RedisAuthService {
    pub fn new(pool: RedisPool, token: &str, events: AuthEvents) -> Self {
        Self {
            pool,
            token: token.to_string(),
            events,
        }
    }
}

#[async_trait]
impl AuthService for RedisAuthService {
    async fn current_session(&self) -> ServiceResult<Option<AuthSession>> {
        Ok(sessions::get_session(&self.pool, &self.token).await?)
    }

    async fn sign_out(&self) -> ServiceResult<()> {
        sessions::delete_session(&self.pool, &self.token).await?;
        debug!("Session token revoked");
        self.events.publish(&self.token, AuthEvent::SignedOut);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.sender(&self.token).subscribe()
    }
}

/// Scalar storage namespaced by browsing context.
#[derive(Clone)]
pub struct RedisLocalStorage {
    pool: RedisPool,
    context: String,
}

impl RedisLocalStorage {
    pub fn new(pool: RedisPool, context: &str) -> Self {
        Self {
            pool,
            context: context.to_string(),
        }
    }
}

#[async_trait]
impl LocalStorage for RedisLocalStorage {
    async fn get(&self, key: &str) -> ServiceResult<Option<String>> {
        Ok(local::get_value(&self.pool, &self.context, key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> ServiceResult<()> {
        Ok(local::set_value(&self.pool, &self.context, key, value).await?)
    }

    async fn remove(&self, key: &str) -> ServiceResult<()> {
        Ok(local::remove_value(&self.pool, &self.context, key).await?)
    }
}
