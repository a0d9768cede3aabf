//! In-memory collaborators for tests and local demos.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

use crate::board::Card;
use crate::error::{ServiceError, ServiceResult};
use crate::preferences::Preferences;
use crate::service::{AuthEvent, AuthService, AuthSession, CardStore, LocalStorage, PreferenceStore};

/// Card store holding cards in a vector. Positions are renumbered per stage
/// on every write.
#[derive(Default)]
pub struct InMemoryCardStore {
    cards: RwLock<Vec<Card>>,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
    writes: AtomicUsize,
}

impl InMemoryCardStore {
    pub fn new(cards: Vec<Card>) -> Self {
        Self {
            cards: RwLock::new(cards),
            ..Self::default()
        }
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay each write, to exercise timeouts and races.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        let ms = delay.map(|d| d.as_millis() as u64).unwrap_or(0);
        self.write_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Number of write attempts received.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn insert(&self, card: Card) {
        self.cards.write().await.push(card);
    }

    pub async fn remove(&self, card_id: &str) {
        self.cards.write().await.retain(|c| c.id != card_id);
    }

    pub async fn stage_of(&self, card_id: &str) -> Option<String> {
        self.cards
            .read()
            .await
            .iter()
            .find(|c| c.id == card_id)
            .map(|c| c.stage.clone())
    }
}

#[async_trait]
impl CardStore for InMemoryCardStore {
    async fn fetch_cards(&self) -> ServiceResult<Vec<Card>> {
        Ok(self.cards.read().await.clone())
    }

    async fn update_card_stage_and_order(
        &self,
        card_id: &str,
        stage_id: &str,
        index: usize,
    ) -> ServiceResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("write rejected by test store".to_string()));
        }

        let mut cards = self.cards.write().await;
        let Some(moved) = cards.iter_mut().find(|c| c.id == card_id) else {
            return Err(ServiceError::NotFound(format!("card {}", card_id)));
        };
        let source = std::mem::replace(&mut moved.stage, stage_id.to_string());

        let mut target: Vec<(u32, String)> = cards
            .iter()
            .filter(|c| c.stage == stage_id && c.id != card_id)
            .map(|c| (c.position, c.id.clone()))
            .collect();
        target.sort();
        let mut order: Vec<String> = target.into_iter().map(|(_, id)| id).collect();
        order.insert(index.min(order.len()), card_id.to_string());

        let mut rest: Vec<(u32, String)> = cards
            .iter()
            .filter(|c| c.stage == source && source != stage_id)
            .map(|c| (c.position, c.id.clone()))
            .collect();
        rest.sort();
        let rest: Vec<String> = rest.into_iter().map(|(_, id)| id).collect();

        for card in cards.iter_mut() {
            if let Some(pos) = order.iter().position(|id| *id == card.id) {
                card.position = pos as u32;
            } else if let Some(pos) = rest.iter().position(|id| *id == card.id) {
                card.position = pos as u32;
            }
        }
        Ok(())
    }
}

/// Preference store keyed by user id.
#[derive(Default)]
pub struct InMemoryPreferenceStore {
    records: RwLock<HashMap<String, Preferences>>,
    fail_reads: AtomicBool,
    reads: AtomicUsize,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, user_id: &str, prefs: Preferences) {
        self.records.write().await.insert(user_id.to_string(), prefs);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn fetch_preferences(&self, user_id: &str) -> ServiceResult<Option<Preferences>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("preferences offline".to_string()));
        }
        Ok(self.records.read().await.get(user_id).cloned())
    }
}

/// Auth service with a single switchable session.
pub struct InMemoryAuthService {
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
    sign_outs: AtomicUsize,
}

impl InMemoryAuthService {
    pub fn new(session: Option<AuthSession>) -> Self {
        let (events, _rx) = broadcast::channel(16);
        Self {
            session: RwLock::new(session),
            events,
            sign_outs: AtomicUsize::new(0),
        }
    }

    pub async fn sign_in(&self, session: AuthSession) {
        *self.session.write().await = Some(session.clone());
        let _ = self.events.send(AuthEvent::SignedIn(session));
    }

    /// Push an auth event as if it came from another tab or the server.
    pub async fn push(&self, event: AuthEvent) {
        if event.ends_session() {
            *self.session.write().await = None;
        }
        let _ = self.events.send(event);
    }

    pub fn sign_out_count(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }

    /// Receivers currently following this service's auth events.
    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl AuthService for InMemoryAuthService {
    async fn current_session(&self) -> ServiceResult<Option<AuthSession>> {
        Ok(self.session.read().await.clone())
    }

    async fn sign_out(&self) -> ServiceResult<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        *self.session.write().await = None;
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

/// Scalar key/value storage.
#[derive(Default)]
pub struct InMemoryLocalStorage {
    values: RwLock<HashMap<String, String>>,
}

impl InMemoryLocalStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStorage for InMemoryLocalStorage {
    async fn get(&self, key: &str) -> ServiceResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> ServiceResult<()> {
        self.values.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> ServiceResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::DealType;

    fn card(id: &str, stage: &str, position: u32) -> Card {
        Card {
            id: id.to_string(),
            name: id.to_string(),
            deal_type: DealType::Assessment,
            value: 1_000.0,
            probability: 10,
            stage: stage.to_string(),
            contact_name: None,
            company: None,
            days_in_stage: 0,
            position,
        }
    }

    #[tokio::test]
    async fn test_store_renumbers_positions() {
        let store = InMemoryCardStore::new(vec![
            card("a", "lead", 0),
            card("b", "lead", 1),
            card("c", "won", 0),
        ]);
        store.update_card_stage_and_order("a", "won", 0).await.unwrap();

        let cards = store.fetch_cards().await.unwrap();
        let pos = |id: &str| cards.iter().find(|c| c.id == id).unwrap().position;
        assert_eq!(pos("a"), 0);
        assert_eq!(pos("c"), 1);
        assert_eq!(pos("b"), 0);
    }

    #[tokio::test]
    async fn test_store_unknown_card() {
        let store = InMemoryCardStore::new(vec![]);
        assert!(matches!(
            store.update_card_stage_and_order("x", "lead", 0).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
