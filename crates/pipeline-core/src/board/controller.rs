//! Async driver for the board: optimistic apply, persist, confirm or roll back.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BoardModel, BoardSnapshot, DragState, MoveRequest, MoveTicket, Resolution};
use crate::error::{PipelineError, PipelineResult, ServiceError};
use crate::notify::{ChangeFeed, Subscription, CARDS_TABLE};
use crate::service::CardStore;

/// Board notifications for presentation layers.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum BoardEvent {
    Loaded { cards: usize },
    CardMoved { ticket: MoveTicket, card_id: String, stage_id: String, index: usize },
    MoveConfirmed { ticket: MoveTicket, card_id: String },
    /// Non-fatal: the move was undone and the user may drag again.
    MoveRolledBack { ticket: MoveTicket, card_id: String, reason: String },
}

/// Pending confirmation of one move.
pub struct MoveHandle {
    pub request: MoveRequest,
    confirmation: JoinHandle<PipelineResult<Resolution>>,
}

impl MoveHandle {
    /// Wait for the store's answer. A failed write has already been rolled
    /// back when this returns `PersistenceWriteFailed`.
    pub async fn outcome(self) -> PipelineResult<Resolution> {
        match self.confirmation.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::PersistenceWriteFailed {
                card_id: self.request.card_id,
                reason: format!("confirmation task ended: {}", e),
            }),
        }
    }
}

/// Shared handle to the board model and its card store.
#[derive(Clone)]
pub struct BoardController {
    model: Arc<Mutex<BoardModel>>,
    store: Arc<dyn CardStore>,
    events: broadcast::Sender<BoardEvent>,
    write_timeout: Option<Duration>,
}

impl BoardController {
    pub fn new(model: BoardModel, store: Arc<dyn CardStore>) -> Self {
        let (events, _rx) = broadcast::channel(100);
        Self {
            model: Arc::new(Mutex::new(model)),
            store,
            events,
            write_timeout: None,
        }
    }

    /// Treat writes that take longer than `timeout` as failed.
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    /// Re-read every card from the store and reload the board.
    pub async fn refresh(&self) -> PipelineResult<BoardSnapshot> {
        let cards = self.store.fetch_cards().await?;
        let count = cards.len();
        let snapshot = {
            let mut model = self.model.lock().await;
            model.load(cards)?;
            model.snapshot()
        };
        info!(cards = count, "Board refreshed from store");
        self.emit(BoardEvent::Loaded { cards: count });
        Ok(snapshot)
    }

    pub async fn snapshot(&self) -> BoardSnapshot {
        self.model.lock().await.snapshot()
    }

    pub async fn begin_move(&self, card_id: &str) -> PipelineResult<()> {
        self.model.lock().await.begin_move(card_id)
    }

    pub async fn cancel_drag(&self) {
        self.model.lock().await.cancel_drag();
    }

    pub async fn drag_state(&self) -> DragState {
        self.model.lock().await.drag_state().clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.model.lock().await.pending_count()
    }

    /// Apply a move locally and start persisting it.
    ///
    /// The board reflects the move before this returns. The write runs in the
    /// background; await [`MoveHandle::outcome`] to observe it.
    pub async fn move_card(
        &self,
        card_id: &str,
        target_column_id: &str,
        target_index: i64,
    ) -> PipelineResult<MoveHandle> {
        let request = self
            .model
            .lock()
            .await
            .move_card(card_id, target_column_id, target_index)?;

        self.emit(BoardEvent::CardMoved {
            ticket: request.ticket,
            card_id: request.card_id.clone(),
            stage_id: request.stage_id.clone(),
            index: request.index,
        });

        let confirmation = tokio::spawn(persist_move(
            request.clone(),
            self.model.clone(),
            self.store.clone(),
            self.events.clone(),
            self.write_timeout,
        ));

        Ok(MoveHandle {
            request,
            confirmation,
        })
    }

    /// Reload the board whenever the cards table changes.
    pub fn watch_changes(&self, feed: &dyn ChangeFeed) -> Subscription {
        let mut stream = feed.subscribe(CARDS_TABLE);
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                debug!(op = ?event.op, record_id = ?event.record_id, "Cards changed, refreshing board");
                if let Err(e) = controller.refresh().await {
                    warn!(error = %e, "Board refresh after change notification failed");
                }
            }
        });
        Subscription::new("board-changes", handle)
    }

    fn emit(&self, event: BoardEvent) {
        let _ = self.events.send(event);
    }
}

async fn persist_move(
    request: MoveRequest,
    model: Arc<Mutex<BoardModel>>,
    store: Arc<dyn CardStore>,
    events: broadcast::Sender<BoardEvent>,
    write_timeout: Option<Duration>,
) -> PipelineResult<Resolution> {
    let write = store.update_card_stage_and_order(&request.card_id, &request.stage_id, request.index);
    let result = match write_timeout {
        Some(limit) => tokio::time::timeout(limit, write)
            .await
            .unwrap_or(Err(ServiceError::Timeout(limit.as_secs()))),
        None => write.await,
    };

    let resolution = model.lock().await.resolve(request.ticket, result.clone());

    match result {
        Ok(()) => {
            let _ = events.send(BoardEvent::MoveConfirmed {
                ticket: request.ticket,
                card_id: request.card_id,
            });
            Ok(resolution)
        }
        Err(e) => {
            let err = PipelineError::PersistenceWriteFailed {
                card_id: request.card_id.clone(),
                reason: e.to_string(),
            };
            let _ = events.send(BoardEvent::MoveRolledBack {
                ticket: request.ticket,
                card_id: request.card_id,
                reason: err.to_string(),
            });
            Err(err)
        }
    }
}
