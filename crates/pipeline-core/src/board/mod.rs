//! Pipeline board: stage columns, card ordering and optimistic moves.
//!
//! The visible board is always the confirmed base arrangement with every
//! unresolved move replayed on top, in the order the moves were issued.
//! Resolving a move either folds it into the base (success) or drops it and
//! replays the rest (failure), so an earlier failure never undoes a later move.

pub mod controller;
pub mod model;

pub use controller::{BoardController, BoardEvent, MoveHandle};
pub use model::{
    default_stages, BoardSnapshot, Card, Column, DealType, DragState, Stage, StageKind,
    DEFAULT_STAGES,
};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult, ServiceError};

/// Identifies one optimistic move until its persistence outcome arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MoveTicket(pub u64);

/// What the persistence layer must record for a move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub ticket: MoveTicket,
    pub card_id: String,
    pub stage_id: String,
    pub index: usize,
}

/// How a persistence outcome was applied to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The move is now part of the confirmed arrangement (or waits behind
    /// earlier unresolved moves to be folded in).
    Confirmed,
    /// The move was dropped and the board recomputed without it.
    RolledBack,
    /// No pending move carries this ticket (already resolved or discarded by a reload).
    Unknown,
}

#[derive(Debug, Clone)]
struct PendingMove {
    ticket: MoveTicket,
    card_id: String,
    target: String,
    index: usize,
    confirmed: bool,
}

/// In-memory model of the pipeline board.
#[derive(Debug, Clone)]
pub struct BoardModel {
    stages: Vec<Stage>,
    base: BoardSnapshot,
    view: BoardSnapshot,
    pending: Vec<PendingMove>,
    next_ticket: u64,
    drag: DragState,
}

impl BoardModel {
    /// Create an empty board with the given stage columns.
    pub fn new(stages: Vec<Stage>) -> Self {
        let empty = BoardSnapshot {
            columns: stages.iter().map(Column::from_stage).collect(),
            cards: BTreeMap::new(),
        };
        Self {
            stages,
            base: empty.clone(),
            view: empty,
            pending: Vec::new(),
            next_ticket: 1,
            drag: DragState::Idle,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Replace the board contents with a fresh card set.
    ///
    /// Cards are partitioned by stage and ordered by `position`; ties keep the
    /// current on-board order, then input order. Unresolved moves are replayed
    /// on top; moves whose card disappeared are discarded.
    pub fn load(&mut self, cards: Vec<Card>) -> PipelineResult<()> {
        let known: HashSet<&str> = self.stages.iter().map(|s| s.id.as_str()).collect();
        let mut ids = HashSet::with_capacity(cards.len());
        for card in &cards {
            card.validate()?;
            if !known.contains(card.stage.as_str()) {
                return Err(PipelineError::invalid_card(
                    &card.id,
                    format!("unknown stage '{}'", card.stage),
                ));
            }
            if !ids.insert(card.id.as_str()) {
                return Err(PipelineError::invalid_card(&card.id, "duplicate card id"));
            }
        }

        let current_rank: HashMap<&str, usize> = self
            .view
            .columns
            .iter()
            .flat_map(|col| col.card_ids.iter().enumerate())
            .map(|(rank, id)| (id.as_str(), rank))
            .collect();

        let mut columns: Vec<Column> = self.stages.iter().map(Column::from_stage).collect();
        for col in &mut columns {
            let mut members: Vec<(usize, &Card)> = cards
                .iter()
                .enumerate()
                .filter(|(_, card)| card.stage == col.id)
                .collect();
            members.sort_by_key(|(input_rank, card)| {
                (
                    card.position,
                    current_rank.get(card.id.as_str()).copied().unwrap_or(usize::MAX),
                    *input_rank,
                )
            });
            col.card_ids = members.into_iter().map(|(_, card)| card.id.clone()).collect();
        }

        let count = cards.len();
        let mut base = BoardSnapshot {
            columns,
            cards: cards.into_iter().map(|c| (c.id.clone(), c)).collect(),
        };
        for pos in 0..base.columns.len() {
            renumber(&mut base, pos);
        }
        self.base = base;

        // Confirmed moves are already part of what the store returned.
        self.pending.retain(|m| !m.confirmed);
        let before = self.pending.len();
        let base = &self.base;
        self.pending.retain(|m| base.cards.contains_key(&m.card_id));
        if self.pending.len() != before {
            warn!(
                discarded = before - self.pending.len(),
                "Discarded pending moves for cards no longer on the board"
            );
        }
        if let DragState::Dragging(id) = &self.drag {
            if !self.base.cards.contains_key(id) {
                self.drag = DragState::Idle;
            }
        }

        self.rebuild_view();
        debug!(cards = count, pending = self.pending.len(), "Board loaded");
        Ok(())
    }

    /// Mark a card as being dragged. Purely local interaction state.
    pub fn begin_move(&mut self, card_id: &str) -> PipelineResult<()> {
        if !self.view.cards.contains_key(card_id) {
            return Err(PipelineError::unknown_card(card_id));
        }
        self.drag = DragState::Dragging(card_id.to_string());
        Ok(())
    }

    /// Drop the drag state without moving anything.
    pub fn cancel_drag(&mut self) {
        self.drag = DragState::Idle;
    }

    pub fn drag_state(&self) -> &DragState {
        &self.drag
    }

    /// Optimistically move a card and return the request to persist.
    ///
    /// `target_index` is clamped into `[0, len]` of the target column after
    /// the card has been removed from its source. Unknown ids leave the
    /// board untouched.
    pub fn move_card(
        &mut self,
        card_id: &str,
        target_column_id: &str,
        target_index: i64,
    ) -> PipelineResult<MoveRequest> {
        let requested = usize::try_from(target_index.max(0)).unwrap_or(usize::MAX);
        let index = apply_move(&mut self.view, card_id, target_column_id, requested)?;

        let ticket = MoveTicket(self.next_ticket);
        self.next_ticket += 1;
        self.pending.push(PendingMove {
            ticket,
            card_id: card_id.to_string(),
            target: target_column_id.to_string(),
            index,
            confirmed: false,
        });
        self.drag = DragState::Idle;

        debug!(
            ticket = ticket.0,
            card_id = %card_id,
            stage_id = %target_column_id,
            index,
            "Card moved optimistically"
        );

        Ok(MoveRequest {
            ticket,
            card_id: card_id.to_string(),
            stage_id: target_column_id.to_string(),
            index,
        })
    }

    /// Apply the persistence outcome of a previously issued move.
    pub fn resolve(&mut self, ticket: MoveTicket, outcome: Result<(), ServiceError>) -> Resolution {
        let Some(pos) = self.pending.iter().position(|m| m.ticket == ticket) else {
            debug!(ticket = ticket.0, "Outcome for unknown move ticket ignored");
            return Resolution::Unknown;
        };

        match outcome {
            Ok(()) => {
                self.pending[pos].confirmed = true;
                self.fold_confirmed();
                debug!(ticket = ticket.0, "Move confirmed");
                Resolution::Confirmed
            }
            Err(e) => {
                let failed = self.pending.remove(pos);
                self.fold_confirmed();
                self.rebuild_view();
                warn!(
                    ticket = ticket.0,
                    card_id = %failed.card_id,
                    error = %e,
                    "Move rejected by store, rolled back"
                );
                Resolution::RolledBack
            }
        }
    }

    /// Moves still waiting for a persistence outcome.
    pub fn pending_count(&self) -> usize {
        self.pending.iter().filter(|m| !m.confirmed).count()
    }

    pub fn is_pending(&self, card_id: &str) -> bool {
        self.pending.iter().any(|m| !m.confirmed && m.card_id == card_id)
    }

    /// Current visible arrangement.
    pub fn snapshot(&self) -> BoardSnapshot {
        self.view.clone()
    }

    /// Fold the leading run of confirmed moves into the base arrangement.
    fn fold_confirmed(&mut self) {
        while self.pending.first().is_some_and(|m| m.confirmed) {
            let m = self.pending.remove(0);
            if let Err(e) = apply_move(&mut self.base, &m.card_id, &m.target, m.index) {
                warn!(ticket = m.ticket.0, error = %e, "Confirmed move no longer applies");
            }
        }
    }

    fn rebuild_view(&mut self) {
        let mut view = self.base.clone();
        self.pending.retain(|m| match apply_move(&mut view, &m.card_id, &m.target, m.index) {
            Ok(_) => true,
            Err(e) => {
                warn!(ticket = m.ticket.0, error = %e, "Dropping pending move that no longer applies");
                false
            }
        });
        debug_assert!(view.check_integrity().is_ok());
        self.view = view;
    }
}

/// Move a card within `board`, returning the clamped index it landed at.
/// Validation happens before any mutation.
fn apply_move(
    board: &mut BoardSnapshot,
    card_id: &str,
    target: &str,
    index: usize,
) -> PipelineResult<usize> {
    if !board.cards.contains_key(card_id) {
        return Err(PipelineError::unknown_card(card_id));
    }
    let Some(target_pos) = board.columns.iter().position(|c| c.id == target) else {
        return Err(PipelineError::unknown_column(target));
    };
    let source_pos = board
        .columns
        .iter()
        .position(|c| c.card_ids.iter().any(|id| id == card_id));

    if let Some(pos) = source_pos {
        board.columns[pos].card_ids.retain(|id| id != card_id);
    }
    let column = &mut board.columns[target_pos];
    let index = index.min(column.card_ids.len());
    column.card_ids.insert(index, card_id.to_string());
    if let Some(card) = board.cards.get_mut(card_id) {
        card.stage = target.to_string();
    }

    for pos in source_pos.into_iter().chain([target_pos]) {
        renumber(board, pos);
    }
    Ok(index)
}

/// Make each card's `position` match its index in the column.
fn renumber(board: &mut BoardSnapshot, column_pos: usize) {
    for (i, id) in board.columns[column_pos].card_ids.iter().enumerate() {
        if let Some(card) = board.cards.get_mut(id) {
            card.position = i as u32;
        }
    }
}
