//! Derived pipeline views: weighted value, stage totals, win/loss.
//!
//! Everything here is a pure function of a [`BoardSnapshot`].

pub mod win_loss;

pub use win_loss::{win_loss_summary, StageWinLoss, WinLossSummary};

use serde::Serialize;

use crate::board::{BoardSnapshot, Card};

/// Expected revenue of a deal: `value * probability / 100`, unrounded.
pub fn weighted_value(card: &Card) -> f64 {
    weighted(card.value, card.probability)
}

/// Weighted value from raw parts.
pub fn weighted(value: f64, probability: u8) -> f64 {
    value * f64::from(probability) / 100.0
}

/// Per-column aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTotals {
    pub stage_id: String,
    pub title: String,
    pub count: usize,
    pub total_value: f64,
    pub weighted_value: f64,
}

/// Count, value and weighted value per column, in board order.
pub fn stage_totals(snapshot: &BoardSnapshot) -> Vec<StageTotals> {
    snapshot
        .columns
        .iter()
        .map(|col| {
            let cards = snapshot.cards_in(&col.id);
            StageTotals {
                stage_id: col.id.clone(),
                title: col.title.clone(),
                count: cards.len(),
                total_value: cards.iter().map(|c| c.value).sum(),
                weighted_value: cards.iter().map(|c| weighted_value(c)).sum(),
            }
        })
        .collect()
}

/// Weighted value of every card still open.
pub fn open_pipeline_value(snapshot: &BoardSnapshot) -> f64 {
    snapshot
        .columns
        .iter()
        .filter(|col| !col.kind.is_closed())
        .flat_map(|col| snapshot.cards_in(&col.id))
        .map(weighted_value)
        .sum()
}
