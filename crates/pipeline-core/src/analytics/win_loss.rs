//! Win/loss statistics along the funnel.
//!
//! Open columns are ranked by board order; every closed column (won or lost)
//! shares the final rank. A card has passed through a stage when its own
//! column's rank is at least that stage's rank.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::board::{BoardSnapshot, StageKind};

/// Win/loss figures for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageWinLoss {
    pub stage_id: String,
    pub title: String,
    pub total: usize,
    pub won: usize,
    pub win_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WinLossSummary {
    pub stages: Vec<StageWinLoss>,
    pub won: usize,
    pub closed: usize,
    pub overall_win_rate: u32,
}

/// Rounded percentage, 0 when there is nothing to divide by.
fn rate(won: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (100.0 * won as f64 / total as f64).round() as u32
}

/// Per-stage and overall win rates for the cards on the board.
///
/// Only stages holding at least one card are reported, in board order.
pub fn win_loss_summary(snapshot: &BoardSnapshot, won_stage_id: &str) -> WinLossSummary {
    let open_count = snapshot
        .columns
        .iter()
        .filter(|c| !c.kind.is_closed())
        .count();

    let mut next_rank = 0;
    let rank: HashMap<&str, usize> = snapshot
        .columns
        .iter()
        .map(|col| {
            let r = if col.kind.is_closed() {
                open_count
            } else {
                next_rank += 1;
                next_rank - 1
            };
            (col.id.as_str(), r)
        })
        .collect();

    let present: HashSet<&str> = snapshot.cards.values().map(|c| c.stage.as_str()).collect();

    let stages = snapshot
        .columns
        .iter()
        .filter(|col| present.contains(col.id.as_str()))
        .map(|col| {
            let stage_rank = rank[col.id.as_str()];
            let reached: Vec<&str> = snapshot
                .cards
                .values()
                .filter(|c| rank.get(c.stage.as_str()).is_some_and(|r| *r >= stage_rank))
                .map(|c| c.stage.as_str())
                .collect();
            let won = reached.iter().filter(|s| **s == won_stage_id).count();
            StageWinLoss {
                stage_id: col.id.clone(),
                title: col.title.clone(),
                total: reached.len(),
                won,
                win_rate: rate(won, reached.len()),
            }
        })
        .collect();

    let closed_stages: HashSet<&str> = snapshot
        .columns
        .iter()
        .filter(|c| c.kind.is_closed() || c.id == won_stage_id)
        .map(|c| c.id.as_str())
        .collect();
    let won = snapshot.cards.values().filter(|c| c.stage == won_stage_id).count();
    let closed = snapshot
        .cards
        .values()
        .filter(|c| closed_stages.contains(c.stage.as_str()))
        .count();

    WinLossSummary {
        stages,
        won,
        closed,
        overall_win_rate: rate(won, closed),
    }
}

/// The board's won stage, if exactly one column is marked as such.
pub fn won_stage(snapshot: &BoardSnapshot) -> Option<&str> {
    let mut won = snapshot.columns.iter().filter(|c| c.kind == StageKind::Won);
    match (won.next(), won.next()) {
        (Some(col), None) => Some(col.id.as_str()),
        _ => None,
    }
}
