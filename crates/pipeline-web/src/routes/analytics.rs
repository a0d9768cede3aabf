//! Analytics route handlers.

use axum::{extract::State, Json};
use pipeline_core::analytics::{self, StageTotals, WinLossSummary};

use crate::state::AppState;

pub async fn stage_totals(State(state): State<AppState>) -> Json<Vec<StageTotals>> {
    let snapshot = state.board.snapshot().await;
    Json(analytics::stage_totals(&snapshot))
}

pub async fn win_loss(State(state): State<AppState>) -> Json<WinLossSummary> {
    let snapshot = state.board.snapshot().await;
    Json(analytics::win_loss_summary(&snapshot, &state.won_stage))
}
