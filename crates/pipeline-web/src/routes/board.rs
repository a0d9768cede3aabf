//! Board route handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use pipeline_core::board::{BoardSnapshot, MoveTicket, Resolution};
use pipeline_core::PipelineError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct MoveCardRequest {
    pub stage_id: String,
    pub index: i64,
    /// Hold the response until the store has answered.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveStatus {
    Pending,
    Confirmed,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MoveCardResponse {
    pub ticket: MoveTicket,
    pub card_id: String,
    pub stage_id: String,
    pub index: usize,
    pub status: MoveStatus,
}

pub async fn get_board(State(state): State<AppState>) -> Json<BoardSnapshot> {
    Json(state.board.snapshot().await)
}

pub async fn refresh_board(State(state): State<AppState>) -> Result<Json<BoardSnapshot>, ApiError> {
    Ok(Json(state.board.refresh().await?))
}

pub async fn move_card(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    Json(req): Json<MoveCardRequest>,
) -> Result<(StatusCode, Json<MoveCardResponse>), ApiError> {
    let handle = state.board.move_card(&card_id, &req.stage_id, req.index).await?;
    let request = handle.request.clone();

    let status = if req.wait {
        let resolution = handle.outcome().await?;
        debug!(card_id = %request.card_id, ?resolution, "Move resolved");
        match resolution {
            Resolution::Confirmed | Resolution::Unknown => MoveStatus::Confirmed,
            Resolution::RolledBack => {
                return Err(PipelineError::PersistenceWriteFailed {
                    card_id: request.card_id,
                    reason: "move rolled back".to_string(),
                }
                .into())
            }
        }
    } else {
        MoveStatus::Pending
    };

    let code = match status {
        MoveStatus::Pending => StatusCode::ACCEPTED,
        MoveStatus::Confirmed => StatusCode::OK,
    };
    Ok((
        code,
        Json(MoveCardResponse {
            ticket: request.ticket,
            card_id: request.card_id,
            stage_id: request.stage_id,
            index: request.index,
            status,
        }),
    ))
}
