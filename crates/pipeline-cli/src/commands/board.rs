//! Board commands: display, move, stats.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use pipeline_core::analytics::{stage_totals, win_loss_summary};
use pipeline_core::board::{BoardController, BoardModel};
use pipeline_core::notifier::WebNotifier;
use pipeline_core::notify::BroadcastChangeFeed;
use pipeline_core::PipelineConfig;
use pipeline_redis::RedisCardStore;
use std::sync::Arc;

use super::connect;
use crate::output;

#[derive(Args)]
pub struct MoveArgs {
    /// Card ID
    pub card_id: String,

    /// Target stage ID
    pub stage_id: String,

    /// Position in the target stage (clamped; defaults to the end)
    #[arg(short, long)]
    pub index: Option<i64>,
}

async fn open_board(config: &PipelineConfig) -> Result<BoardController> {
    let pool = connect(config).await?;
    let store = Arc::new(RedisCardStore::new(pool, BroadcastChangeFeed::new()));
    let board = BoardController::new(BoardModel::new(config.board.stages.clone()), store)
        .with_write_timeout(config.write_timeout());
    board.refresh().await?;
    Ok(board)
}

pub async fn show(config: &PipelineConfig) -> Result<()> {
    let board = open_board(config).await?;
    output::print_board(&board.snapshot().await);
    Ok(())
}

pub async fn move_card(args: MoveArgs, config: &PipelineConfig) -> Result<()> {
    let board = open_board(config).await?;
    let index = args.index.unwrap_or(i64::MAX);
    let handle = board.move_card(&args.card_id, &args.stage_id, index).await?;
    let position = handle.request.index;
    handle.outcome().await?;
    WebNotifier::from_config(config).notify_board_refresh().await;

    println!(
        "{} Moved card {} to {} at position {}",
        "✓".green().bold(),
        args.card_id.dimmed(),
        args.stage_id.cyan(),
        position
    );
    Ok(())
}

pub async fn stats(config: &PipelineConfig) -> Result<()> {
    let board = open_board(config).await?;
    let snapshot = board.snapshot().await;
    output::print_stage_totals(&stage_totals(&snapshot));
    println!();
    output::print_win_loss(&win_loss_summary(&snapshot, &config.board.won_stage));
    Ok(())
}
