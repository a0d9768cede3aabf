//! Card import and removal.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use pipeline_core::board::Card;
use pipeline_core::notifier::WebNotifier;
use pipeline_core::notify::BroadcastChangeFeed;
use pipeline_core::PipelineConfig;
use pipeline_redis::RedisCardStore;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;

use super::connect;

#[derive(Args)]
pub struct ImportArgs {
    /// JSON file holding an array of cards
    pub file: PathBuf,
}

pub async fn execute(args: ImportArgs, config: &PipelineConfig) -> Result<()> {
    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let cards: Vec<Card> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of cards", args.file.display()))?;

    let stages: HashSet<&str> = config.board.stages.iter().map(|s| s.id.as_str()).collect();
    for card in &cards {
        card.validate()?;
        if !stages.contains(card.stage.as_str()) {
            anyhow::bail!("Card '{}' names unknown stage '{}'", card.id, card.stage);
        }
    }

    let pool = connect(config).await?;
    let store = RedisCardStore::new(pool, BroadcastChangeFeed::new());
    let mut ordered: Vec<&Card> = cards.iter().collect();
    ordered.sort_by_key(|c| c.position);
    for card in ordered {
        store.save(card).await?;
    }
    WebNotifier::from_config(config).notify_board_refresh().await;

    info!(count = cards.len(), "Cards imported");
    println!(
        "{} Imported {} cards from {}",
        "✓".green().bold(),
        cards.len(),
        args.file.display().to_string().dimmed()
    );
    Ok(())
}

pub async fn remove(card_id: &str, config: &PipelineConfig) -> Result<()> {
    let pool = connect(config).await?;
    let store = RedisCardStore::new(pool, BroadcastChangeFeed::new());
    store.delete(card_id).await?;
    WebNotifier::from_config(config).notify_board_refresh().await;
    println!("{} Removed card {}", "✓".green().bold(), card_id.dimmed());
    Ok(())
}
