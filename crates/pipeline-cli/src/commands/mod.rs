//! CLI command definitions and handlers.

use anyhow::Result;
use clap::{Parser, Subcommand};
use pipeline_core::PipelineConfig;
use pipeline_redis::RedisPool;
use std::path::PathBuf;
use tracing::debug;

pub mod board;
pub mod import;
pub mod login;
pub mod prefs;
pub mod serve;

/// Sales pipeline board
#[derive(Parser)]
#[command(name = "pipeline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true, env = "PIPELINE_CONFIG", default_value = "pipeline.toml")]
    pub config: PathBuf,

    /// Redis URL (overrides the config file and REDIS_URL)
    #[arg(long, global = true)]
    pub redis_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the web server
    Serve(serve::ServeArgs),

    /// Display the pipeline board
    Board,

    /// Move a card to a stage
    Move(board::MoveArgs),

    /// Show stage totals and win rates
    Stats,

    /// Show or change a user's preferences
    #[command(subcommand)]
    Prefs(prefs::PrefsCommands),

    /// Load cards from a JSON file
    Import(import::ImportArgs),

    /// Remove a card from the board
    Remove {
        /// Card ID
        card_id: String,
    },

    /// Issue a session token for a user
    Login(login::LoginArgs),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let mut config = PipelineConfig::load(&self.config)?;
        if let Some(url) = self.redis_url {
            config.redis_url = url;
        }

        match self.command {
            Commands::Serve(args) => serve::execute(args, config).await,
            Commands::Board => board::show(&config).await,
            Commands::Move(args) => board::move_card(args, &config).await,
            Commands::Stats => board::stats(&config).await,
            Commands::Prefs(cmd) => prefs::execute(cmd, &config).await,
            Commands::Import(args) => import::execute(args, &config).await,
            Commands::Remove { card_id } => import::remove(&card_id, &config).await,
            Commands::Login(args) => login::execute(args, &config).await,
        }
    }
}

/// Open the Redis connection named by the config.
pub async fn connect(config: &PipelineConfig) -> Result<RedisPool> {
    debug!(url = %config.redis_url, "Connecting to Redis");
    Ok(pipeline_redis::init_pool(&config.redis_url).await?)
}
