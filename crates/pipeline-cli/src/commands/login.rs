//! Session token issuing.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use pipeline_core::PipelineConfig;
use pipeline_redis::queries::sessions;

use super::connect;

#[derive(Args)]
pub struct LoginArgs {
    /// User ID
    pub user_id: String,

    #[arg(long)]
    pub email: Option<String>,
}

pub async fn execute(args: LoginArgs, config: &PipelineConfig) -> Result<()> {
    let pool = connect(config).await?;
    let token = sessions::create_session(&pool, &args.user_id, args.email.as_deref()).await?;

    println!("{} Session for {}", "✓".green().bold(), args.user_id.cyan());
    println!("  {}  {}", "x-session-id:".bold(), token);
    println!(
        "  {}",
        format!("Sessions end after {} hours", config.session.max_age_hours).dimmed()
    );
    Ok(())
}
