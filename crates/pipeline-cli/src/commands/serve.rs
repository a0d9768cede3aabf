//! Web server command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use pipeline_core::PipelineConfig;
use std::path::PathBuf;

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Also write logs to a file
    #[arg(long)]
    pub log: bool,

    /// Log file path (default: logs/pipeline-serve.log)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

pub async fn execute(args: ServeArgs, mut config: PipelineConfig) -> Result<()> {
    if let Some(port) = args.port {
        config.web.port = port;
    }
    if let Some(host) = args.host {
        config.web.host = host;
    }
    let (host, port) = (config.web.host.clone(), config.web.port);

    println!();
    println!("  {} {}", "Pipeline".cyan().bold(), "Web Server".bold());
    println!();
    println!("  {}       http://{}:{}/api", "API".green(), host, port);
    println!("  {}  ws://{}:{}/ws", "WebSocket".green(), host, port);
    println!("  {}      {}", "Redis".green(), config.redis_url.dimmed());
    println!();
    println!("  {}", "Ctrl+C to stop".dimmed());
    println!();

    pipeline_web::run_server(config).await?;

    Ok(())
}
