//! Preference commands.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use pipeline_core::notifier::WebNotifier;
use pipeline_core::notify::BroadcastChangeFeed;
use pipeline_core::preferences::{ListView, Preferences};
use pipeline_core::service::PreferenceStore;
use pipeline_core::PipelineConfig;
use pipeline_redis::RedisPreferenceStore;

use super::connect;
use crate::output;

#[derive(Subcommand)]
pub enum PrefsCommands {
    /// Show a user's preferences
    Show {
        /// User ID
        user_id: String,
    },

    /// Change a user's preferences
    Set(SetPrefsArgs),

    /// Go back to the defaults
    Reset {
        /// User ID
        user_id: String,
    },
}

#[derive(Args)]
pub struct SetPrefsArgs {
    /// User ID
    pub user_id: String,

    /// Date pattern, e.g. "dd MMM yyyy"
    #[arg(long)]
    pub date_format: Option<String>,

    /// Default list view (table, kanban)
    #[arg(long)]
    pub view: Option<String>,

    #[arg(long)]
    pub items_per_page: Option<u32>,

    #[arg(long)]
    pub notifications: Option<bool>,

    #[arg(long)]
    pub theme: Option<String>,
}

pub async fn execute(cmd: PrefsCommands, config: &PipelineConfig) -> Result<()> {
    let pool = connect(config).await?;
    let store = RedisPreferenceStore::new(pool, BroadcastChangeFeed::new());

    match cmd {
        PrefsCommands::Show { user_id } => {
            match store.fetch_preferences(&user_id).await? {
                Some(prefs) => output::print_preferences(&user_id, &prefs, false),
                None => output::print_preferences(&user_id, &Preferences::default(), true),
            }
        }

        PrefsCommands::Set(args) => {
            let mut prefs = store
                .fetch_preferences(&args.user_id)
                .await?
                .unwrap_or_default();
            if let Some(format) = args.date_format {
                prefs.date_format = format;
            }
            if let Some(view) = args.view {
                let Some(view) = ListView::from_str(&view) else {
                    bail!("Unknown view '{}'. Use table or kanban.", view);
                };
                prefs.default_view = view;
            }
            if let Some(n) = args.items_per_page {
                if n == 0 {
                    bail!("items-per-page must be at least 1");
                }
                prefs.items_per_page = n;
            }
            if let Some(enabled) = args.notifications {
                prefs.notifications_enabled = enabled;
            }
            if let Some(theme) = args.theme {
                prefs.theme = theme;
            }

            store.save(&args.user_id, &prefs).await?;
            WebNotifier::from_config(config)
                .notify_preferences_changed(&args.user_id)
                .await;
            println!(
                "{} Saved preferences for {}",
                "✓".green().bold(),
                args.user_id.cyan()
            );
        }

        PrefsCommands::Reset { user_id } => {
            store.reset(&user_id).await?;
            WebNotifier::from_config(config)
                .notify_preferences_changed(&user_id)
                .await;
            println!(
                "{} Reset preferences for {}",
                "✓".green().bold(),
                user_id.cyan()
            );
        }
    }

    Ok(())
}
