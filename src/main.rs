//! # Hypothesis Sync CLI (`hsync`)
//!
//! ## Usage
//!
//! ```bash
//! hsync --config ./config/hsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hsync connect` | Resolve the API token to a user and fetch groups |
//! | `hsync disconnect` | Forget the user and group list |
//! | `hsync groups [list\|refresh\|select\|deselect]` | Show or change group selection |
//! | `hsync sync [--uri <url>]` | Fetch new annotations into the vault |
//! | `hsync reset [--to-now]` | Clear sync history, or skip everything older than now |
//! | `hsync status` | Show user, cursor, history, and groups |

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hypothesis_sync::commands;
use hypothesis_sync::config;
use hypothesis_sync::progress::ProgressMode;

/// Sync Hypothesis annotations into a folder of Markdown documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/hsync.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "hsync", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hsync.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the API token to a user id and fetch the group list.
    Connect,

    /// Forget the connected user and the group list.
    Disconnect,

    /// Show or change which groups are synced.
    Groups {
        #[command(subcommand)]
        action: Option<GroupsAction>,
    },

    /// Fetch new annotations and write them into the vault.
    ///
    /// Without `--uri`, fetches everything updated since the last sync.
    Sync {
        /// Only sync annotations on this page. The stored cursor is not moved.
        #[arg(long)]
        uri: Option<String>,

        /// Progress output on stderr: human, json, or off.
        /// Defaults to human on a terminal, off otherwise.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Clear sync history so the next sync fetches everything.
    Reset {
        /// Instead, move the cursor to now so older annotations are skipped.
        #[arg(long)]
        to_now: bool,
    },

    /// Show the connected user, last sync, history, and groups.
    Status,
}

#[derive(Subcommand)]
enum GroupsAction {
    /// List stored groups (default).
    List,
    /// Fetch the group list from the server.
    Refresh,
    /// Sync annotations from this group.
    Select { id: String },
    /// Skip annotations from this group.
    Deselect { id: String },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "hypothesis_sync=debug"
    } else {
        "hypothesis_sync=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Connect => commands::run_connect(&cfg).await?,
        Commands::Disconnect => commands::run_disconnect(&cfg)?,
        Commands::Groups { action } => match action.unwrap_or(GroupsAction::List) {
            GroupsAction::List => commands::run_groups_list(&cfg)?,
            GroupsAction::Refresh => commands::run_groups_refresh(&cfg).await?,
            GroupsAction::Select { id } => commands::run_groups_select(&cfg, &id, true)?,
            GroupsAction::Deselect { id } => commands::run_groups_select(&cfg, &id, false)?,
        },
        Commands::Sync { uri, progress } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            commands::run_sync(&cfg, uri.as_deref(), mode).await?;
        }
        Commands::Reset { to_now } => commands::run_reset(&cfg, to_now)?,
        Commands::Status => commands::run_status(&cfg)?,
    }

    Ok(())
}
