//! `hsync` command implementations.
//!
//! Each function loads what it needs from the [`Config`], does its work,
//! and prints a short report to stdout. Progress and logs go to stderr.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};

use crate::api::ApiClient;
use crate::article_store::ArticleStore;
use crate::config::{Config, SyncConfig};
use crate::groups::refresh_groups;
use crate::progress::{format_number, ProgressMode, LIMIT_REACHED_MESSAGE};
use crate::settings::{FileSettingsStore, SettingsStore};
use crate::sync::Syncer;
use crate::vault::{FsVault, Vault};

fn open_settings(config: &Config) -> Result<FileSettingsStore> {
    let path = config.state_path();
    FileSettingsStore::open(&path)
        .with_context(|| format!("Failed to open state file {}", path.display()))
}

fn api_client(config: &Config, user: Option<String>) -> Result<ApiClient> {
    let token = config.token()?;
    let client = ApiClient::new(
        &config.api.base_url,
        &token,
        Duration::from_secs(config.api.timeout_secs),
    )?;
    Ok(client
        .with_user(user)
        .with_uri_concurrency(config.api.uri_concurrency))
}

fn connected_user(settings: &dyn SettingsStore) -> Result<String> {
    match settings.snapshot().user {
        Some(user) => Ok(user),
        None => bail!("Not connected. Run `hsync connect` first."),
    }
}

/// Resolve the token to a user and store it, then fetch the group list.
pub async fn run_connect(config: &Config) -> Result<()> {
    let settings = open_settings(config)?;
    let client = api_client(config, None)?;

    let user = client
        .fetch_profile()
        .await
        .context("Failed to connect to Hypothesis")?;
    settings.connect(&user)?;
    let groups = refresh_groups(&client, &settings).await?;

    println!("Connected as {}", user);
    println!("  groups: {}", groups.len());
    Ok(())
}

pub fn run_disconnect(config: &Config) -> Result<()> {
    let settings = open_settings(config)?;
    settings.disconnect()?;
    println!("Disconnected.");
    Ok(())
}

pub fn run_groups_list(config: &Config) -> Result<()> {
    let settings = open_settings(config)?;
    print_groups(&settings);
    Ok(())
}

pub async fn run_groups_refresh(config: &Config) -> Result<()> {
    let settings = open_settings(config)?;
    let user = connected_user(&settings)?;
    let client = api_client(config, Some(user))?;
    refresh_groups(&client, &settings).await?;
    print_groups(&settings);
    Ok(())
}

pub fn run_groups_select(config: &Config, group_id: &str, selected: bool) -> Result<()> {
    let settings = open_settings(config)?;
    if !settings.set_group_selected(group_id, selected)? {
        bail!(
            "Unknown group '{}'. Run `hsync groups refresh` to update the list.",
            group_id
        );
    }
    print_groups(&settings);
    Ok(())
}

fn print_groups(settings: &dyn SettingsStore) {
    let groups = settings.snapshot().groups;
    if groups.is_empty() {
        println!("No groups. Run `hsync groups refresh`.");
        return;
    }
    for group in groups {
        let mark = if group.selected { "x" } else { " " };
        println!("[{}] {:<24} {}", mark, group.id, group.name);
    }
}

/// Run a sync into the configured vault.
pub async fn run_sync(config: &Config, uri: Option<&str>, mode: ProgressMode) -> Result<()> {
    let settings = Arc::new(open_settings(config)?);
    let user = connected_user(settings.as_ref())?;
    let client = api_client(config, Some(user))?;

    let vault: Arc<dyn Vault> = Arc::new(FsVault::from_config(config)?);
    let store = ArticleStore::new(vault);
    let mut syncer = Syncer::new(
        Arc::new(client),
        store,
        settings,
        SyncConfig::from_config(config),
    )
    .with_progress(mode.reporter());

    let report = syncer.run(uri).await?;

    println!("sync complete");
    println!(
        "  new articles:    {}",
        format_number(report.counts.new_articles_count)
    );
    println!(
        "  new highlights:  {}",
        format_number(report.counts.new_highlights_count)
    );
    if !report.failed.is_empty() {
        println!("  failed articles: {}", report.failed.len());
        for failure in &report.failed {
            println!("    {}: {}", failure.title, failure.error);
        }
    }
    if !report.skipped.is_empty() {
        println!("  skipped annotations: {}", report.skipped.len());
    }
    if report.limit_reached && mode != ProgressMode::Human {
        println!("{}", LIMIT_REACHED_MESSAGE);
    }
    Ok(())
}

/// Clear history and the cursor, or with `to_now` only move the cursor
/// to the current time so older annotations are never fetched.
pub fn run_reset(config: &Config, to_now: bool) -> Result<()> {
    let settings = open_settings(config)?;
    if to_now {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false);
        settings.set_last_synced_annotation(&now)?;
        println!("Next sync starts from {}", now);
    } else {
        settings.reset_sync_history()?;
        println!("Sync history cleared; next sync fetches everything.");
    }
    Ok(())
}

pub fn run_status(config: &Config) -> Result<()> {
    let settings = open_settings(config)?;
    let state = settings.snapshot();

    println!("user:              {}", state.user.as_deref().unwrap_or("(not connected)"));
    println!("vault:             {}", config.vault.root.display());
    println!(
        "last sync:         {}",
        state.last_sync_date.as_deref().unwrap_or("(never)")
    );
    println!(
        "synced articles:   {}",
        format_number(state.history.total_articles)
    );
    println!(
        "synced highlights: {}",
        format_number(state.history.total_highlights)
    );
    let selected = state.groups.iter().filter(|g| g.selected).count();
    println!("groups:            {} of {} selected", selected, state.groups.len());
    Ok(())
}
