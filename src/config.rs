use anyhow::{Context, Result};
use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::Group;
use crate::settings::SettingsState;

pub const DEFAULT_BASE_URL: &str = "https://hypothes.is/api";
pub const TOKEN_ENV: &str = "HYPOTHESIS_TOKEN";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    pub vault: VaultConfig,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    #[serde(default = "default_uri_concurrency")]
    pub uri_concurrency: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
            fetch_limit: default_fetch_limit(),
            uri_concurrency: default_uri_concurrency(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_fetch_limit() -> usize {
    1000
}
fn default_uri_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    pub root: PathBuf,
    #[serde(default = "default_highlights_folder")]
    pub highlights_folder: String,
    #[serde(default)]
    pub use_domain_folders: bool,
    #[serde(default = "default_trash_folder")]
    pub trash_folder: String,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_highlights_folder() -> String {
    "/".to_string()
}
fn default_trash_folder() -> String {
    ".trash".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncSection {
    #[serde(default)]
    pub overwrite_on_update: bool,
    #[serde(default = "default_date_time_format")]
    pub date_time_format: String,
    #[serde(default)]
    pub enable_contextual_tags: bool,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            overwrite_on_update: false,
            date_time_format: default_date_time_format(),
            enable_contextual_tags: false,
        }
    }
}

fn default_date_time_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StateConfig {
    /// JSON file holding the user, groups, cursor, and history.
    /// Defaults to `<vault.root>/.hsync/state.json`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    pub fn state_path(&self) -> PathBuf {
        self.state
            .path
            .clone()
            .unwrap_or_else(|| self.vault.root.join(".hsync").join("state.json"))
    }

    /// The API token from the config file, falling back to `HYPOTHESIS_TOKEN`.
    pub fn token(&self) -> Result<String> {
        self.api
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var(TOKEN_ENV).ok())
            .filter(|t| !t.trim().is_empty())
            .with_context(|| format!("api.token is not set and {} is empty", TOKEN_ENV))
    }

    /// Globs excluded from vault scans: the trash folder plus user globs.
    pub fn vault_excludes(&self) -> Vec<String> {
        let mut excludes = vec![
            format!("{}/**", self.vault.trash_folder.trim_matches('/')),
            ".obsidian/**".to_string(),
            ".hsync/**".to_string(),
        ];
        excludes.extend(self.vault.exclude_globs.clone());
        excludes
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.api.fetch_limit == 0 {
        anyhow::bail!("api.fetch_limit must be > 0");
    }

    if config.api.uri_concurrency == 0 {
        anyhow::bail!("api.uri_concurrency must be >= 1");
    }

    if !config.api.base_url.starts_with("http://") && !config.api.base_url.starts_with("https://")
    {
        anyhow::bail!(
            "api.base_url must be an http(s) URL, got '{}'",
            config.api.base_url
        );
    }

    if config.vault.trash_folder.trim_matches('/').is_empty() {
        anyhow::bail!("vault.trash_folder must not be empty");
    }

    validate_date_format(&config.sync.date_time_format)?;

    Ok(config)
}

/// Reject strftime patterns chrono cannot render; rendering them later panics.
pub fn validate_date_format(format: &str) -> Result<()> {
    if format.is_empty() {
        anyhow::bail!("sync.date_time_format must not be empty");
    }
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        anyhow::bail!("sync.date_time_format is not a valid strftime pattern: '{}'", format);
    }
    Ok(())
}

/// Per-run configuration threaded through fetcher, parser, and store.
///
/// Built once at the start of a sync from the config file and a snapshot
/// of the settings store, so no stage reads ambient state.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub last_sync_date: Option<String>,
    pub overwrite_on_update: bool,
    pub use_domain_folders: bool,
    pub highlights_folder: String,
    pub date_time_format: String,
    pub groups: Vec<Group>,
    pub enable_contextual_tags: bool,
    pub fetch_limit: usize,
}

impl SyncConfig {
    pub fn new(config: &Config, state: &SettingsState) -> Self {
        Self::from_config(config).with_settings(state)
    }

    /// The file-backed part only; cursor and groups stay empty.
    pub fn from_config(config: &Config) -> Self {
        Self {
            last_sync_date: None,
            overwrite_on_update: config.sync.overwrite_on_update,
            use_domain_folders: config.vault.use_domain_folders,
            highlights_folder: config.vault.highlights_folder.clone(),
            date_time_format: config.sync.date_time_format.clone(),
            groups: Vec::new(),
            enable_contextual_tags: config.sync.enable_contextual_tags,
            fetch_limit: config.api.fetch_limit,
        }
    }

    /// Take the cursor and group list from a settings snapshot.
    pub fn with_settings(mut self, state: &SettingsState) -> Self {
        self.last_sync_date = state.last_sync_date.clone();
        self.groups = state.groups.clone();
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            last_sync_date: None,
            overwrite_on_update: false,
            use_domain_folders: false,
            highlights_folder: default_highlights_folder(),
            date_time_format: default_date_time_format(),
            groups: Vec::new(),
            enable_contextual_tags: false,
            fetch_limit: default_fetch_limit(),
        }
    }
}
