//! Persistent sync settings: the connected user, the group list, the
//! incremental-sync cursor, and cumulative history.
//!
//! [`SettingsStore`] is the seam the orchestrator writes through. The
//! binary uses [`FileSettingsStore`], which rewrites a JSON file after every
//! change; tests use [`MemorySettingsStore`].

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::models::{Group, SyncCounts};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncHistory {
    pub total_articles: u64,
    pub total_highlights: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsState {
    #[serde(default)]
    pub user: Option<String>,
    /// `updated` timestamp of the last synced annotation, as sent by the API.
    #[serde(default)]
    pub last_sync_date: Option<String>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub history: SyncHistory,
}

pub trait SettingsStore: Send + Sync {
    fn snapshot(&self) -> SettingsState;

    /// Apply a mutation and persist the result.
    fn update(&self, apply: &mut dyn FnMut(&mut SettingsState)) -> Result<()>;

    fn set_last_synced_annotation(&self, updated: &str) -> Result<()> {
        self.update(&mut |s| s.last_sync_date = Some(updated.to_string()))
    }

    fn set_groups(&self, groups: Vec<Group>) -> Result<()> {
        let mut groups = Some(groups);
        self.update(&mut |s| {
            if let Some(g) = groups.take() {
                s.groups = g;
            }
        })
    }

    fn increment_history(&self, counts: &SyncCounts) -> Result<()> {
        self.update(&mut |s| {
            s.history.total_articles += counts.new_articles_count;
            s.history.total_highlights += counts.new_highlights_count;
        })
    }

    fn connect(&self, user: &str) -> Result<()> {
        self.update(&mut |s| s.user = Some(user.to_string()))
    }

    fn disconnect(&self) -> Result<()> {
        self.update(&mut |s| {
            s.user = None;
            s.groups.clear();
        })
    }

    fn reset_sync_history(&self) -> Result<()> {
        self.update(&mut |s| {
            s.history = SyncHistory::default();
            s.last_sync_date = None;
        })
    }

    fn set_group_selected(&self, group_id: &str, selected: bool) -> Result<bool> {
        let mut found = false;
        self.update(&mut |s| {
            for group in s.groups.iter_mut().filter(|g| g.id == group_id) {
                group.selected = selected;
                found = true;
            }
        })?;
        Ok(found)
    }
}

fn lock(state: &Mutex<SettingsState>) -> MutexGuard<'_, SettingsState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Settings kept in a JSON file, rewritten after every update.
pub struct FileSettingsStore {
    path: PathBuf,
    state: Mutex<SettingsState>,
}

impl FileSettingsStore {
    /// Load settings from `path`, starting empty if the file does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| SyncError::storage("read settings", path.display().to_string(), e))?;
            serde_json::from_str(&content).map_err(|e| {
                SyncError::storage("parse settings", path.display().to_string(), e)
            })?
        } else {
            debug!("No settings file at {}, starting fresh", path.display());
            SettingsState::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &SettingsState) -> Result<()> {
        let display = self.path.display().to_string();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::storage("create settings folder", &display, e))?;
        }
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| SyncError::storage("serialize settings", &display, e))?;
        std::fs::write(&self.path, json)
            .map_err(|e| SyncError::storage("write settings", &display, e))
    }
}

impl SettingsStore for FileSettingsStore {
    fn snapshot(&self) -> SettingsState {
        lock(&self.state).clone()
    }

    /// The new state replaces the in-memory one only once it is on disk.
    fn update(&self, apply: &mut dyn FnMut(&mut SettingsState)) -> Result<()> {
        let mut state = lock(&self.state);
        let mut next = state.clone();
        apply(&mut next);
        self.persist(&next)?;
        *state = next;
        Ok(())
    }
}

/// In-memory settings for tests and embedding.
#[derive(Default)]
pub struct MemorySettingsStore {
    state: Mutex<SettingsState>,
}

impl MemorySettingsStore {
    pub fn new(state: SettingsState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn snapshot(&self) -> SettingsState {
        lock(&self.state).clone()
    }

    fn update(&self, apply: &mut dyn FnMut(&mut SettingsState)) -> Result<()> {
        apply(&mut lock(&self.state));
        Ok(())
    }
}
