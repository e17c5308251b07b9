//! A vault backed by a directory on disk.
//!
//! Listing walks the root with `walkdir` and skips paths matching the
//! exclude globs (the trash folder is always excluded). Trash moves the file
//! into `<root>/<trash_folder>/`, renaming it on collision.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use super::{join_path, normalize, numbered_name, Vault};
use crate::config::Config;
use crate::error::{Result, SyncError};

pub struct FsVault {
    root: PathBuf,
    trash_folder: String,
    excludes: GlobSet,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>, trash_folder: &str, exclude_globs: &[String]) -> Result<Self> {
        let trash_folder = normalize(trash_folder);
        let mut patterns = vec![format!("{}/**", trash_folder)];
        patterns.extend(exclude_globs.iter().cloned());
        Ok(Self {
            root: root.into(),
            trash_folder,
            excludes: build_globset(&patterns)?,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.vault.root,
            &config.vault.trash_folder,
            &config.vault_excludes(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a vault path to disk, refusing anything that escapes the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(SyncError::storage(
                "resolve path",
                path,
                "path escapes the vault root",
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Vault for FsVault {
    async fn list(&self) -> Result<Vec<String>> {
        let root = self.root.clone();
        let excludes = self.excludes.clone();
        let display = root.display().to_string();

        let scan = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut paths = Vec::new();
            if !root.exists() {
                return Ok(paths);
            }
            for entry in WalkDir::new(&root) {
                let entry =
                    entry.map_err(|e| SyncError::storage("list vault", root.display().to_string(), e))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let relative = path.strip_prefix(&root).unwrap_or(path);
                let rel_str = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                if excludes.is_match(&rel_str) {
                    continue;
                }
                if relative.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                paths.push(rel_str);
            }
            paths.sort();
            Ok(paths)
        });

        scan.await
            .map_err(|e| SyncError::storage("list vault", display, e))?
    }

    async fn read(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| SyncError::storage("read document", path, e))
    }

    async fn write(&self, path: &str, text: &str) -> Result<()> {
        let full = self.resolve(path)?;
        tokio::fs::write(&full, text)
            .await
            .map_err(|e| SyncError::storage("write document", path, e))
    }

    async fn create_folder(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        tokio::fs::create_dir_all(&full)
            .await
            .map_err(|e| SyncError::storage("create folder", path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        tokio::fs::try_exists(&full)
            .await
            .map_err(|e| SyncError::storage("check path", path, e))
    }

    async fn trash(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        let file_name = full
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| SyncError::storage("trash document", path, "not a file path"))?;

        self.create_folder(&self.trash_folder).await?;

        let mut target = join_path(&self.trash_folder, &file_name);
        let mut n = 1;
        while self.exists(&target).await? {
            target = join_path(&self.trash_folder, &numbered_name(&file_name, n));
            n += 1;
        }

        tokio::fs::rename(&full, self.resolve(&target)?)
            .await
            .map_err(|e| SyncError::storage("trash document", path, e))?;
        debug!("Trashed {} -> {}", path, target);
        Ok(target)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| SyncError::Config(format!("invalid exclude glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SyncError::Config(format!("invalid exclude globs: {}", e)))
}
