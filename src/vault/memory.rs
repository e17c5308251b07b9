//! In-memory [`Vault`] for tests and embedding.
//!
//! Documents and folders live in `BTreeMap`/`BTreeSet` behind
//! `std::sync::RwLock`. Like the disk backend, writing into a folder that
//! was never created fails.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{join_path, normalize, numbered_name, Vault};
use crate::error::{Result, SyncError};

const TRASH_FOLDER: &str = ".trash";

#[derive(Default)]
pub struct InMemoryVault {
    files: RwLock<BTreeMap<String, String>>,
    folders: RwLock<BTreeSet<String>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents of a document, if present.
    pub fn get(&self, path: &str) -> Option<String> {
        read(&self.files).get(&normalize(path)).cloned()
    }

    fn folder_exists(&self, folder: &str) -> bool {
        folder.is_empty() || read(&self.folders).contains(folder)
    }
}

#[async_trait]
impl Vault for InMemoryVault {
    async fn list(&self) -> Result<Vec<String>> {
        let prefix = format!("{}/", TRASH_FOLDER);
        Ok(read(&self.files)
            .keys()
            .filter(|p| p.ends_with(".md") && !p.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn read(&self, path: &str) -> Result<String> {
        self.get(path)
            .ok_or_else(|| SyncError::storage("read document", path, "no such document"))
    }

    async fn write(&self, path: &str, text: &str) -> Result<()> {
        let path = normalize(path);
        if !self.folder_exists(parent(&path)) {
            return Err(SyncError::storage("write document", path, "parent folder does not exist"));
        }
        write(&self.files).insert(path, text.to_string());
        Ok(())
    }

    async fn create_folder(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        let mut folders = write(&self.folders);
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = join_path(&current, part);
            folders.insert(current.clone());
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = normalize(path);
        Ok(read(&self.files).contains_key(&path) || self.folder_exists(&path))
    }

    async fn trash(&self, path: &str) -> Result<String> {
        let path = normalize(path);
        let file_name = path.rsplit('/').next().unwrap_or(&path).to_string();

        let mut files = write(&self.files);
        let content = files
            .remove(&path)
            .ok_or_else(|| SyncError::storage("trash document", &path, "no such document"))?;

        let mut target = join_path(TRASH_FOLDER, &file_name);
        let mut n = 1;
        while files.contains_key(&target) {
            target = join_path(TRASH_FOLDER, &numbered_name(&file_name, n));
            n += 1;
        }
        files.insert(target.clone(), content);
        drop(files);

        write(&self.folders).insert(TRASH_FOLDER.to_string());
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_folder_registers_ancestors() {
        let v = InMemoryVault::new();
        v.create_folder("/a/b/c/").await.unwrap();
        assert!(v.exists("a").await.unwrap());
        assert!(v.exists("a/b/c").await.unwrap());
        v.write("a/b/c/X.md", "x").await.unwrap();
        assert_eq!(v.get("a/b/c/X.md").as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn write_into_missing_folder_fails() {
        let v = InMemoryVault::new();
        assert!(v.write("nope/X.md", "x").await.is_err());
        v.write("/Root.md", "x").await.unwrap();
        assert_eq!(v.list().await.unwrap(), vec!["Root.md"]);
    }

    #[tokio::test]
    async fn trashed_documents_leave_the_listing() {
        let v = InMemoryVault::new();
        v.write("A.md", "one").await.unwrap();
        assert_eq!(v.trash("A.md").await.unwrap(), ".trash/A.md");
        v.write("A.md", "two").await.unwrap();
        assert_eq!(v.trash("A.md").await.unwrap(), ".trash/A (1).md");

        assert!(v.list().await.unwrap().is_empty());
        assert_eq!(v.get(".trash/A (1).md").as_deref(), Some("two"));
        assert!(v.trash("A.md").await.is_err());
    }
}
