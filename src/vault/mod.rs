//! Storage backend for article documents.
//!
//! The [`Vault`] trait is the only way the article store touches files.
//! Paths are vault-relative and `/`-separated; `"/"` or `""` names the
//! vault root.
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`FsVault`] | a directory on disk (the `hsync` binary) |
//! | [`InMemoryVault`] | tests and embedding |

pub mod fs;
pub mod memory;

pub use fs::FsVault;
pub use memory::InMemoryVault;

use async_trait::async_trait;

use crate::error::Result;
use crate::frontmatter::{parse_front_matter, FrontMatter};

#[async_trait]
pub trait Vault: Send + Sync {
    /// Every markdown document in the vault, sorted by path.
    async fn list(&self) -> Result<Vec<String>>;

    async fn read(&self, path: &str) -> Result<String>;

    /// The document's front matter, or `None` if it has none.
    async fn read_front_matter(&self, path: &str) -> Result<Option<FrontMatter>> {
        let text = self.read(path).await?;
        Ok(parse_front_matter(&text))
    }

    /// Create or replace a document. The parent folder must exist.
    async fn write(&self, path: &str, text: &str) -> Result<()>;

    /// Create a folder and any missing ancestors.
    async fn create_folder(&self, path: &str) -> Result<()>;

    /// Whether a document or folder exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Move a document somewhere recoverable. Returns its new path.
    async fn trash(&self, path: &str) -> Result<String>;
}

/// Join a vault folder and a file name; the root folder adds no prefix.
pub fn join_path(folder: &str, name: &str) -> String {
    let folder = normalize(folder);
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Strip leading and trailing separators; the root becomes `""`.
pub fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// `name (n).ext` for collision suffixes.
pub(crate) fn numbered_name(file_name: &str, n: usize) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{} ({}).{}", stem, n, ext),
        _ => format!("{} ({})", file_name, n),
    }
}
