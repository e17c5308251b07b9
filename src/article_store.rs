//! Persistence of articles into the vault.
//!
//! An article's file is found by the `url` in its front matter, never by
//! its filename, so renamed or moved files keep receiving new highlights.
//!
//! | Existing file | `overwrite_on_update` | Action | `created` |
//! |---------------|-----------------------|--------|-----------|
//! | no | any | write a new file at [`ArticleStore::resolve_path`] | `true` |
//! | yes | `false` | append a continuation fragment | `false` |
//! | yes | `true` | trash the old file, write a new one | `true` |
//!
//! Saves must not run concurrently: lookup and collision checks read a
//! snapshot of the vault.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::frontmatter::{add_front_matter, article_url};
use crate::models::{AnnotationFile, Article};
use crate::render::{MarkdownRenderer, Renderer};
use crate::vault::{join_path, numbered_name, Vault};

const MAX_TITLE_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub created: bool,
    pub path: String,
}

pub struct ArticleStore {
    vault: Arc<dyn Vault>,
    renderer: Arc<dyn Renderer>,
}

impl ArticleStore {
    pub fn new(vault: Arc<dyn Vault>) -> Self {
        Self {
            vault,
            renderer: Arc::new(MarkdownRenderer),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Every vault document, with the article URL from its front matter.
    ///
    /// Unreadable documents are skipped with a warning.
    pub async fn annotation_files(&self) -> Result<Vec<AnnotationFile>> {
        let mut files = Vec::new();
        for path in self.vault.list().await? {
            match self.vault.read_front_matter(&path).await {
                Ok(front) => files.push(AnnotationFile {
                    article_url: front.as_ref().and_then(article_url),
                    path,
                }),
                Err(e) => warn!("Skipping unreadable document: {}", e),
            }
        }
        Ok(files)
    }

    /// Path of the document holding the article with `url`, if any.
    pub async fn find_article_file(&self, url: &str) -> Result<Option<String>> {
        Ok(self
            .annotation_files()
            .await?
            .into_iter()
            .find(|f| f.article_url.as_deref() == Some(url))
            .map(|f| f.path))
    }

    pub async fn is_article_saved(&self, article: &Article) -> Result<bool> {
        Ok(self
            .find_article_file(&article.metadata.url)
            .await?
            .is_some())
    }

    pub async fn save(&self, article: &Article, config: &SyncConfig) -> Result<SaveOutcome> {
        match self.find_article_file(&article.metadata.url).await? {
            Some(path) if !config.overwrite_on_update => {
                let existing = self.vault.read(&path).await?;
                let fragment = self.renderer.render(article, false);
                self.vault
                    .write(&path, &format!("{}{}", existing, fragment))
                    .await?;
                debug!("Appended {} highlights to {}", article.highlights.len(), path);
                Ok(SaveOutcome {
                    created: false,
                    path,
                })
            }
            Some(path) => {
                let trashed = self.vault.trash(&path).await?;
                info!("Replacing {} (old copy at {})", path, trashed);
                self.create(article, config).await
            }
            None => self.create(article, config).await,
        }
    }

    async fn create(&self, article: &Article, config: &SyncConfig) -> Result<SaveOutcome> {
        let path = self.resolve_path(article, config).await?;
        let markdown = self.renderer.render(article, true);
        let document = add_front_matter(&markdown, article)?;
        self.vault.write(&path, &document).await?;
        debug!("Created {}", path);
        Ok(SaveOutcome {
            created: true,
            path,
        })
    }

    /// A free path for a new file holding `article`.
    ///
    /// The folder is `highlights_folder`, or `highlights_folder/<author>`
    /// with domain folders enabled, and is created if missing. A taken
    /// `Title.md` becomes `Title (1).md`, `Title (2).md`, and so on.
    pub async fn resolve_path(&self, article: &Article, config: &SyncConfig) -> Result<String> {
        let folder = if config.use_domain_folders {
            join_path(
                &config.highlights_folder,
                &sanitize_title(&article.metadata.author),
            )
        } else {
            config.highlights_folder.clone()
        };

        if !self.vault.exists(&folder).await? {
            self.vault.create_folder(&folder).await?;
        }

        let file_name = format!("{}.md", sanitize_title(&article.metadata.title));
        let candidate = join_path(&folder, &file_name);
        if !self.vault.exists(&candidate).await? {
            return Ok(candidate);
        }

        let bound = self.vault.list().await?.len() + 1;
        for n in 1..=bound {
            let candidate = join_path(&folder, &numbered_name(&file_name, n));
            if !self.vault.exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(SyncError::storage(
            "resolve path",
            join_path(&folder, &file_name),
            format!("no free name after {} attempts", bound),
        ))
    }
}

/// A filesystem-safe file stem for `title`.
///
/// Drops characters that break links or paths (`' : # |` and
/// `/ ? < > \ * "`) along with control characters, collapses whitespace,
/// and falls back to `Untitled`.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '\'' | ':' | '#' | '|' | '/' | '?' | '<' | '>' | '\\' | '*' | '"'))
        .filter(|c| !c.is_control())
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    let trimmed = truncated.trim_end_matches(['.', ' ']).trim_start_matches('.');
    if trimmed.is_empty() {
        "Untitled".to_string()
    } else {
        trimmed.to_string()
    }
}
