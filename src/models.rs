//! Core data models used throughout the sync pipeline.
//!
//! Raw records arrive from the API as [`RawAnnotation`]s, are grouped by the
//! parser into [`Article`]s, and each article becomes one Markdown file.

use serde::{Deserialize, Serialize};

/// One annotation row from `GET /search`, kept as opaque JSON.
///
/// The pagination loops only need `uri` and `updated`; everything else is
/// interpreted by the parser, one record at a time, so a malformed row never
/// poisons the page it arrived in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawAnnotation(pub serde_json::Value);

impl RawAnnotation {
    pub fn id(&self) -> &str {
        self.0.get("id").and_then(|v| v.as_str()).unwrap_or("<unknown>")
    }

    pub fn uri(&self) -> Option<&str> {
        self.0.get("uri").and_then(|v| v.as_str())
    }

    pub fn group(&self) -> Option<&str> {
        self.0.get("group").and_then(|v| v.as_str())
    }

    /// The `updated` timestamp exactly as the server sent it.
    pub fn updated(&self) -> Option<&str> {
        self.0.get("updated").and_then(|v| v.as_str())
    }
}

/// A single parsed annotation: a highlight, page note, or reply.
///
/// `text` is the quoted source text. A `None` text marks a page note (or a
/// reply without a quote), which the parser routes to
/// [`Article::page_notes`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Highlight {
    pub id: String,
    /// Creation time, formatted with the configured date format.
    pub created: String,
    /// Last update time, formatted with the configured date format.
    pub updated: String,
    pub text: Option<String>,
    /// Share link that opens the annotation in context.
    pub incontext: String,
    pub anchor: String,
    pub user: String,
    /// The annotation body written by the user.
    pub annotation: String,
    pub tags: Vec<String>,
    /// Display name of the group the annotation was made in.
    pub group: String,
    pub is_reply: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleMetadata {
    pub title: String,
    pub url: String,
    /// The article's domain, without a leading `www.`.
    pub author: String,
}

/// All annotations sharing one source URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    /// MD5 hex digest of the URL; stable across runs.
    pub id: String,
    pub metadata: ArticleMetadata,
    pub highlights: Vec<Highlight>,
    pub page_notes: Vec<Highlight>,
}

/// An annotation group and whether its annotations should be synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

/// Aggregate counts reported when a sync run completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub new_articles_count: u64,
    pub new_highlights_count: u64,
}

/// A Markdown document in the vault that was written by this tool.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationFile {
    /// Vault-relative path, `/`-separated.
    pub path: String,
    /// The `url` recorded in the document's front matter.
    pub article_url: Option<String>,
}
