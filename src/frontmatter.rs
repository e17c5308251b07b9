//! YAML front matter for article documents.
//!
//! Every document this tool writes starts with a front-matter block carrying
//! [`DOC_TYPE`] and the article URL. The article store finds existing files
//! by that URL, never by filename.

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::error::{Result, SyncError};
use crate::models::Article;

/// Marks a document as written by this tool.
pub const DOC_TYPE: &str = "hypothesis-highlights";

pub type FrontMatter = Mapping;

#[derive(Serialize)]
struct ArticleFrontMatter<'a> {
    doc_type: &'a str,
    url: &'a str,
    title: &'a str,
    author: &'a str,
    article_id: &'a str,
}

/// Prefix `markdown` with the article's front matter.
pub fn add_front_matter(markdown: &str, article: &Article) -> Result<String> {
    let fields = ArticleFrontMatter {
        doc_type: DOC_TYPE,
        url: &article.metadata.url,
        title: &article.metadata.title,
        author: &article.metadata.author,
        article_id: &article.id,
    };
    let yaml = serde_yaml::to_string(&fields)
        .map_err(|e| SyncError::storage("serialize front matter", &article.metadata.url, e))?;
    Ok(format!("---\n{}---\n{}", yaml, markdown))
}

/// Parse the leading `---` block of `text`, if any.
///
/// Documents without front matter, or with YAML that is not a mapping,
/// yield `None`.
pub fn parse_front_matter(text: &str) -> Option<FrontMatter> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            return match serde_yaml::from_str::<Value>(yaml) {
                Ok(Value::Mapping(map)) => Some(map),
                _ => None,
            };
        }
        offset += line.len();
    }
    None
}

/// The article URL recorded in `front`, if the document is one of ours.
pub fn article_url(front: &FrontMatter) -> Option<String> {
    let doc_type = front.get("doc_type").and_then(Value::as_str)?;
    if doc_type != DOC_TYPE {
        return None;
    }
    front.get("url").and_then(Value::as_str).map(str::to_string)
}
