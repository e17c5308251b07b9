//! Conversion of raw `/search` rows into per-article aggregates.
//!
//! Rows are grouped by the MD5 of their `uri`, in first-seen order. Each row
//! becomes a [`Highlight`]; rows without quoted text land in the article's
//! page notes. Rows that cannot be converted are reported in
//! [`ParsedAnnotations::skipped`] and never abort the batch.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use chrono::DateTime;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::error::{Result, SyncError};
use crate::models::{Article, ArticleMetadata, Group, Highlight, RawAnnotation};

/// URIs of PDF annotations start with this; they are not web pages.
pub const PDF_URI_PREFIX: &str = "urn:x-pdf";

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions<'a> {
    /// chrono strftime pattern for `created`/`updated`.
    pub date_time_format: &'a str,
    pub contextual_tags: bool,
}

#[derive(Debug, Default)]
pub struct ParsedAnnotations {
    /// Articles in order of first-seen URL.
    pub articles: Vec<Article>,
    /// Rows dropped because they could not be converted.
    pub skipped: Vec<SyncError>,
}

#[derive(Deserialize)]
struct AnnotationRecord {
    id: String,
    uri: String,
    created: String,
    updated: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    group: String,
    #[serde(default)]
    references: Option<Vec<String>>,
    #[serde(default)]
    target: Vec<Target>,
    #[serde(default)]
    document: Option<DocumentInfo>,
    links: Links,
}

#[derive(Deserialize)]
struct Target {
    #[serde(default)]
    selector: Option<Vec<Selector>>,
}

#[derive(Deserialize)]
struct Selector {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    exact: Option<String>,
}

#[derive(Deserialize)]
struct DocumentInfo {
    #[serde(default)]
    title: Vec<String>,
}

#[derive(Deserialize)]
struct Links {
    incontext: String,
}

/// Lowercase hex MD5 of `input`; the article id and contextual-tag scheme.
pub fn content_hash(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Group `rows` into articles.
///
/// Rows for PDFs and for unselected groups are dropped silently. Rows whose
/// group id is not in `groups` at all are reported as
/// [`SyncError::GroupMismatch`]; malformed rows as [`SyncError::Parse`].
pub fn parse_annotations(
    rows: &[RawAnnotation],
    groups: &[Group],
    options: &ParseOptions<'_>,
) -> ParsedAnnotations {
    let mut parsed = ParsedAnnotations::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for raw in rows {
        if raw.uri().is_some_and(|uri| uri.starts_with(PDF_URI_PREFIX)) {
            continue;
        }

        let (record, group) = match resolve(raw, groups) {
            Ok(Some(resolved)) => resolved,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping annotation: {}", e);
                parsed.skipped.push(e);
                continue;
            }
        };

        let article_id = content_hash(&record.uri);
        let metadata = if index.contains_key(&article_id) {
            None
        } else {
            match article_metadata(&record) {
                Ok(metadata) => Some(metadata),
                Err(e) => {
                    warn!("Skipping annotation: {}", e);
                    parsed.skipped.push(e);
                    continue;
                }
            }
        };

        let highlight = match build_highlight(&record, &group.name, options) {
            Ok(h) => h,
            Err(e) => {
                warn!("Skipping annotation: {}", e);
                parsed.skipped.push(e);
                continue;
            }
        };

        let slot = match index.get(&article_id).copied() {
            Some(slot) => slot,
            None => {
                let Some(metadata) = metadata else { continue };
                parsed.articles.push(Article {
                    id: article_id.clone(),
                    metadata,
                    highlights: Vec::new(),
                    page_notes: Vec::new(),
                });
                let slot = parsed.articles.len() - 1;
                index.insert(article_id, slot);
                slot
            }
        };

        let article = &mut parsed.articles[slot];
        if highlight.text.is_none() {
            article.page_notes.push(highlight);
        } else {
            article.highlights.push(highlight);
        }
    }

    parsed
}

/// Look up a row's group and deserialize it. `Ok(None)` means the group is
/// not selected; such rows are never deserialized.
fn resolve<'g>(
    raw: &RawAnnotation,
    groups: &'g [Group],
) -> Result<Option<(AnnotationRecord, &'g Group)>> {
    let group = groups.iter().find(|g| Some(g.id.as_str()) == raw.group());
    if group.is_some_and(|g| !g.selected) {
        return Ok(None);
    }

    let record: AnnotationRecord =
        serde_json::from_value(raw.0.clone()).map_err(|e| SyncError::parse(raw.id(), e))?;

    let group = group.ok_or_else(|| SyncError::GroupMismatch {
        annotation_id: record.id.clone(),
        group: record.group.clone(),
    })?;
    Ok(Some((record, group)))
}

fn article_metadata(record: &AnnotationRecord) -> Result<ArticleMetadata> {
    let url = Url::parse(&record.uri)
        .map_err(|e| SyncError::parse(&record.id, format!("invalid uri '{}': {}", record.uri, e)))?;

    let title = record
        .document
        .as_ref()
        .and_then(|d| d.title.first())
        .filter(|t| !t.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| title_from_url(&url));

    Ok(ArticleMetadata {
        title,
        url: record.uri.clone(),
        author: author_from_url(&url),
    })
}

/// The hostname without a leading `www.`.
pub fn author_from_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

/// A title slug from the URL path: `/notes/2024/rust/` becomes
/// `notes-2024-rust`.
pub fn title_from_url(url: &Url) -> String {
    let path = url.path();
    let path = path.strip_prefix('/').unwrap_or(path);
    let path = path.strip_suffix('/').unwrap_or(path);
    path.replace('/', "-")
}

fn build_highlight(
    record: &AnnotationRecord,
    group_name: &str,
    options: &ParseOptions<'_>,
) -> Result<Highlight> {
    let target = record
        .target
        .first()
        .ok_or_else(|| SyncError::parse(&record.id, "annotation has no target"))?;

    let (text, is_reply) = match &target.selector {
        Some(selectors) => {
            let quote = selectors
                .iter()
                .find(|s| s.kind == "TextQuoteSelector")
                .and_then(|s| s.exact.as_deref())
                .map(clean_text_selector_highlight)
                .filter(|t| !t.is_empty());
            (quote, false)
        }
        None => (None, record.references.is_some()),
    };

    let mut highlight = Highlight {
        id: record.id.clone(),
        created: format_timestamp(&record.id, &record.created, options.date_time_format)?,
        updated: format_timestamp(&record.id, &record.updated, options.date_time_format)?,
        text,
        incontext: record.links.incontext.clone(),
        anchor: String::new(),
        user: record.user.clone(),
        annotation: record.text.clone(),
        tags: record.tags.clone(),
        group: group_name.to_string(),
        is_reply,
    };

    if options.contextual_tags {
        apply_contextual_tags(&mut highlight);
    }

    Ok(highlight)
}

fn format_timestamp(annotation_id: &str, raw: &str, format: &str) -> Result<String> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| SyncError::parse(annotation_id, format!("invalid timestamp '{}': {}", raw, e)))?;
    let mut out = String::new();
    write!(out, "{}", parsed.format(format))
        .map_err(|_| SyncError::parse(annotation_id, format!("cannot format date with '{}'", format)))?;
    Ok(out)
}

/// Collapse the whitespace the HTML anchoring leaves in quoted text:
/// newlines and tabs become spaces, then runs of spaces become one.
pub fn clean_text_selector_highlight(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;
    for c in text.chars() {
        let c = if matches!(c, '\n' | '\t' | '\r') { ' ' } else { c };
        if c == ' ' {
            if prev_space {
                continue;
            }
            prev_space = true;
        } else {
            prev_space = false;
        }
        out.push(c);
    }
    out
}

fn share_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https://hyp\.is(?:[-a-zA-Z0-9@%_+~#?&/=]|[.:;]|\(\S*?\))*")
            .expect("share link pattern is valid")
    })
}

/// Tag every `hyp.is` share link in the body with `#<md5(link)>`, and tag
/// the highlight itself with the MD5 of its own share link.
pub fn apply_contextual_tags(highlight: &mut Highlight) {
    highlight.tags.push(content_hash(&highlight.incontext));

    let mut body = std::mem::take(&mut highlight.annotation);
    body.push('\n');

    let mut out = String::with_capacity(body.len());
    let mut last = 0;
    for m in share_link_regex().find_iter(&body) {
        let end = trim_trailing_punctuation(&body, m.start(), m.end());
        let link = &body[m.start()..end];
        out.push_str(&body[last..end]);
        out.push_str(" #");
        out.push_str(&content_hash(link));
        last = end;
    }
    out.push_str(&body[last..]);
    highlight.annotation = out;
}

/// `.`, `:` and `;` belong to a link only when a non-whitespace character
/// follows them.
fn trim_trailing_punctuation(text: &str, start: usize, mut end: usize) -> usize {
    while end > start {
        let last = text.as_bytes()[end - 1];
        if !matches!(last, b'.' | b':' | b';') {
            break;
        }
        let followed_by_text = text[end..].chars().next().is_some_and(|c| !c.is_whitespace());
        if followed_by_text {
            break;
        }
        end -= 1;
    }
    end
}
