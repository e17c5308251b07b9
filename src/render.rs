//! Markdown rendering of a single article.
//!
//! Rendering is a pure function of the article and whether the output
//! starts a new file. A continuation fragment (`is_new_file == false`) omits
//! the metadata header so it can be appended to an existing document.

use std::fmt::Write as _;

use crate::models::{Article, Highlight};

pub trait Renderer: Send + Sync {
    fn render(&self, article: &Article, is_new_file: bool) -> String;
}

/// Default layout: metadata header, page notes, then highlights.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownRenderer;

impl Renderer for MarkdownRenderer {
    fn render(&self, article: &Article, is_new_file: bool) -> String {
        let mut out = String::new();
        let meta = &article.metadata;

        if is_new_file {
            let _ = writeln!(out, "# {}\n", meta.title);
            let _ = writeln!(out, "## Metadata");
            let _ = writeln!(out, "- Author: [{}]({})", meta.author, meta.url);
            let _ = writeln!(out, "- Title: {}", meta.title);
            let _ = writeln!(out, "- Reference: {}", meta.url);
            let _ = writeln!(out, "- Category: #article\n");
        }

        if !article.page_notes.is_empty() {
            let _ = writeln!(out, "## Page Notes");
            for note in &article.page_notes {
                render_page_note(&mut out, note);
            }
            out.push('\n');
        }

        if !article.highlights.is_empty() {
            let _ = writeln!(out, "## Highlights");
            for highlight in &article.highlights {
                render_highlight(&mut out, highlight);
            }
            out.push('\n');
        }

        out
    }
}

fn render_page_note(out: &mut String, note: &Highlight) {
    let label = if note.is_reply { "Reply" } else { "Note" };
    let _ = writeln!(
        out,
        "- {}: {} - [Updated on {}]({})",
        label,
        indent_continuation(note.annotation.trim_end()),
        note.updated,
        note.incontext
    );
    render_tags(out, note);
    render_group(out, note);
}

fn render_highlight(out: &mut String, highlight: &Highlight) {
    let text = highlight.text.as_deref().unwrap_or_default();
    let _ = writeln!(
        out,
        "- {} - [Updated on {}]({})",
        text, highlight.updated, highlight.incontext
    );
    render_tags(out, highlight);
    let annotation = highlight.annotation.trim_end();
    if !annotation.is_empty() {
        let _ = writeln!(out, "    - Annotation: {}", indent_continuation(annotation));
    }
    render_group(out, highlight);
}

fn render_tags(out: &mut String, h: &Highlight) {
    if h.tags.is_empty() {
        return;
    }
    let tags: Vec<String> = h
        .tags
        .iter()
        .map(|t| format!("#{}", t.trim().replace(' ', "-")))
        .collect();
    let _ = writeln!(out, "    - Tags: {}", tags.join(" "));
}

fn render_group(out: &mut String, h: &Highlight) {
    if !h.group.is_empty() && h.group != "Public" {
        let _ = writeln!(out, "    - Group: {}", h.group);
    }
}

/// Keep multi-line annotation bodies inside their list item.
fn indent_continuation(text: &str) -> String {
    text.replace('\n', "\n      ")
}
