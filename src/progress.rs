//! Sync progress reporting.
//!
//! The orchestrator emits one [`SyncProgressEvent`] per state change: run
//! start, the article list, each article's start and outcome, and the run
//! result. Progress is written to **stderr** so stdout stays parseable for
//! scripts.

use std::io::Write;

use crate::models::SyncCounts;

/// Printed when a fetch stops at the configured annotation limit.
pub const LIMIT_REACHED_MESSAGE: &str = "Reached annotations limit, please sync again.";

#[derive(Clone, Debug, PartialEq)]
pub enum SyncProgressEvent {
    StartSync,
    /// Titles of the articles about to be saved, in save order.
    SetJobs { articles: Vec<String> },
    StartJob { index: usize, total: usize, title: String },
    CompleteJob {
        index: usize,
        total: usize,
        title: String,
        created: bool,
    },
    ErrorJob {
        index: usize,
        total: usize,
        title: String,
        message: String,
    },
    /// The fetch returned as many rows as the limit allows.
    LimitReached { limit: usize },
    CompleteSync(SyncCounts),
    ErrorSync { message: String },
}

/// Receives progress events from [`Syncer`](crate::sync::Syncer).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync  [3/12] Some Title  created".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::StartSync => "sync  fetching annotations...\n".to_string(),
            SyncProgressEvent::SetJobs { articles } => format!(
                "sync  {} articles to save\n",
                format_number(articles.len() as u64)
            ),
            // Outcome lines carry the title; a start line would only duplicate it.
            SyncProgressEvent::StartJob { .. } => return,
            SyncProgressEvent::CompleteJob {
                index,
                total,
                title,
                created,
            } => format!(
                "sync  [{}/{}] {}  {}\n",
                index,
                total,
                title,
                if *created { "created" } else { "updated" }
            ),
            SyncProgressEvent::ErrorJob {
                index,
                total,
                title,
                message,
            } => format!("sync  [{}/{}] {}  failed: {}\n", index, total, title, message),
            SyncProgressEvent::LimitReached { .. } => format!("{}\n", LIMIT_REACHED_MESSAGE),
            SyncProgressEvent::CompleteSync(counts) => format!(
                "sync  done: {} new articles, {} new highlights\n",
                format_number(counts.new_articles_count),
                format_number(counts.new_highlights_count)
            ),
            SyncProgressEvent::ErrorSync { message } => format!("sync  failed: {}\n", message),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::StartSync => serde_json::json!({ "event": "start_sync" }),
            SyncProgressEvent::SetJobs { articles } => serde_json::json!({
                "event": "set_jobs",
                "articles": articles
            }),
            SyncProgressEvent::StartJob { index, total, title } => serde_json::json!({
                "event": "start_job",
                "n": index,
                "total": total,
                "title": title
            }),
            SyncProgressEvent::CompleteJob {
                index,
                total,
                title,
                created,
            } => serde_json::json!({
                "event": "complete_job",
                "n": index,
                "total": total,
                "title": title,
                "created": created
            }),
            SyncProgressEvent::ErrorJob {
                index,
                total,
                title,
                message,
            } => serde_json::json!({
                "event": "error_job",
                "n": index,
                "total": total,
                "title": title,
                "error": message
            }),
            SyncProgressEvent::LimitReached { limit } => serde_json::json!({
                "event": "limit_reached",
                "limit": limit,
                "message": LIMIT_REACHED_MESSAGE
            }),
            SyncProgressEvent::CompleteSync(counts) => serde_json::json!({
                "event": "complete_sync",
                "new_articles_count": counts.new_articles_count,
                "new_highlights_count": counts.new_highlights_count
            }),
            SyncProgressEvent::ErrorSync { message } => serde_json::json!({
                "event": "error_sync",
                "error": message
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}' (expected human, json or off)",
                other
            )),
        }
    }
}
