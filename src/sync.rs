//! Sync orchestration.
//!
//! [`Syncer::run`] drives one sync end to end:
//!
//! ```text
//! refresh groups → fetch → record cursor → parse → save each article → history
//! ```
//!
//! Status moves `Idle → Running → Completed | Failed`. Failures before the
//! save phase (auth, network, pagination) abort the run and are reported
//! once through [`SyncProgressEvent::ErrorSync`]. A failed article save is
//! reported through [`SyncProgressEvent::ErrorJob`] and the remaining
//! articles are still saved. Articles are saved one at a time.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::api::{AnnotationSource, FetchOutcome};
use crate::article_store::{ArticleStore, SaveOutcome};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::groups::refresh_groups;
use crate::models::SyncCounts;
use crate::parser::{parse_annotations, ParseOptions};
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};
use crate::settings::SettingsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

/// An article whose save failed.
#[derive(Debug)]
pub struct ArticleFailure {
    pub title: String,
    pub url: String,
    pub error: SyncError,
}

/// Result of a completed run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub counts: SyncCounts,
    pub saved: Vec<SaveOutcome>,
    pub failed: Vec<ArticleFailure>,
    /// Rows the parser dropped.
    pub skipped: Vec<SyncError>,
    pub limit_reached: bool,
}

pub struct Syncer {
    source: Arc<dyn AnnotationSource>,
    store: ArticleStore,
    settings: Arc<dyn SettingsStore>,
    base: SyncConfig,
    progress: Box<dyn SyncProgressReporter>,
    status: SyncStatus,
}

impl Syncer {
    /// `base` supplies the file-backed options; the cursor and group list
    /// are read from `settings` at the start of every run.
    pub fn new(
        source: Arc<dyn AnnotationSource>,
        store: ArticleStore,
        settings: Arc<dyn SettingsStore>,
        base: SyncConfig,
    ) -> Self {
        Self {
            source,
            store,
            settings,
            base,
            progress: Box::new(NoProgress),
            status: SyncStatus::Idle,
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Run one sync. With `uri`, only that page's annotations are fetched
    /// and the stored cursor is left alone.
    pub async fn run(&mut self, uri: Option<&str>) -> Result<SyncReport> {
        self.status = SyncStatus::Running;
        self.progress.report(SyncProgressEvent::StartSync);

        match self.run_stages(uri).await {
            Ok(report) => {
                self.status = SyncStatus::Completed;
                info!(
                    "Sync complete: {} articles, {} highlights ({} failed, {} skipped rows)",
                    report.counts.new_articles_count,
                    report.counts.new_highlights_count,
                    report.failed.len(),
                    report.skipped.len()
                );
                self.progress
                    .report(SyncProgressEvent::CompleteSync(report.counts));
                Ok(report)
            }
            Err(e) => {
                self.status = SyncStatus::Failed;
                error!("Sync failed: {}", e);
                self.progress.report(SyncProgressEvent::ErrorSync {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_stages(&self, uri: Option<&str>) -> Result<SyncReport> {
        refresh_groups(self.source.as_ref(), self.settings.as_ref()).await?;
        let config = self.base.clone().with_settings(&self.settings.snapshot());

        let fetched = match uri {
            Some(uri) => {
                info!("Syncing annotations for {}", uri);
                FetchOutcome {
                    rows: self.source.fetch_all_for_uri(uri).await?,
                    ..FetchOutcome::default()
                }
            }
            None => {
                self.source
                    .fetch_highlights(
                        config.last_sync_date.as_deref(),
                        config.overwrite_on_update,
                        config.fetch_limit,
                    )
                    .await?
            }
        };

        if let Some(mark) = &fetched.high_water_mark {
            self.settings.set_last_synced_annotation(mark)?;
        }
        if fetched.limit_reached {
            warn!("Fetched {} annotations, the configured limit", fetched.rows.len());
            self.progress.report(SyncProgressEvent::LimitReached {
                limit: config.fetch_limit,
            });
        }

        let options = ParseOptions {
            date_time_format: &config.date_time_format,
            contextual_tags: config.enable_contextual_tags,
        };
        let parsed = parse_annotations(&fetched.rows, &config.groups, &options);

        let mut report = SyncReport {
            skipped: parsed.skipped,
            limit_reached: fetched.limit_reached,
            ..SyncReport::default()
        };

        let articles = parsed.articles;
        let total = articles.len();
        self.progress.report(SyncProgressEvent::SetJobs {
            articles: articles.iter().map(|a| a.metadata.title.clone()).collect(),
        });

        for (i, article) in articles.iter().enumerate() {
            let index = i + 1;
            let title = article.metadata.title.clone();
            self.progress.report(SyncProgressEvent::StartJob {
                index,
                total,
                title: title.clone(),
            });

            match self.store.save(article, &config).await {
                Ok(outcome) => {
                    report.counts.new_articles_count += 1;
                    report.counts.new_highlights_count += article.highlights.len() as u64;
                    self.progress.report(SyncProgressEvent::CompleteJob {
                        index,
                        total,
                        title,
                        created: outcome.created,
                    });
                    report.saved.push(outcome);
                }
                Err(e) => {
                    error!("Error syncing {}: {}", title, e);
                    self.progress.report(SyncProgressEvent::ErrorJob {
                        index,
                        total,
                        title: title.clone(),
                        message: e.to_string(),
                    });
                    report.failed.push(ArticleFailure {
                        title,
                        url: article.metadata.url.clone(),
                        error: e,
                    });
                }
            }
        }

        // Saved articles stand even if the totals cannot be written.
        if let Err(e) = self.settings.increment_history(&report.counts) {
            error!("Failed to update sync history: {}", e);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RemoteGroup;
    use crate::models::RawAnnotation;
    use crate::settings::{MemorySettingsStore, SettingsState, SyncHistory};
    use crate::vault::{InMemoryVault, Vault};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSource {
        rows: Vec<RawAnnotation>,
        limit_reached: bool,
        fail_fetch: bool,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AnnotationSource for FakeSource {
        async fn fetch_groups(&self) -> Result<Vec<RemoteGroup>> {
            Ok(vec![RemoteGroup {
                id: "__world__".into(),
                name: "Public".into(),
            }])
        }

        async fn fetch_highlights(
            &self,
            since: Option<&str>,
            overwrite: bool,
            _limit: usize,
        ) -> Result<FetchOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("highlights since={:?} overwrite={}", since, overwrite));
            if self.fail_fetch {
                return Err(SyncError::Auth {
                    operation: "search annotations".into(),
                    status: 401,
                });
            }
            Ok(FetchOutcome {
                rows: self.rows.clone(),
                limit_reached: self.limit_reached,
                high_water_mark: self.rows.last().and_then(|r| r.updated()).map(str::to_string),
            })
        }

        async fn fetch_all_for_uri(&self, uri: &str) -> Result<Vec<RawAnnotation>> {
            self.calls.lock().unwrap().push(format!("uri {}", uri));
            Ok(self
                .rows
                .iter()
                .filter(|r| r.uri() == Some(uri))
                .cloned()
                .collect())
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<SyncProgressEvent>>>);

    impl SyncProgressReporter for Recorder {
        fn report(&self, event: SyncProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl Recorder {
        fn names(&self) -> Vec<&'static str> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(|e| match e {
                    SyncProgressEvent::StartSync => "start_sync",
                    SyncProgressEvent::SetJobs { .. } => "set_jobs",
                    SyncProgressEvent::StartJob { .. } => "start_job",
                    SyncProgressEvent::CompleteJob { .. } => "complete_job",
                    SyncProgressEvent::ErrorJob { .. } => "error_job",
                    SyncProgressEvent::LimitReached { .. } => "limit_reached",
                    SyncProgressEvent::CompleteSync(_) => "complete_sync",
                    SyncProgressEvent::ErrorSync { .. } => "error_sync",
                })
                .collect()
        }
    }

    /// Fails every write whose path contains "Broken".
    struct FlakyVault(InMemoryVault);

    #[async_trait]
    impl Vault for FlakyVault {
        async fn list(&self) -> Result<Vec<String>> {
            self.0.list().await
        }
        async fn read(&self, path: &str) -> Result<String> {
            self.0.read(path).await
        }
        async fn write(&self, path: &str, text: &str) -> Result<()> {
            if path.contains("Broken") {
                return Err(SyncError::storage("write document", path, "disk full"));
            }
            self.0.write(path, text).await
        }
        async fn create_folder(&self, path: &str) -> Result<()> {
            self.0.create_folder(path).await
        }
        async fn exists(&self, path: &str) -> Result<bool> {
            self.0.exists(path).await
        }
        async fn trash(&self, path: &str) -> Result<String> {
            self.0.trash(path).await
        }
    }

    fn record(id: &str, uri: &str, updated: &str, title: &str) -> Value {
        json!({
            "id": id,
            "uri": uri,
            "created": "2024-03-01T10:00:00.000000+00:00",
            "updated": updated,
            "user": "acct:alice@hypothes.is",
            "text": "",
            "tags": [],
            "group": "__world__",
            "target": [{
                "source": uri,
                "selector": [{ "type": "TextQuoteSelector", "exact": format!("quote {}", id) }]
            }],
            "document": { "title": [title] },
            "links": { "incontext": format!("https://hyp.is/{}", id) }
        })
    }

    fn three_rows() -> Vec<RawAnnotation> {
        let mut reply = record("r1", "https://a.com/x", "2024-03-02T00:00:00.000000+00:00", "A");
        reply["target"] = json!([{ "source": "https://a.com/x" }]);
        reply["references"] = json!(["h1"]);
        reply["text"] = json!("agreed");
        vec![
            record("h1", "https://a.com/x", "2024-03-01T00:00:00.000000+00:00", "A"),
            reply,
            record("h2", "https://b.com/y", "2024-03-03T00:00:00.000000+00:00", "B"),
        ]
        .into_iter()
        .map(RawAnnotation)
        .collect()
    }

    fn syncer(
        source: FakeSource,
        vault: Arc<dyn Vault>,
        settings: Arc<MemorySettingsStore>,
    ) -> (Syncer, Recorder) {
        let recorder = Recorder::default();
        let syncer = Syncer::new(
            Arc::new(source),
            ArticleStore::new(vault),
            settings,
            SyncConfig::default(),
        )
        .with_progress(Box::new(recorder.clone()));
        (syncer, recorder)
    }

    #[tokio::test]
    async fn full_run_saves_articles_and_records_cursor() {
        let vault = Arc::new(InMemoryVault::new());
        let settings = Arc::new(MemorySettingsStore::default());
        let source = FakeSource {
            rows: three_rows(),
            ..FakeSource::default()
        };
        let (mut syncer, recorder) = syncer(source, vault.clone(), settings.clone());

        let report = syncer.run(None).await.unwrap();

        assert_eq!(syncer.status(), SyncStatus::Completed);
        assert_eq!(
            report.counts,
            SyncCounts {
                new_articles_count: 2,
                new_highlights_count: 2
            }
        );
        assert_eq!(vault.list().await.unwrap(), vec!["A.md", "B.md"]);
        assert!(vault.get("A.md").unwrap().contains("- Reply: agreed"));

        let state = settings.snapshot();
        assert_eq!(
            state.last_sync_date.as_deref(),
            Some("2024-03-03T00:00:00.000000+00:00")
        );
        assert_eq!(state.history.total_articles, 2);
        assert_eq!(state.groups.len(), 1);
        assert_eq!(
            recorder.names(),
            vec![
                "start_sync",
                "set_jobs",
                "start_job",
                "complete_job",
                "start_job",
                "complete_job",
                "complete_sync"
            ]
        );
    }

    #[tokio::test]
    async fn second_run_uses_stored_cursor_and_appends() {
        let vault = Arc::new(InMemoryVault::new());
        let settings = Arc::new(MemorySettingsStore::default());
        let (mut first, _) = syncer(
            FakeSource {
                rows: three_rows(),
                ..FakeSource::default()
            },
            vault.clone(),
            settings.clone(),
        );
        first.run(None).await.unwrap();

        let later = vec![RawAnnotation(record(
            "h3",
            "https://a.com/x",
            "2024-03-04T00:00:00.000000+00:00",
            "A",
        ))];
        let source = Arc::new(FakeSource {
            rows: later,
            ..FakeSource::default()
        });
        let mut second = Syncer::new(
            source.clone(),
            ArticleStore::new(vault.clone()),
            settings.clone(),
            SyncConfig::default(),
        );
        let report = second.run(None).await.unwrap();

        assert!(!report.saved[0].created);
        assert_eq!(
            source.calls.lock().unwrap().as_slice(),
            ["highlights since=Some(\"2024-03-03T00:00:00.000000+00:00\") overwrite=false"]
        );
        let doc = vault.get("A.md").unwrap();
        assert!(doc.contains("quote h1"));
        assert!(doc.contains("quote h3"));
        assert_eq!(settings.snapshot().history.total_articles, 3);
    }

    #[tokio::test]
    async fn fetch_failure_fails_the_run() {
        let settings = Arc::new(MemorySettingsStore::default());
        let source = FakeSource {
            rows: three_rows(),
            fail_fetch: true,
            ..FakeSource::default()
        };
        let (mut syncer, recorder) =
            syncer(source, Arc::new(InMemoryVault::new()), settings.clone());

        let err = syncer.run(None).await.unwrap_err();
        assert!(matches!(err, SyncError::Auth { status: 401, .. }));
        assert_eq!(syncer.status(), SyncStatus::Failed);
        assert_eq!(recorder.names(), vec!["start_sync", "error_sync"]);
        assert!(settings.snapshot().last_sync_date.is_none());
    }

    #[tokio::test]
    async fn failed_article_does_not_stop_the_batch() {
        let vault = Arc::new(FlakyVault(InMemoryVault::new()));
        let settings = Arc::new(MemorySettingsStore::default());
        let rows = vec![
            RawAnnotation(record("h1", "https://a.com/x", "2024-03-01T00:00:00+00:00", "Broken")),
            RawAnnotation(record("h2", "https://b.com/y", "2024-03-02T00:00:00+00:00", "Fine")),
        ];
        let (mut syncer, recorder) = syncer(
            FakeSource {
                rows,
                ..FakeSource::default()
            },
            vault.clone(),
            settings,
        );

        let report = syncer.run(None).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].url, "https://a.com/x");
        assert_eq!(report.counts.new_articles_count, 1);
        assert_eq!(vault.0.list().await.unwrap(), vec!["Fine.md"]);
        assert_eq!(
            recorder.names(),
            vec![
                "start_sync",
                "set_jobs",
                "start_job",
                "error_job",
                "start_job",
                "complete_job",
                "complete_sync"
            ]
        );
    }

    /// Accepts every update except history increments.
    struct HistoryWriteFails(MemorySettingsStore);

    impl SettingsStore for HistoryWriteFails {
        fn snapshot(&self) -> SettingsState {
            self.0.snapshot()
        }
        fn update(&self, apply: &mut dyn FnMut(&mut SettingsState)) -> Result<()> {
            self.0.update(apply)
        }
        fn increment_history(&self, _counts: &SyncCounts) -> Result<()> {
            Err(SyncError::storage("write settings", "state.json", "read-only"))
        }
    }

    #[tokio::test]
    async fn history_write_failure_still_completes_the_run() {
        let vault = Arc::new(InMemoryVault::new());
        let settings = Arc::new(HistoryWriteFails(MemorySettingsStore::default()));
        let recorder = Recorder::default();
        let mut syncer = Syncer::new(
            Arc::new(FakeSource {
                rows: three_rows(),
                ..FakeSource::default()
            }),
            ArticleStore::new(vault.clone()),
            settings.clone(),
            SyncConfig::default(),
        )
        .with_progress(Box::new(recorder.clone()));

        let report = syncer.run(None).await.unwrap();
        assert_eq!(syncer.status(), SyncStatus::Completed);
        assert_eq!(report.counts.new_articles_count, 2);
        assert_eq!(recorder.names().last(), Some(&"complete_sync"));
        assert_eq!(settings.snapshot().history, SyncHistory::default());
        assert!(settings.snapshot().last_sync_date.is_some());
    }

    #[tokio::test]
    async fn single_uri_sync_keeps_cursor() {
        let vault = Arc::new(InMemoryVault::new());
        let settings = Arc::new(MemorySettingsStore::default());
        settings
            .set_last_synced_annotation("2024-01-01T00:00:00+00:00")
            .unwrap();
        let (mut syncer, _) = syncer(
            FakeSource {
                rows: three_rows(),
                ..FakeSource::default()
            },
            vault.clone(),
            settings.clone(),
        );

        let report = syncer.run(Some("https://b.com/y")).await.unwrap();
        assert_eq!(report.counts.new_articles_count, 1);
        assert_eq!(vault.list().await.unwrap(), vec!["B.md"]);
        assert_eq!(
            settings.snapshot().last_sync_date.as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
    }

    #[tokio::test]
    async fn limit_and_unknown_groups_are_reported() {
        let mut rows = three_rows();
        rows[2].0["group"] = json!("g-unknown");
        let (mut syncer, recorder) = syncer(
            FakeSource {
                rows,
                limit_reached: true,
                ..FakeSource::default()
            },
            Arc::new(InMemoryVault::new()),
            Arc::new(MemorySettingsStore::default()),
        );

        let report = syncer.run(None).await.unwrap();
        assert!(report.limit_reached);
        assert_eq!(report.skipped.len(), 1);
        assert!(matches!(report.skipped[0], SyncError::GroupMismatch { .. }));
        assert_eq!(report.counts.new_articles_count, 1);
        assert!(recorder.names().contains(&"limit_reached"));
    }
}
