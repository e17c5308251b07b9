//! End-to-end sync against a mock Hypothesis API and a vault on disk.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use hypothesis_sync::api::ApiClient;
use hypothesis_sync::article_store::ArticleStore;
use hypothesis_sync::config::SyncConfig;
use hypothesis_sync::frontmatter::{article_url, parse_front_matter};
use hypothesis_sync::settings::{FileSettingsStore, SettingsStore};
use hypothesis_sync::sync::Syncer;
use hypothesis_sync::vault::{FsVault, Vault};

/// `/search` over a mutable row set, honouring `search_after`, `uri`, and
/// `limit` the way the real API does.
#[derive(Clone, Default)]
struct SearchRows(Arc<Mutex<Vec<Value>>>);

impl SearchRows {
    fn push(&self, row: Value) {
        let mut rows = self.0.lock().unwrap();
        rows.push(row);
        rows.sort_by(|a, b| a["updated"].as_str().cmp(&b["updated"].as_str()));
    }
}

impl Respond for SearchRows {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut after = None;
        let mut uri = None;
        let mut limit = 200;
        for (k, v) in request.url.query_pairs() {
            match k.as_ref() {
                "search_after" => after = Some(v.to_string()),
                "uri" => uri = Some(v.to_string()),
                "limit" => limit = v.parse().unwrap(),
                _ => {}
            }
        }
        let page: Vec<Value> = self
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|r| after.as_deref().map_or(true, |a| r["updated"].as_str().unwrap() > a))
            .filter(|r| uri.as_deref().map_or(true, |u| r["uri"] == u))
            .take(limit)
            .cloned()
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "rows": page }))
    }
}

fn annotation(id: &str, uri: &str, updated: &str, quote: Option<&str>, note: &str) -> Value {
    let selector = match quote {
        Some(q) => json!([{ "type": "TextQuoteSelector", "exact": q }]),
        None => json!([]),
    };
    json!({
        "id": id,
        "uri": uri,
        "created": updated,
        "updated": updated,
        "user": "acct:alice@hypothes.is",
        "text": note,
        "tags": [],
        "group": "__world__",
        "target": [{ "source": uri, "selector": selector }],
        "document": { "title": ["Ownership in Rust"] },
        "links": { "incontext": format!("https://hyp.is/{}/{}", id, uri) }
    })
}

async fn mock_api(rows: SearchRows) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "__world__", "name": "Public" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(rows)
        .mount(&server)
        .await;
    server
}

fn syncer(server: &MockServer, root: &Path, config: SyncConfig) -> Syncer {
    let client = ApiClient::new(&server.uri(), "test-token", Duration::from_secs(5))
        .unwrap()
        .with_user(Some("acct:alice@hypothes.is".into()))
        .with_uri_concurrency(2);
    let vault = FsVault::new(root, ".trash", &[]).unwrap();
    let settings = FileSettingsStore::open(&root.join(".hsync").join("state.json")).unwrap();
    Syncer::new(
        Arc::new(client),
        ArticleStore::new(Arc::new(vault)),
        Arc::new(settings),
        config,
    )
}

fn highlights_config() -> SyncConfig {
    SyncConfig {
        highlights_folder: "Hypothesis".into(),
        ..SyncConfig::default()
    }
}

#[tokio::test]
async fn incremental_syncs_create_then_append() {
    let tmp = TempDir::new().unwrap();
    let rows = SearchRows::default();
    rows.push(annotation(
        "h1",
        "https://a.com/rust",
        "2024-03-01T10:00:00.000001+00:00",
        Some("values have one owner"),
        "",
    ));
    rows.push(annotation(
        "n1",
        "https://a.com/rust",
        "2024-03-01T11:00:00.000001+00:00",
        None,
        "worth re-reading",
    ));
    let server = mock_api(rows.clone()).await;

    let report = syncer(&server, tmp.path(), highlights_config())
        .run(None)
        .await
        .unwrap();
    assert_eq!(report.counts.new_articles_count, 1);
    assert_eq!(report.counts.new_highlights_count, 1);

    let file = tmp.path().join("Hypothesis").join("Ownership in Rust.md");
    let first = std::fs::read_to_string(&file).unwrap();
    let front = parse_front_matter(&first).unwrap();
    assert_eq!(article_url(&front).as_deref(), Some("https://a.com/rust"));
    assert!(first.contains("values have one owner"));
    assert!(first.contains("worth re-reading"));

    rows.push(annotation(
        "h2",
        "https://a.com/rust",
        "2024-03-05T09:00:00.000001+00:00",
        Some("borrowing is temporary"),
        "",
    ));
    let report = syncer(&server, tmp.path(), highlights_config())
        .run(None)
        .await
        .unwrap();
    assert!(!report.saved[0].created);

    let second = std::fs::read_to_string(&file).unwrap();
    assert!(second.starts_with(&first));
    assert!(second.contains("borrowing is temporary"));
    assert_eq!(second.matches("values have one owner").count(), 1);

    let state = FileSettingsStore::open(&tmp.path().join(".hsync").join("state.json")).unwrap();
    let state = state.snapshot();
    assert_eq!(
        state.last_sync_date.as_deref(),
        Some("2024-03-05T09:00:00.000001+00:00")
    );
    assert_eq!(state.history.total_articles, 2);
    assert_eq!(state.history.total_highlights, 2);
}

#[tokio::test]
async fn overwrite_replaces_changed_articles_only() {
    let tmp = TempDir::new().unwrap();
    let rows = SearchRows::default();
    rows.push(annotation(
        "a1",
        "https://a.com/x",
        "2024-03-01T10:00:00.000001+00:00",
        Some("first quote"),
        "",
    ));
    rows.push(annotation(
        "b1",
        "https://b.com/y",
        "2024-03-01T10:30:00.000001+00:00",
        Some("other page"),
        "",
    ));
    let server = mock_api(rows.clone()).await;
    let config = SyncConfig {
        overwrite_on_update: true,
        use_domain_folders: true,
        ..SyncConfig::default()
    };

    syncer(&server, tmp.path(), config.clone())
        .run(None)
        .await
        .unwrap();
    let a_file = tmp.path().join("a.com").join("Ownership in Rust.md");
    let b_file = tmp.path().join("b.com").join("Ownership in Rust.md");
    let b_before = std::fs::read_to_string(&b_file).unwrap();

    rows.push(annotation(
        "a2",
        "https://a.com/x",
        "2024-03-02T08:00:00.000001+00:00",
        Some("second quote"),
        "",
    ));
    let report = syncer(&server, tmp.path(), config)
        .run(None)
        .await
        .unwrap();

    // Only a.com changed, and it is refetched in full.
    assert_eq!(report.saved.len(), 1);
    assert!(report.saved[0].created);
    let a_now = std::fs::read_to_string(&a_file).unwrap();
    assert!(a_now.contains("first quote"));
    assert!(a_now.contains("second quote"));
    assert_eq!(std::fs::read_to_string(&b_file).unwrap(), b_before);

    let trashed = tmp.path().join(".trash").join("Ownership in Rust.md");
    let old = std::fs::read_to_string(trashed).unwrap();
    assert!(old.contains("first quote"));
    assert!(!old.contains("second quote"));
}

#[tokio::test]
async fn unrelated_note_with_same_title_is_left_alone() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("Hypothesis")).unwrap();
    std::fs::write(
        tmp.path().join("Hypothesis").join("Ownership in Rust.md"),
        "# my own notes\n",
    )
    .unwrap();

    let rows = SearchRows::default();
    rows.push(annotation(
        "h1",
        "https://a.com/rust",
        "2024-03-01T10:00:00.000001+00:00",
        Some("values have one owner"),
        "",
    ));
    let server = mock_api(rows).await;

    let report = syncer(&server, tmp.path(), highlights_config())
        .run(None)
        .await
        .unwrap();
    assert_eq!(report.saved[0].path, "Hypothesis/Ownership in Rust (1).md");

    let vault = FsVault::new(tmp.path(), ".trash", &[".hsync/**".to_string()]).unwrap();
    assert_eq!(
        vault.list().await.unwrap(),
        vec![
            "Hypothesis/Ownership in Rust (1).md",
            "Hypothesis/Ownership in Rust.md"
        ]
    );
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("Hypothesis").join("Ownership in Rust.md")).unwrap(),
        "# my own notes\n"
    );
}
