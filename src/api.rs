//! Hypothesis API client.
//!
//! Talks to the read-only REST endpoints (`/profile`, `/groups`, `/search`)
//! with a bearer token and implements the three cursor-paginated traversals
//! the sync strategies are built from.
//!
//! # Pagination
//!
//! `/search` is queried sorted ascending by `updated`, 200 rows per page
//! (the server maximum). The `updated` value of a page's last row becomes
//! the next page's `search_after` cursor, which the server treats as an
//! exclusive lower bound. A page that returns rows without moving the cursor
//! is a protocol violation and aborts the traversal.
//!
//! # Strategies
//!
//! | `overwrite` | `since` | traversal |
//! |---|---|---|
//! | false | any | [`fetch_incremental`](ApiClient::fetch_incremental) from `since` |
//! | true | none | [`fetch_incremental`](ApiClient::fetch_incremental) from the oldest record |
//! | true | set | [`fetch_uris_changed_since`](ApiClient::fetch_uris_changed_since), then [`fetch_all_for_uri`](ApiClient::fetch_all_for_uri) per URI |

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::models::RawAnnotation;

/// Server-imposed maximum page size for `/search`. Do not change.
pub const PAGE_SIZE: usize = 200;

/// A group as returned by `GET /groups`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteGroup {
    pub id: String,
    pub name: String,
}

/// Rows fetched by [`AnnotationSource::fetch_highlights`].
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub rows: Vec<RawAnnotation>,
    /// The limited traversal stopped at its limit; another sync is needed.
    pub limit_reached: bool,
    /// `updated` of the last row, to be stored as the next sync's cursor.
    pub high_water_mark: Option<String>,
}

impl FetchOutcome {
    fn new(rows: Vec<RawAnnotation>, limit_reached: bool) -> Self {
        let high_water_mark = rows.last().and_then(|r| r.updated()).map(str::to_string);
        Self {
            rows,
            limit_reached,
            high_water_mark,
        }
    }
}

/// The remote operations the sync orchestrator depends on.
#[async_trait]
pub trait AnnotationSource: Send + Sync {
    async fn fetch_groups(&self) -> Result<Vec<RemoteGroup>>;

    /// Pick a traversal from `overwrite` and `since` and run it.
    async fn fetch_highlights(
        &self,
        since: Option<&str>,
        overwrite: bool,
        limit: usize,
    ) -> Result<FetchOutcome>;

    async fn fetch_all_for_uri(&self, uri: &str) -> Result<Vec<RawAnnotation>>;
}

#[derive(Deserialize)]
struct SearchResponse {
    rows: Vec<RawAnnotation>,
}

#[derive(Deserialize)]
struct ProfileResponse {
    userid: Option<String>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    user: Option<String>,
    uri_concurrency: usize,
}

impl ApiClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            user: None,
            uri_concurrency: 1,
        })
    }

    /// Restrict searches to annotations by this `acct:` user id.
    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    /// Number of per-URI traversals run concurrently by the
    /// changed-sources strategy.
    pub fn with_uri_concurrency(mut self, n: usize) -> Self {
        self.uri_concurrency = n.max(1);
        self
    }

    /// Resolve the token to its `acct:` user id.
    pub async fn fetch_profile(&self) -> Result<String> {
        let profile: ProfileResponse = self.get_json("fetch profile", "/profile", &[]).await?;
        // An anonymous profile means the token was not accepted.
        profile.userid.ok_or(SyncError::Auth {
            operation: "fetch profile".to_string(),
            status: StatusCode::UNAUTHORIZED.as_u16(),
        })
    }

    /// Rows updated after `since` (or from the oldest when `None`),
    /// until a page comes back empty or `limit` rows are collected.
    pub async fn fetch_incremental(
        &self,
        since: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RawAnnotation>> {
        let mut annotations = Vec::new();
        let mut cursor = since.map(str::to_string);

        while annotations.len() < limit {
            let rows = self.search_page(cursor.as_deref(), None).await?;
            if rows.is_empty() {
                break;
            }
            cursor = Some(next_cursor("fetch annotations", cursor.as_deref(), &rows)?);
            annotations.extend(rows);
        }

        info!("Retrieved {} total annotations", annotations.len());
        Ok(annotations)
    }

    /// Distinct source URIs with annotations updated after `since`.
    pub async fn fetch_uris_changed_since(
        &self,
        since: &str,
        limit: usize,
    ) -> Result<BTreeSet<String>> {
        let mut uris = BTreeSet::new();
        let mut cursor = Some(since.to_string());

        while uris.len() < limit {
            let rows = self.search_page(cursor.as_deref(), None).await?;
            if rows.is_empty() {
                break;
            }
            cursor = Some(next_cursor("fetch changed URIs", cursor.as_deref(), &rows)?);
            uris.extend(rows.iter().filter_map(|r| r.uri()).map(str::to_string));
        }

        debug!("{} URIs changed since {}", uris.len(), since);
        Ok(uris)
    }

    async fn fetch_all_for_uri_inner(&self, uri: &str) -> Result<Vec<RawAnnotation>> {
        let mut annotations = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let rows = self.search_page(cursor.as_deref(), Some(uri)).await?;
            debug!("Retrieved {} annotations from {}", rows.len(), uri);
            let last_page = rows.len() < PAGE_SIZE;
            if !rows.is_empty() {
                cursor = Some(next_cursor("fetch URI annotations", cursor.as_deref(), &rows)?);
            }
            annotations.extend(rows);
            if last_page {
                break;
            }
        }

        Ok(annotations)
    }

    /// Changed-sources strategy: every annotation of every URI touched
    /// since `since`, concatenated in URI order. `limit` caps the number of
    /// URIs, not the rows fetched for them.
    async fn fetch_changed_sources(&self, since: &str, limit: usize) -> Result<FetchOutcome> {
        let uris = self.fetch_uris_changed_since(since, limit).await?;
        let limit_reached = uris.len() >= limit;
        info!(
            "Overwriting all annotations from {} updated URIs since {}",
            uris.len(),
            since
        );

        let requests: Vec<_> = uris
            .iter()
            .map(|uri| self.fetch_all_for_uri_inner(uri))
            .collect();

        // `buffered` yields in input order regardless of completion order.
        let batches: Vec<Vec<RawAnnotation>> = stream::iter(requests)
            .buffered(self.uri_concurrency)
            .try_collect()
            .await?;

        Ok(FetchOutcome::new(
            batches.into_iter().flatten().collect(),
            limit_reached,
        ))
    }

    async fn search_page(
        &self,
        search_after: Option<&str>,
        uri: Option<&str>,
    ) -> Result<Vec<RawAnnotation>> {
        let mut query: Vec<(&str, String)> = vec![
            ("limit", PAGE_SIZE.to_string()),
            ("sort", "updated".to_string()),
            ("order", "asc".to_string()),
        ];
        if let Some(after) = search_after {
            query.push(("search_after", after.to_string()));
        }
        if let Some(user) = &self.user {
            query.push(("user", user.clone()));
        }
        if let Some(uri) = uri {
            query.push(("uri", uri.to_string()));
        }

        let response: SearchResponse = self
            .get_json("search annotations", "/search", &query)
            .await?;
        Ok(response.rows)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| SyncError::Network {
                operation: operation.to_string(),
                source: e,
            })?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::Auth {
                operation: operation.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Http {
                operation: operation.to_string(),
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| SyncError::Network {
            operation: operation.to_string(),
            source: e,
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::protocol(operation, format!("invalid JSON response: {}", e)))
    }
}

/// The cursor for the page after `rows`, which must differ from `previous`.
fn next_cursor(operation: &str, previous: Option<&str>, rows: &[RawAnnotation]) -> Result<String> {
    let last = rows.last().ok_or_else(|| SyncError::protocol(operation, "empty page"))?;
    let next = last.updated().ok_or_else(|| {
        SyncError::protocol(
            operation,
            format!("annotation {} has no 'updated' timestamp", last.id()),
        )
    })?;
    if previous == Some(next) {
        return Err(SyncError::protocol(
            operation,
            format!("cursor did not advance past {}", next),
        ));
    }
    Ok(next.to_string())
}

#[async_trait]
impl AnnotationSource for ApiClient {
    async fn fetch_groups(&self) -> Result<Vec<RemoteGroup>> {
        self.get_json("fetch groups", "/groups", &[]).await
    }

    async fn fetch_highlights(
        &self,
        since: Option<&str>,
        overwrite: bool,
        limit: usize,
    ) -> Result<FetchOutcome> {
        let rows = match (overwrite, since) {
            (false, since) => {
                info!(
                    "Updating new annotations since last sync date {}",
                    since.unwrap_or("(never)")
                );
                self.fetch_incremental(since, limit).await?
            }
            (true, None) => {
                info!("Overwriting all annotations");
                self.fetch_incremental(None, limit).await?
            }
            (true, Some(since)) => return self.fetch_changed_sources(since, limit).await,
        };

        let limit_reached = rows.len() >= limit;
        Ok(FetchOutcome::new(rows, limit_reached))
    }

    async fn fetch_all_for_uri(&self, uri: &str) -> Result<Vec<RawAnnotation>> {
        self.fetch_all_for_uri_inner(uri).await
    }
}
