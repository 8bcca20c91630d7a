//! Catalog clients.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::{Future, ready};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::try_stream;
use enum_dispatch::enum_dispatch;
use futures::stream::Stream;
use futures::{StreamExt, TryStreamExt};
use pkgdb_core::traceable_path;
use reqwest::header::{self, HeaderMap};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::{CatalogClientConfig, CatalogSource};
use crate::error::CatalogError;
use crate::mock::MockClient;
use crate::query::PkgQuery;
use crate::types::{CatalogPackage, LockedInput, PkgQueryArgs, SearchLimit, SearchResults};

const RESPONSE_PAGE_SIZE: NonZeroU32 = NonZeroU32::new(1000).unwrap();

/// Search interface shared by all catalog backends.
///
/// Results are filtered conjunctively and ranked by [PkgQuery],
/// so every backend returns the same order for the same snapshot.
#[enum_dispatch]
#[allow(async_fn_in_trait)]
pub trait ClientTrait {
    /// Search the packages of `input` at its locked revision.
    async fn search(
        &self,
        input: &LockedInput,
        args: &PkgQueryArgs,
        limit: SearchLimit,
    ) -> Result<SearchResults, CatalogError>;

    /// Identifies where results come from, e.g. `dir:/srv/catalog`.
    ///
    /// Cached results are only valid for the source that produced them.
    fn source_id(&self) -> String;
}

#[derive(Debug)]
#[enum_dispatch(ClientTrait)]
pub enum Client {
    Snapshot(SnapshotCatalog),
    Http(HttpCatalog),
    Mock(MockClient),
}

impl Client {
    pub fn new(source: CatalogSource) -> Result<Self, CatalogError> {
        Ok(match source {
            CatalogSource::Snapshots(dir) => Client::Snapshot(SnapshotCatalog::open(dir)),
            CatalogSource::Remote(config) => Client::Http(HttpCatalog::new(config)?),
        })
    }
}

fn limited(results: impl Iterator<Item = CatalogPackage>, limit: SearchLimit) -> SearchResults {
    let results = results.collect::<Vec<_>>();
    let count = Some(results.len() as u64);
    let results = match limit {
        Some(limit) => results.into_iter().take(limit.get() as usize).collect(),
        None => results,
    };
    SearchResults { results, count }
}

// ---------------------------------------------------------------------------
// Local snapshots
// ---------------------------------------------------------------------------

/// All packages of one input revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub rev: String,
    pub packages: Vec<CatalogPackage>,
}

#[derive(Debug)]
enum SnapshotSource {
    Directory(PathBuf),
    InMemory,
}

/// A catalog backed by snapshot files.
///
/// Loaded snapshots are kept until [SnapshotCatalog::refresh] is called.
#[derive(Debug)]
pub struct SnapshotCatalog {
    source: SnapshotSource,
    loaded: Mutex<HashMap<String, Arc<[CatalogPackage]>>>,
}

impl SnapshotCatalog {
    /// Read snapshots from `<dir>/<rev>.json`
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            source: SnapshotSource::Directory(dir.into()),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Serve a fixed set of snapshots
    pub fn in_memory(snapshots: impl IntoIterator<Item = CatalogSnapshot>) -> Self {
        let loaded = snapshots
            .into_iter()
            .map(|snapshot| (snapshot.rev, Arc::from(snapshot.packages)))
            .collect();
        Self {
            source: SnapshotSource::InMemory,
            loaded: Mutex::new(loaded),
        }
    }

    /// Forget loaded snapshots so they are read from disk again.
    ///
    /// In-memory catalogs have nothing to reload and are left unchanged.
    pub fn refresh(&self) {
        if let SnapshotSource::Directory(dir) = &self.source {
            debug!(dir = traceable_path(dir), "refreshing catalog snapshots");
            self.lock_loaded().clear();
        }
    }

    fn lock_loaded(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<[CatalogPackage]>>> {
        // a panic while holding the lock cannot leave the map half-updated
        self.loaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self, input: &LockedInput) -> Result<Arc<[CatalogPackage]>, CatalogError> {
        if let Some(packages) = self.lock_loaded().get(&input.rev) {
            return Ok(packages.clone());
        }

        let missing = || CatalogError::MissingSnapshot {
            input: input.name.clone(),
            rev: input.rev.clone(),
        };
        let SnapshotSource::Directory(dir) = &self.source else {
            return Err(missing());
        };
        if input.rev.is_empty() || !input.rev.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(missing());
        }

        let path = snapshot_path(dir, &input.rev);
        debug!(path = traceable_path(&path), "loading catalog snapshot");
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(missing()),
            Err(source) => return Err(CatalogError::ReadSnapshot { path, source }),
        };
        let snapshot: CatalogSnapshot = serde_json::from_str(&contents)
            .map_err(|source| CatalogError::ParseSnapshot { path, source })?;

        let packages: Arc<[CatalogPackage]> = Arc::from(snapshot.packages);
        self.lock_loaded()
            .insert(input.rev.clone(), packages.clone());
        Ok(packages)
    }
}

/// Location of the snapshot of `rev` in a snapshot directory
pub fn snapshot_path(dir: impl AsRef<Path>, rev: &str) -> PathBuf {
    dir.as_ref().join(format!("{rev}.json"))
}

impl ClientTrait for SnapshotCatalog {
    #[instrument(skip_all, fields(input = %input.name, rev = %input.rev))]
    async fn search(
        &self,
        input: &LockedInput,
        args: &PkgQueryArgs,
        limit: SearchLimit,
    ) -> Result<SearchResults, CatalogError> {
        let query = PkgQuery::new(args.clone())?;
        let packages = self.snapshot(input)?;
        Ok(limited(query.run(packages.iter()), limit))
    }

    fn source_id(&self) -> String {
        match &self.source {
            SnapshotSource::Directory(dir) => format!("dir:{}", dir.display()),
            SnapshotSource::InMemory => "memory".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    input: &'a LockedInput,
    query: &'a PkgQueryArgs,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    items: Vec<CatalogPackage>,
    total_count: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    detail: String,
}

/// A client for a remote catalog service.
pub struct HttpCatalog {
    client: reqwest::Client,
    config: CatalogClientConfig,
}

impl Debug for HttpCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCatalog")
            .field("catalog_url", &self.config.catalog_url)
            .finish_non_exhaustive()
    }
}

impl HttpCatalog {
    pub fn new(config: CatalogClientConfig) -> Result<Self, CatalogError> {
        let client = build_http_client(&config)?;
        Ok(Self { client, config })
    }

    pub fn catalog_url(&self) -> &str {
        &self.config.catalog_url
    }

    async fn search_page(
        &self,
        request: &SearchRequest<'_>,
        page: i64,
        page_size: i64,
    ) -> Result<(i64, Vec<CatalogPackage>), CatalogError> {
        let url = format!(
            "{}/api/v1/catalog/search",
            self.config.catalog_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .query(&[("page", page), ("pageSize", page_size)])
            .json(request)
            .send()
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CatalogError::Unavailable(format!("{url}: {status}")));
        }
        if !status.is_success() {
            let detail = match response.json::<ErrorResponse>().await {
                Ok(error) => error.detail,
                Err(_) => "response body omitted".to_string(),
            };
            return Err(CatalogError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        let page = response
            .json::<SearchPage>()
            .await
            .map_err(|e| CatalogError::Other(format!("invalid catalog response: {e}")))?;
        Ok((page.total_count, page.items))
    }
}

impl ClientTrait for HttpCatalog {
    #[instrument(skip_all, fields(input = %input.name, rev = %input.rev))]
    async fn search(
        &self,
        input: &LockedInput,
        args: &PkgQueryArgs,
        limit: SearchLimit,
    ) -> Result<SearchResults, CatalogError> {
        let query = PkgQuery::new(args.clone())?;
        debug!(?args, ?limit, "sending search request");

        let request = &SearchRequest { input, query: args };
        let stream = make_depaging_stream(
            |page, page_size| async move { self.search_page(request, page, page_size).await },
            RESPONSE_PAGE_SIZE,
        );
        let (_, packages) = collect_search_results(stream).await?;

        // re-rank locally so results do not depend on the server's ordering
        Ok(limited(query.run(packages.iter()), limit))
    }

    fn source_id(&self) -> String {
        format!("url:{}", self.config.catalog_url)
    }
}

/// Collects a stream of results into a container, returning the total count.
async fn collect_search_results<T, E>(
    stream: impl Stream<Item = Result<StreamItem<T>, E>>,
) -> Result<(Option<u64>, Vec<T>), E> {
    let mut count = None;
    let results = stream
        .try_filter_map(|item| {
            let new_item = match item {
                StreamItem::TotalCount(total) => {
                    count = Some(total);
                    None
                },
                StreamItem::Result(res) => Some(res),
            };
            ready(Ok(new_item))
        })
        .try_collect::<Vec<_>>()
        .await?;
    Ok((count, results))
}

#[derive(Debug, Clone, PartialEq)]
enum StreamItem<T> {
    TotalCount(u64),
    Result(T),
}

impl<T> From<T> for StreamItem<T> {
    fn from(value: T) -> Self {
        Self::Result(value)
    }
}

/// Create a depaging stream from a page-fetching function.
///
/// Takes a function that returns `(total_count, items)` for a given page, and
/// yields `TotalCount` once followed by all `Result` items across pages.
fn make_depaging_stream<T, E, Fut>(
    generator: impl Fn(i64, i64) -> Fut,
    page_size: NonZeroU32,
) -> impl Stream<Item = Result<StreamItem<T>, E>>
where
    Fut: Future<Output = Result<(i64, Vec<T>), E>>,
{
    try_stream! {
        let mut page_number = 0;
        let mut total_count_yielded = false;

        loop {
            let (total_count, results) = generator(page_number, page_size.get().into()).await?;

            let items_on_page = results.len();

            if !total_count_yielded {
                yield StreamItem::TotalCount(total_count as u64);
                total_count_yielded = true;
            }

            for result in results {
                yield StreamItem::Result(result)
            }

            if items_on_page < page_size.get() as usize {
                break;
            }
            if total_count <= (page_number + 1) * page_size.get() as i64 {
                break;
            }
            page_number += 1;
        }
    }
}

fn build_http_client(config: &CatalogClientConfig) -> Result<reqwest::Client, CatalogError> {
    let mut headers = HeaderMap::new();

    for (key, value) in &config.extra_headers {
        headers.insert(
            header::HeaderName::from_str(key)
                .map_err(|e: header::InvalidHeaderName| CatalogError::Other(e.to_string()))?,
            header::HeaderValue::from_str(value)
                .map_err(|e: header::InvalidHeaderValue| CatalogError::Other(e.to_string()))?,
        );
    }

    debug!(
        catalog_url = %config.catalog_url,
        extra_headers = config.extra_headers.len(),
        "building catalog HTTP client"
    );

    let client_builder = reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(60));

    let client_builder = match &config.user_agent {
        Some(user_agent) => client_builder.user_agent(user_agent),
        None => client_builder,
    };

    client_builder
        .build()
        .map_err(|e| CatalogError::Other(e.to_string()))
}
