//! Pinning registry inputs to immutable revisions.
//!
//! A registry input names a package source by reference,
//! e.g. `github:NixOS/nixpkgs/nixpkgs-unstable`.
//! Resolving it yields a [LockedInput] naming the exact revision.
//! Pins are stable: an input is only fetched again when its reference
//! changed or an update is explicitly requested.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use enum_dispatch::enum_dispatch;
use pkgdb_catalog::LockedInput;
use pkgdb_core::retry::{RetryPolicy, Transient};
use reqwest::header::{self, HeaderMap};
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};
use url::Url;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The source could not be reached, retrying may succeed
    #[error("failed to fetch '{reference}': {reason}")]
    Fetch { reference: String, reason: String },
    #[error("invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },
    #[error("'{reference}' does not exist")]
    NotFound { reference: String },
    #[error("'{0}' cannot be pinned to a revision, add a revision to the reference")]
    Unpinnable(String),
}

impl Transient for RegistryError {
    fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Fetch { .. })
    }
}

fn invalid(reference: &str, reason: impl Into<String>) -> RegistryError {
    RegistryError::InvalidReference {
        reference: reference.to_string(),
        reason: reason.into(),
    }
}

/// A parsed registry input reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlakeRef {
    /// `github:<owner>/<repo>[/<ref-or-rev>]`
    GitHub {
        owner: String,
        repo: String,
        git_ref: Option<String>,
        rev: Option<String>,
    },
    /// `git+<url>[?ref=<ref>&rev=<rev>]`
    Git {
        url: Url,
        git_ref: Option<String>,
        rev: Option<String>,
    },
    /// `https://...` pointing at an archive
    Tarball { url: Url },
    /// `path:<absolute path>`
    Path { path: String },
}

/// Whether `s` is a full git commit hash
fn is_rev(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

impl FromStr for FlakeRef {
    type Err = RegistryError;

    fn from_str(reference: &str) -> Result<Self, Self::Err> {
        let reference = reference.trim();

        if let Some(rest) = reference.strip_prefix("github:") {
            let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
            let mut parts = path.split('/');
            let (Some(owner), Some(repo)) = (parts.next(), parts.next()) else {
                return Err(invalid(reference, "expected 'github:<owner>/<repo>'"));
            };
            if owner.is_empty() || repo.is_empty() {
                return Err(invalid(reference, "expected 'github:<owner>/<repo>'"));
            }
            let third = parts.collect::<Vec<_>>().join("/");
            let mut git_ref = None;
            let mut rev = None;
            if is_rev(&third) {
                rev = Some(third);
            } else if !third.is_empty() {
                git_ref = Some(third);
            }
            for (key, value) in query.split('&').filter_map(|p| p.split_once('=')) {
                match key {
                    "ref" if git_ref.is_none() => git_ref = Some(value.to_string()),
                    "rev" if rev.is_none() => rev = Some(value.to_string()),
                    "ref" | "rev" => {
                        return Err(invalid(reference, format!("'{key}' is given twice")));
                    },
                    _ => {},
                }
            }
            if let Some(rev) = &rev
                && !is_rev(rev)
            {
                return Err(invalid(reference, format!("'{rev}' is not a commit hash")));
            }
            return Ok(FlakeRef::GitHub {
                owner: owner.to_string(),
                repo: repo.to_string(),
                git_ref,
                rev,
            });
        }

        if let Some(rest) = reference.strip_prefix("git+") {
            let mut url = Url::parse(rest).map_err(|e| invalid(reference, e.to_string()))?;
            let mut git_ref = None;
            let mut rev = None;
            let mut others = Vec::new();
            for (key, value) in url.query_pairs() {
                match key.as_ref() {
                    "ref" => git_ref = Some(value.into_owned()),
                    "rev" => rev = Some(value.into_owned()),
                    _ => others.push((key.into_owned(), value.into_owned())),
                }
            }
            if !others.is_empty() {
                return Err(invalid(reference, "only 'ref' and 'rev' parameters are supported"));
            }
            url.set_query(None);
            return Ok(FlakeRef::Git { url, git_ref, rev });
        }

        if let Some(path) = reference.strip_prefix("path:") {
            if !path.starts_with('/') {
                return Err(invalid(reference, "paths must be absolute"));
            }
            return Ok(FlakeRef::Path {
                path: path.to_string(),
            });
        }

        if reference.starts_with("https://") || reference.starts_with("http://") {
            let url = Url::parse(reference).map_err(|e| invalid(reference, e.to_string()))?;
            return Ok(FlakeRef::Tarball { url });
        }

        if !reference.is_empty() && !reference.contains(':') {
            return Err(invalid(
                reference,
                "indirect references are ambiguous, use e.g. 'github:<owner>/<repo>'",
            ));
        }
        Err(invalid(reference, "unsupported reference type"))
    }
}

impl FlakeRef {
    /// The revision the reference names, if any
    pub fn rev(&self) -> Option<&str> {
        match self {
            FlakeRef::GitHub { rev, .. } | FlakeRef::Git { rev, .. } => rev.as_deref(),
            FlakeRef::Tarball { .. } | FlakeRef::Path { .. } => None,
        }
    }

    /// The reference pinned to `rev`
    pub fn locked(&self, rev: &str) -> String {
        match self {
            FlakeRef::GitHub { owner, repo, .. } => format!("github:{owner}/{repo}/{rev}"),
            FlakeRef::Git { url, .. } => format!("git+{url}?rev={rev}"),
            FlakeRef::Tarball { .. } | FlakeRef::Path { .. } => self.to_string(),
        }
    }
}

impl Display for FlakeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlakeRef::GitHub {
                owner,
                repo,
                git_ref,
                rev,
            } => {
                write!(f, "github:{owner}/{repo}")?;
                match (git_ref, rev) {
                    (Some(git_ref), Some(rev)) => write!(f, "/{git_ref}?rev={rev}"),
                    (Some(git_ref), None) => write!(f, "/{git_ref}"),
                    (None, Some(rev)) => write!(f, "/{rev}"),
                    (None, None) => Ok(()),
                }
            },
            FlakeRef::Git { url, git_ref, rev } => {
                write!(f, "git+{url}")?;
                let params = git_ref
                    .iter()
                    .map(|r| format!("ref={r}"))
                    .chain(rev.iter().map(|r| format!("rev={r}")))
                    .collect::<Vec<_>>();
                if !params.is_empty() {
                    write!(f, "?{}", params.join("&"))?;
                }
                Ok(())
            },
            FlakeRef::Tarball { url } => write!(f, "{url}"),
            FlakeRef::Path { path } => write!(f, "path:{path}"),
        }
    }
}

/// What a fetcher learned about the newest revision of a reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchedRevision {
    pub rev: String,
    pub nar_hash: Option<String>,
    pub last_modified: Option<i64>,
    pub rev_count: Option<u64>,
}

/// Dereference an unpinned reference to its current revision.
#[enum_dispatch]
#[allow(async_fn_in_trait)]
pub trait InputFetcher {
    async fn fetch(&self, reference: &FlakeRef) -> Result<FetchedRevision, RegistryError>;
}

#[derive(Debug)]
#[enum_dispatch(InputFetcher)]
pub enum Fetcher {
    Remote(RemoteFetcher),
    Mock(MockFetcher),
}

/// Fetch revisions from GitHub's API and git remotes.
#[derive(Debug)]
pub struct RemoteFetcher {
    github_api_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GitHubCommit {
    sha: String,
    commit: GitHubCommitDetails,
}

#[derive(Debug, Deserialize)]
struct GitHubCommitDetails {
    committer: Option<GitHubSignature>,
}

#[derive(Debug, Deserialize)]
struct GitHubSignature {
    date: DateTime<Utc>,
}

impl RemoteFetcher {
    pub fn new(github_api_url: impl Into<String>) -> Result<Self, RegistryError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(concat!("pkgdb/", env!("CARGO_PKG_VERSION"))),
        );
        let github_api_url = github_api_url.into();
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| RegistryError::Fetch {
                reference: github_api_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            github_api_url: github_api_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn fetch_github(
        &self,
        reference: &FlakeRef,
        owner: &str,
        repo: &str,
        git_ref: Option<&str>,
    ) -> Result<FetchedRevision, RegistryError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/commits/{}",
            self.github_api_url,
            git_ref.unwrap_or("HEAD")
        );
        debug!(%url, "fetching revision from GitHub");
        let fetch_error = |reason: String| RegistryError::Fetch {
            reference: reference.to_string(),
            reason,
        };

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 404 || status.as_u16() == 422 {
            return Err(RegistryError::NotFound {
                reference: reference.to_string(),
            });
        }
        if !status.is_success() {
            return Err(fetch_error(format!("GitHub responded with {status}")));
        }
        let commit: GitHubCommit = response
            .json()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        Ok(FetchedRevision {
            rev: commit.sha,
            nar_hash: None,
            last_modified: commit
                .commit
                .committer
                .map(|committer| committer.date.timestamp()),
            rev_count: None,
        })
    }

    /// Ask the remote for the commit `git_ref` points to
    async fn fetch_git(
        &self,
        reference: &FlakeRef,
        url: &Url,
        git_ref: Option<&str>,
    ) -> Result<FetchedRevision, RegistryError> {
        let git_ref = git_ref.unwrap_or("HEAD");
        let output = Command::new("git")
            .args(["ls-remote", url.as_str(), git_ref])
            .output()
            .await
            .map_err(|e| RegistryError::Fetch {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(RegistryError::Fetch {
                reference: reference.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let rev = stdout
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .find(|rev| is_rev(rev))
            .ok_or_else(|| RegistryError::NotFound {
                reference: reference.to_string(),
            })?;
        Ok(FetchedRevision {
            rev: rev.to_string(),
            ..Default::default()
        })
    }
}

impl InputFetcher for RemoteFetcher {
    async fn fetch(&self, reference: &FlakeRef) -> Result<FetchedRevision, RegistryError> {
        match reference {
            FlakeRef::GitHub {
                owner,
                repo,
                git_ref,
                ..
            } => {
                self.fetch_github(reference, owner, repo, git_ref.as_deref())
                    .await
            },
            FlakeRef::Git { url, git_ref, .. } => {
                self.fetch_git(reference, url, git_ref.as_deref()).await
            },
            FlakeRef::Tarball { .. } | FlakeRef::Path { .. } => {
                Err(RegistryError::Unpinnable(reference.to_string()))
            },
        }
    }
}

/// Answers fetches with queued responses, in order, and records requests.
#[derive(Debug, Default, Clone)]
pub struct MockFetcher {
    pub responses: Arc<Mutex<VecDeque<Result<FetchedRevision, String>>>>,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_revision(&self, rev: impl Into<String>) {
        self.lock_responses().push_back(Ok(FetchedRevision {
            rev: rev.into(),
            ..Default::default()
        }));
    }

    /// Queue a transient failure
    pub fn push_unavailable(&self, reason: impl Into<String>) {
        self.lock_responses().push_back(Err(reason.into()));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lock_responses(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<FetchedRevision, String>>> {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl InputFetcher for MockFetcher {
    async fn fetch(&self, reference: &FlakeRef) -> Result<FetchedRevision, RegistryError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(reference.to_string());
        match self.lock_responses().pop_front() {
            Some(Ok(revision)) => Ok(revision),
            Some(Err(reason)) => Err(RegistryError::Fetch {
                reference: reference.to_string(),
                reason,
            }),
            None => Err(RegistryError::Fetch {
                reference: reference.to_string(),
                reason: "no mock responses remaining".to_string(),
            }),
        }
    }
}

/// Revisions fetched during this process, by reference.
///
/// Owned by the caller and passed to [RegistryResolver::resolve],
/// so inputs sharing a reference are only fetched once.
#[derive(Debug, Clone, Default)]
pub struct RegistryCache {
    fetched: BTreeMap<String, FetchedRevision>,
}

impl RegistryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reference: &str) -> Option<&FetchedRevision> {
        self.fetched.get(reference)
    }

    pub fn insert(&mut self, reference: impl Into<String>, revision: FetchedRevision) {
        self.fetched.insert(reference.into(), revision);
    }

    /// Forget the revision of `reference` so the next resolution fetches it
    pub fn invalidate(&mut self, reference: &str) {
        self.fetched.remove(reference);
    }

    pub fn clear(&mut self) {
        self.fetched.clear();
    }
}

/// Which locked inputs to fetch again even though their reference is unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InputUpdates {
    #[default]
    None,
    All,
    Only(BTreeSet<String>),
}

impl InputUpdates {
    pub fn includes(&self, name: &str) -> bool {
        match self {
            InputUpdates::None => false,
            InputUpdates::All => true,
            InputUpdates::Only(names) => names.contains(name),
        }
    }
}

#[derive(Debug)]
pub struct RegistryResolver<F = Fetcher> {
    fetcher: F,
    retry: RetryPolicy,
}

impl<F: InputFetcher> RegistryResolver<F> {
    pub fn new(fetcher: F, retry: RetryPolicy) -> Self {
        Self { fetcher, retry }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Pin the input `name` referenced by `original_ref`.
    ///
    /// An existing pin for the same reference is returned unchanged.
    /// References that name a revision are pinned without fetching.
    /// Otherwise the reference is fetched, retrying transient failures.
    #[instrument(skip(self, existing, cache), fields(input = name))]
    pub async fn resolve(
        &self,
        name: &str,
        original_ref: &str,
        existing: Option<&LockedInput>,
        cache: &mut RegistryCache,
    ) -> Result<LockedInput, RegistryError> {
        let reference: FlakeRef = original_ref.parse()?;

        if let Some(existing) = existing
            && existing.original_ref == original_ref
        {
            debug!(rev = existing.rev, "keeping locked input");
            return Ok(LockedInput {
                name: name.to_string(),
                ..existing.clone()
            });
        }

        let revision = if let Some(rev) = reference.rev() {
            FetchedRevision {
                rev: rev.to_string(),
                ..Default::default()
            }
        } else if let Some(cached) = cache.get(original_ref) {
            debug!(rev = cached.rev, "using previously fetched revision");
            cached.clone()
        } else {
            let revision = self
                .retry
                .run("fetch registry input", || self.fetcher.fetch(&reference))
                .await?;
            cache.insert(original_ref, revision.clone());
            revision
        };
        debug!(rev = revision.rev, "locked input");

        Ok(LockedInput {
            name: name.to_string(),
            original_ref: original_ref.to_string(),
            locked_ref: reference.locked(&revision.rev),
            rev: revision.rev,
            nar_hash: revision.nar_hash,
            last_modified: revision.last_modified,
            rev_count: revision.rev_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;

    use super::*;

    const REV: &str = "e8039594435c68eb4f780f3e9bf3972a7399c4b1";
    const OTHER_REV: &str = "0123456789abcdef0123456789abcdef01234567";

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 0,
        }
    }

    #[test]
    fn parses_references() {
        assert_eq!(
            "github:NixOS/nixpkgs/nixpkgs-unstable".parse::<FlakeRef>().unwrap(),
            FlakeRef::GitHub {
                owner: "NixOS".into(),
                repo: "nixpkgs".into(),
                git_ref: Some("nixpkgs-unstable".into()),
                rev: None,
            }
        );
        let pinned = format!("github:NixOS/nixpkgs/{REV}").parse::<FlakeRef>().unwrap();
        assert_eq!(pinned.rev(), Some(REV));

        let git = format!("git+https://example.com/repo.git?ref=main&rev={REV}")
            .parse::<FlakeRef>()
            .unwrap();
        assert_eq!(git.rev(), Some(REV));
        assert_eq!(git.locked(REV), format!("git+https://example.com/repo.git?rev={REV}"));

        assert!(matches!(
            "https://example.com/nixpkgs.tar.gz".parse::<FlakeRef>().unwrap(),
            FlakeRef::Tarball { .. }
        ));
        assert!(matches!(
            "path:/srv/nixpkgs".parse::<FlakeRef>().unwrap(),
            FlakeRef::Path { .. }
        ));
    }

    #[test]
    fn rejects_ambiguous_references() {
        for reference in ["nixpkgs", "github:NixOS", "path:relative", "git+not a url", "foo:bar"] {
            assert!(
                matches!(
                    reference.parse::<FlakeRef>(),
                    Err(RegistryError::InvalidReference { .. })
                ),
                "{reference} should be invalid"
            );
        }
    }

    #[test]
    fn displays_parsed_reference() {
        for reference in [
            "github:NixOS/nixpkgs",
            "github:NixOS/nixpkgs/release-24.05",
            "git+https://example.com/repo.git?ref=main",
            "path:/srv/nixpkgs",
        ] {
            assert_eq!(reference.parse::<FlakeRef>().unwrap().to_string(), reference);
        }
    }

    #[tokio::test]
    async fn keeps_existing_pin_for_unchanged_reference() {
        let fetcher = MockFetcher::new();
        let resolver = RegistryResolver::new(fetcher.clone(), no_wait());
        let mut cache = RegistryCache::new();

        fetcher.push_revision(REV);
        let locked = resolver
            .resolve("nixpkgs", "github:NixOS/nixpkgs", None, &mut cache)
            .await
            .unwrap();
        assert_eq!(locked.rev, REV);
        assert_eq!(locked.locked_ref, format!("github:NixOS/nixpkgs/{REV}"));

        // no response queued, a fetch would fail
        let again = resolver
            .resolve("nixpkgs", "github:NixOS/nixpkgs", Some(&locked), &mut RegistryCache::new())
            .await
            .unwrap();
        assert_eq!(again, locked);
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn changed_reference_is_fetched() {
        let fetcher = MockFetcher::new();
        let resolver = RegistryResolver::new(fetcher.clone(), no_wait());
        let mut cache = RegistryCache::new();

        fetcher.push_revision(REV);
        let locked = resolver
            .resolve("nixpkgs", "github:NixOS/nixpkgs", None, &mut cache)
            .await
            .unwrap();

        fetcher.push_revision(OTHER_REV);
        let changed = resolver
            .resolve("nixpkgs", "github:NixOS/nixpkgs/release-24.05", Some(&locked), &mut cache)
            .await
            .unwrap();
        assert_eq!(changed.rev, OTHER_REV);
        assert_eq!(changed.original_ref, "github:NixOS/nixpkgs/release-24.05");
    }

    #[tokio::test]
    async fn pinned_reference_needs_no_fetch() {
        let fetcher = MockFetcher::new();
        let resolver = RegistryResolver::new(fetcher.clone(), no_wait());
        let locked = resolver
            .resolve(
                "nixpkgs",
                &format!("github:NixOS/nixpkgs/{REV}"),
                None,
                &mut RegistryCache::new(),
            )
            .await
            .unwrap();
        assert_eq!(locked.rev, REV);
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn cache_is_used_until_invalidated() {
        let fetcher = MockFetcher::new();
        let resolver = RegistryResolver::new(fetcher.clone(), no_wait());
        let mut cache = RegistryCache::new();

        fetcher.push_revision(REV);
        resolver
            .resolve("a", "github:NixOS/nixpkgs", None, &mut cache)
            .await
            .unwrap();
        let b = resolver
            .resolve("b", "github:NixOS/nixpkgs", None, &mut cache)
            .await
            .unwrap();
        assert_eq!(b.rev, REV);
        assert_eq!(b.name, "b");
        assert_eq!(fetcher.requests().len(), 1);

        cache.invalidate("github:NixOS/nixpkgs");
        fetcher.push_revision(OTHER_REV);
        let b = resolver
            .resolve("b", "github:NixOS/nixpkgs", None, &mut cache)
            .await
            .unwrap();
        assert_eq!(b.rev, OTHER_REV);
    }

    #[tokio::test]
    async fn retries_transient_fetch_errors() {
        let fetcher = MockFetcher::new();
        let resolver = RegistryResolver::new(fetcher.clone(), no_wait());
        fetcher.push_unavailable("connection reset");
        fetcher.push_revision(REV);
        let locked = resolver
            .resolve("nixpkgs", "github:NixOS/nixpkgs", None, &mut RegistryCache::new())
            .await
            .unwrap();
        assert_eq!(locked.rev, REV);
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn invalid_reference_is_not_retried() {
        let fetcher = MockFetcher::new();
        let resolver = RegistryResolver::new(fetcher.clone(), no_wait());
        let err = resolver
            .resolve("nixpkgs", "nixpkgs", None, &mut RegistryCache::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidReference { .. }));
        assert!(!err.is_transient());
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn fetches_github_revision() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/NixOS/nixpkgs/commits/nixpkgs-unstable");
                then.status(200).json_body(serde_json::json!({
                    "sha": REV,
                    "commit": { "committer": { "date": "2024-01-01T00:00:00Z" } }
                }));
            })
            .await;

        let fetcher = RemoteFetcher::new(server.base_url()).unwrap();
        let revision = fetcher
            .fetch(&"github:NixOS/nixpkgs/nixpkgs-unstable".parse().unwrap())
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(revision.rev, REV);
        assert_eq!(revision.last_modified, Some(1_704_067_200));
    }

    #[tokio::test]
    async fn github_errors_are_classified() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/NixOS/missing/commits/HEAD");
                then.status(404);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/NixOS/nixpkgs/commits/HEAD");
                then.status(503);
            })
            .await;

        let fetcher = RemoteFetcher::new(server.base_url()).unwrap();
        let missing = fetcher
            .fetch(&"github:NixOS/missing".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(missing, RegistryError::NotFound { .. }));

        let unavailable = fetcher
            .fetch(&"github:NixOS/nixpkgs".parse().unwrap())
            .await
            .unwrap_err();
        assert!(unavailable.is_transient());
    }

    #[tokio::test]
    async fn tarballs_cannot_be_pinned() {
        let fetcher = RemoteFetcher::new(DEFAULT_GITHUB_API_URL).unwrap();
        let err = fetcher
            .fetch(&"https://example.com/nixpkgs.tar.gz".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unpinnable(_)));
    }

    #[tokio::test]
    async fn unreachable_git_remote_fails_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = RemoteFetcher::new(DEFAULT_GITHUB_API_URL).unwrap();
        let reference = format!("git+file://{}/missing.git", dir.path().display());
        let err = fetcher.fetch(&reference.parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, RegistryError::Fetch { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn local_git_remote_is_pinned_to_head() {
        let dir = tempfile::tempdir().unwrap();
        let git = |args: &[&str]| {
            std::process::Command::new("git")
                .args(["-c", "user.name=pkgdb", "-c", "user.email=pkgdb@localhost"])
                .args(args)
                .current_dir(dir.path())
                .output()
        };
        // no git available, nothing to exercise
        if git(&["init", "--quiet"]).is_err() {
            return;
        }
        git(&["commit", "--quiet", "--allow-empty", "-m", "init"]).unwrap();
        let head = git(&["rev-parse", "HEAD"]).unwrap();
        let head = String::from_utf8_lossy(&head.stdout).trim().to_string();

        let fetcher = RemoteFetcher::new(DEFAULT_GITHUB_API_URL).unwrap();
        let reference = format!("git+file://{}", dir.path().display());
        let fetched = fetcher.fetch(&reference.parse().unwrap()).await.unwrap();
        assert_eq!(fetched.rev, head);
    }

    #[test]
    fn input_updates() {
        assert!(!InputUpdates::None.includes("nixpkgs"));
        assert!(InputUpdates::All.includes("nixpkgs"));
        let only = InputUpdates::Only(BTreeSet::from(["nixpkgs".to_string()]));
        assert!(only.includes("nixpkgs"));
        assert!(!only.includes("other"));
    }
}
