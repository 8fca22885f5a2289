//! Thin client over the three GitHub REST endpoints the aggregation pipeline reads.

use crate::cache::TokenClass;
use crate::error::UpstreamError;
use crate::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use moka::future::Cache;
use octocrab::service::middleware::retry::RetryConfig;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Page size used for every paginated endpoint.
pub const PER_PAGE: usize = 100;

/// A repository owned by a user, as returned by `/users/{username}/repos`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub html_url: String,
    /// Repository size in kilobytes.
    #[serde(rename = "size", default)]
    pub size_kb: u64,
}

/// Only the SHA is read; the pipeline counts commits, it does not keep them.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitRef {
    pub sha: String,
}

/// Bytes of source per language for one repository.
pub type LanguageMap = BTreeMap<String, u64>;

/// Optional filters applied to a commit listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitFilter {
    pub author: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl CommitFilter {
    pub fn by_author(author: impl Into<String>) -> Self {
        Self {
            author: Some(author.into()),
            since: None,
        }
    }

    pub fn since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    /// `since` as sent upstream and embedded in cache keys.
    pub fn since_param(&self) -> Option<String> {
        self.since
            .map(|since| since.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

/// Upstream operations consumed by the services. One call is one HTTP request.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// One page of `GET /users/{username}/repos?per_page=100&sort=updated`.
    async fn repos_page(
        &self,
        username: &str,
        page: u32,
        token: Option<&str>,
    ) -> Result<Vec<Repository>, UpstreamError>;

    /// One page of `GET /repos/{owner}/{repo}/commits?per_page=100&page=N`.
    async fn commits_page(
        &self,
        owner: &str,
        repo: &str,
        filter: &CommitFilter,
        page: u32,
        token: Option<&str>,
    ) -> Result<Vec<CommitRef>, UpstreamError>;

    /// `GET /repos/{owner}/{repo}/languages`.
    async fn repo_languages(
        &self,
        owner: &str,
        repo: &str,
        token: Option<&str>,
    ) -> Result<LanguageMap, UpstreamError>;
}

#[derive(Serialize)]
struct ReposParams {
    per_page: usize,
    page: u32,
    sort: &'static str,
}

#[derive(Serialize)]
struct CommitsParams<'a> {
    per_page: usize,
    page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    since: Option<String>,
}

/// `GitHubApi` backed by octocrab.
///
/// Octocrab binds a credential at build time, so one instance is kept per
/// caller identity.
#[derive(Clone)]
pub struct GitHubClient {
    base_uri: Option<String>,
    anonymous: Octocrab,
    authenticated: Cache<String, Octocrab>,
    retry: RetryPolicy,
}

impl GitHubClient {
    pub fn new(base_uri: Option<String>, retry: RetryPolicy) -> Result<Self, octocrab::Error> {
        let anonymous = build_octocrab(base_uri.as_deref(), None)?;
        let authenticated = Cache::builder().max_capacity(1_000).build();

        Ok(Self {
            base_uri,
            anonymous,
            authenticated,
            retry,
        })
    }

    async fn client_for(&self, token: Option<&str>) -> Result<Octocrab, UpstreamError> {
        let Some(token) = token else {
            return Ok(self.anonymous.clone());
        };

        let identity = TokenClass::of(Some(token)).to_string();
        let base_uri = self.base_uri.clone();
        let token = token.to_string();

        self.authenticated
            .try_get_with(identity, async move {
                build_octocrab(base_uri.as_deref(), Some(token))
            })
            .await
            .map_err(|e| UpstreamError::unavailable("build_client", "github", e.to_string()))
    }
}

/// Builds a client without octocrab's own retry layer; `with_retry` is the only one.
fn build_octocrab(base_uri: Option<&str>, token: Option<String>) -> Result<Octocrab, octocrab::Error> {
    let mut builder = Octocrab::builder().add_retry_config(RetryConfig::None);
    if let Some(base_uri) = base_uri {
        builder = builder.base_uri(base_uri)?;
    }
    if let Some(token) = token {
        builder = builder.personal_token(token);
    }
    builder.build()
}

/// Accepts a user or repository name as one route segment.
///
/// GitHub names only use ASCII alphanumerics, `-`, `_` and `.`. Anything else,
/// and the `.`/`..` segments, cannot name an account or repository, so it is
/// answered the way GitHub would: 404.
fn path_segment<'s>(operation: &'static str, segment: &'s str) -> Result<&'s str, UpstreamError> {
    let valid = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(segment)
    } else {
        Err(UpstreamError::rejected(operation, segment, 404, "Not Found"))
    }
}

fn map_error(operation: &'static str, target: &str, err: octocrab::Error) -> UpstreamError {
    match err {
        octocrab::Error::GitHub { source, .. } => UpstreamError::rejected(
            operation,
            target,
            source.status_code.as_u16(),
            source.message.to_string(),
        ),
        other => UpstreamError::unavailable(operation, target, other.to_string()),
    }
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn repos_page(
        &self,
        username: &str,
        page: u32,
        token: Option<&str>,
    ) -> Result<Vec<Repository>, UpstreamError> {
        let username = path_segment("list_repos", username)?;
        let client = self.client_for(token).await?;
        let route = format!("/users/{}/repos", username);
        let params = ReposParams {
            per_page: PER_PAGE,
            page,
            sort: "updated",
        };

        with_retry(&self.retry, "list_repos", username, || async {
            client
                .get::<Vec<Repository>, _, _>(&route, Some(&params))
                .await
                .map_err(|e| map_error("list_repos", username, e))
        })
        .await
    }

    async fn commits_page(
        &self,
        owner: &str,
        repo: &str,
        filter: &CommitFilter,
        page: u32,
        token: Option<&str>,
    ) -> Result<Vec<CommitRef>, UpstreamError> {
        let target = format!(
            "{}/{}",
            path_segment("list_commits", owner)?,
            path_segment("list_commits", repo)?
        );
        let client = self.client_for(token).await?;
        let route = format!("/repos/{}/commits", target);
        let params = CommitsParams {
            per_page: PER_PAGE,
            page,
            author: filter.author.as_deref(),
            since: filter.since_param(),
        };

        let result = with_retry(&self.retry, "list_commits", &target, || async {
            client
                .get::<Vec<CommitRef>, _, _>(&route, Some(&params))
                .await
                .map_err(|e| map_error("list_commits", &target, e))
        })
        .await;

        match result {
            // GitHub answers 409 for a repository without any commits
            Err(UpstreamError::Rejected { status: 409, .. }) => Ok(Vec::new()),
            other => other,
        }
    }

    async fn repo_languages(
        &self,
        owner: &str,
        repo: &str,
        token: Option<&str>,
    ) -> Result<LanguageMap, UpstreamError> {
        let target = format!(
            "{}/{}",
            path_segment("repo_languages", owner)?,
            path_segment("repo_languages", repo)?
        );
        let client = self.client_for(token).await?;
        let route = format!("/repos/{}/languages", target);

        with_retry(&self.retry, "repo_languages", &target, || async {
            client
                .get::<LanguageMap, _, _>(&route, None::<&()>)
                .await
                .map_err(|e| map_error("repo_languages", &target, e))
        })
        .await
    }
}
