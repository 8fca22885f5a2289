//! Commit counting: exact per-repository counts and per-user totals.

use crate::cache::{keys, TokenClass};
use crate::error::{ActivityError, UpstreamError};
use crate::github::CommitFilter;
use crate::pagination::count_pages;
use crate::querier::ActivityQuerier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Commits authored by a user across all of their repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    pub username: String,
    pub repo_count: usize,
    pub total_commits: u64,
}

impl CommitSummary {
    /// Returned in place of an error when the summary cannot be computed.
    pub fn empty(username: &str) -> Self {
        Self {
            username: username.to_string(),
            repo_count: 0,
            total_commits: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoCommitCount {
    pub repo: String,
    pub commit_count: u64,
    pub url: String,
}

/// Per-repository breakdown of commit counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoCommitSummary {
    pub username: String,
    pub total_commits: u64,
    pub repos: Vec<RepoCommitCount>,
}

impl ActivityQuerier {
    /// Counts the commits of one repository, optionally filtered by author and
    /// a lower time bound.
    pub async fn count_commits_for_repo(
        &self,
        owner: &str,
        repo: &str,
        filter: &CommitFilter,
        token: Option<&str>,
    ) -> Result<u64, UpstreamError> {
        let token = self.effective_token(token);
        let since = filter.since_param();
        let key = keys::commit_count(
            owner,
            repo,
            filter.author.as_deref(),
            since.as_deref(),
            &TokenClass::of(token),
        );

        self.cache
            .with_cache(&key, self.config.commit_count_ttl(), || async {
                count_pages(|page| self.api.commits_page(owner, repo, filter, page, token))
                    .await
                    .inspect_err(|e| {
                        tracing::error!(
                            owner,
                            repo,
                            status = ?e.status(),
                            "Counting commits failed: {}",
                            e
                        );
                    })
            })
            .await
    }

    /// Total commits authored by `username` across their repositories.
    ///
    /// Never fails: any upstream error yields a zero-value summary.
    pub async fn total_commits_for_user(
        &self,
        username: &str,
        token: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> CommitSummary {
        match self.try_total_commits_for_user(username, token, since).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(
                    username,
                    "Failed to fetch commits, returning empty summary: {}",
                    e
                );
                CommitSummary::empty(username)
            }
        }
    }

    async fn try_total_commits_for_user(
        &self,
        username: &str,
        token: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<CommitSummary, ActivityError> {
        let repos = self.list_repos(username, token).await?;
        let filter = CommitFilter::by_author(username).since(since);

        let counts = self
            .fan_out(username, &repos, |repo| {
                self.count_commits_for_repo(username, &repo.name, &filter, token)
            })
            .await?;

        Ok(CommitSummary {
            username: username.to_string(),
            repo_count: repos.len(),
            total_commits: counts.iter().sum(),
        })
    }

    /// Commit count of every repository of `username`, with links.
    pub async fn summarize_commits(
        &self,
        username: &str,
        token: Option<&str>,
        filter: &CommitFilter,
    ) -> Result<RepoCommitSummary, ActivityError> {
        let repos = self.list_repos(username, token).await?;

        let counts = self
            .fan_out(username, &repos, |repo| {
                self.count_commits_for_repo(username, &repo.name, filter, token)
            })
            .await?;

        let repos: Vec<RepoCommitCount> = repos
            .into_iter()
            .zip(counts)
            .map(|(repo, commit_count)| RepoCommitCount {
                repo: repo.name,
                commit_count,
                url: repo.html_url,
            })
            .collect();

        Ok(RepoCommitSummary {
            username: username.to_string(),
            total_commits: repos.iter().map(|r| r.commit_count).sum(),
            repos,
        })
    }
}
