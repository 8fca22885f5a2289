//! The combined "wrapped" report: repositories, languages, commits and score.

use crate::cache::{keys, TokenClass};
use crate::error::{ActivityError, UpstreamError};
use crate::github::{CommitFilter, LanguageMap};
use crate::languages::{LanguageEntry, LanguageTotals};
use crate::querier::ActivityQuerier;
use crate::scores;
use serde::{Deserialize, Serialize};

/// Everything known about one user, aggregated over all of their repositories.
///
/// `total_bytes` always equals the sum of `languages[i].bytes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedReport {
    pub username: String,
    pub total_repos: usize,
    pub total_bytes: u64,
    pub languages: Vec<LanguageEntry>,
    pub total_commits: u64,
    pub score: u64,
}

impl ActivityQuerier {
    /// Builds the full report, cached as one unit on top of the per-repository caches.
    ///
    /// Unlike `total_commits_for_user`, failures are returned to the caller.
    pub async fn wrapped_report(
        &self,
        username: &str,
        token: Option<&str>,
    ) -> Result<WrappedReport, ActivityError> {
        let effective = self.effective_token(token);
        let key = keys::wrapped(username, &TokenClass::of(effective));

        self.cache
            .with_cache(&key, self.config.wrapped_ttl(), || async {
                self.build_wrapped_report(username, token).await
            })
            .await
    }

    async fn build_wrapped_report(
        &self,
        username: &str,
        token: Option<&str>,
    ) -> Result<WrappedReport, ActivityError> {
        let repos = self.list_repos(username, token).await?;
        let all_commits = CommitFilter::default();

        let per_repo: Vec<(LanguageMap, u64)> = self
            .fan_out(username, &repos, |repo| {
                let all_commits = &all_commits;
                async move {
                    let languages = self.repo_languages(username, &repo.name, token).await?;
                    let commits = self
                        .count_commits_for_repo(username, &repo.name, all_commits, token)
                        .await?;
                    Ok::<_, UpstreamError>((languages, commits))
                }
            })
            .await?;

        let totals: LanguageTotals = per_repo.iter().map(|(languages, _)| languages).collect();
        let total_commits: u64 = per_repo.iter().map(|(_, commits)| commits).sum();
        let score = scores::score(
            repos
                .iter()
                .zip(per_repo.iter().map(|(languages, _)| languages)),
        );

        tracing::info!(
            username,
            repos = repos.len(),
            total_commits,
            score,
            "Built wrapped report"
        );

        Ok(WrappedReport {
            username: username.to_string(),
            total_repos: repos.len(),
            total_bytes: totals.total_bytes(),
            languages: totals.entries(),
            total_commits,
            score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::querier::testing::*;

    fn empty_report(username: &str) -> WrappedReport {
        WrappedReport {
            username: username.to_string(),
            total_repos: 0,
            total_bytes: 0,
            languages: Vec::new(),
            total_commits: 0,
            score: 0,
        }
    }

    fn sample_api() -> FakeGitHub {
        FakeGitHub::new()
            .with_repo("octocat", "hello", 500)
            .with_repo("octocat", "world", 0)
            .with_languages("hello", &[("Rust", 3000), ("Shell", 1000)])
            .with_languages("world", &[("Rust", 1000)])
            .with_commits("hello", 150)
            .with_commits("world", 5)
    }

    #[tokio::test]
    async fn test_wrapped_report_combines_all_sources() {
        let api = sample_api();
        let querier = querier(&api);

        let report = querier.wrapped_report("octocat", None).await.unwrap();

        assert_eq!(report.username, "octocat");
        assert_eq!(report.total_repos, 2);
        assert_eq!(report.total_bytes, 5000);
        assert_eq!(
            report.total_bytes,
            report.languages.iter().map(|l| l.bytes).sum::<u64>()
        );
        assert_eq!(report.languages[0].language, "Rust");
        assert_eq!(report.languages[0].percentage, 80.0);
        assert_eq!(report.total_commits, 155);
        // (2 * 10 + 0.5) + (1 * 10 + 0) = 30.5
        assert_eq!(report.score, 31);
    }

    #[tokio::test]
    async fn test_wrapped_report_counts_all_authors() {
        let api = sample_api();
        let querier = querier(&api);

        querier.wrapped_report("octocat", None).await.unwrap();

        assert!(api.calls().iter().all(|call| match call {
            Call::Commits { author, .. } => author.is_none(),
            _ => true,
        }));
    }

    #[tokio::test]
    async fn test_wrapped_report_is_cached_as_a_unit() {
        let api = sample_api();
        let querier = querier(&api);

        let first = querier.wrapped_report("octocat", None).await.unwrap();
        let calls = api.calls().len();
        let second = querier.wrapped_report("octocat", None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(api.calls().len(), calls);
    }

    #[tokio::test]
    async fn test_wrapped_report_for_user_without_repositories() {
        let api = FakeGitHub::new();
        let querier = querier(&api);

        let report = querier.wrapped_report("newbie", None).await.unwrap();

        assert_eq!(report, empty_report("newbie"));
    }

    #[tokio::test]
    async fn test_wrapped_report_surfaces_repository_failures() {
        let api = sample_api().failing_languages("world");
        let querier = querier(&api);

        let err = querier.wrapped_report("octocat", None).await.unwrap_err();

        assert!(matches!(err, ActivityError::AggregationIncomplete { .. }));
    }

    #[tokio::test]
    async fn test_wrapped_report_surfaces_listing_failures() {
        let api = FakeGitHub::new().failing_user("ghost");
        let querier = querier(&api);

        let err = querier.wrapped_report("ghost", None).await.unwrap_err();

        assert!(matches!(err, ActivityError::Upstream(_)));
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn test_wrapped_report_contract() {
        let json = serde_json::to_value(WrappedReport {
            username: "octocat".to_string(),
            total_repos: 1,
            total_bytes: 10,
            languages: vec![LanguageEntry {
                language: "Rust".to_string(),
                bytes: 10,
                percentage: 100.0,
            }],
            total_commits: 4,
            score: 10,
        })
        .unwrap();

        assert_eq!(json["totalRepos"], 1);
        assert_eq!(json["totalBytes"], 10);
        assert_eq!(json["totalCommits"], 4);
        assert_eq!(json["score"], 10);
        assert_eq!(json["languages"][0]["language"], "Rust");
        assert_eq!(json["languages"][0]["percentage"], 100.0);
    }
}
