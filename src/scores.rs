//! A single activity score per user, from language diversity and repository size.

use crate::cache::{keys, TokenClass};
use crate::error::ActivityError;
use crate::github::{LanguageMap, Repository};
use crate::querier::ActivityQuerier;
use serde::{Deserialize, Serialize};

const POINTS_PER_LANGUAGE: f64 = 10.0;
const KB_PER_POINT: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport {
    pub username: String,
    pub total_repos: usize,
    pub score: u64,
}

/// `distinct languages * 10 + size in KB / 1000`, unrounded.
pub fn repo_contribution(distinct_languages: usize, size_kb: u64) -> f64 {
    distinct_languages as f64 * POINTS_PER_LANGUAGE + size_kb as f64 / KB_PER_POINT
}

/// Sum of every repository's contribution, rounded half away from zero once at the end.
pub fn score<'a, I>(repos: I) -> u64
where
    I: IntoIterator<Item = (&'a Repository, &'a LanguageMap)>,
{
    let total: f64 = repos
        .into_iter()
        .map(|(repo, languages)| repo_contribution(languages.len(), repo.size_kb))
        .sum();
    total.round() as u64
}

impl ActivityQuerier {
    /// Score of `username`, cached on its own.
    pub async fn calculate_score(
        &self,
        username: &str,
        token: Option<&str>,
    ) -> Result<ScoreReport, ActivityError> {
        let effective = self.effective_token(token);
        let key = keys::score(username, &TokenClass::of(effective));

        self.cache
            .with_cache(&key, self.config.score_ttl(), || async {
                let repos = self.list_repos(username, token).await?;
                let maps = self
                    .fan_out(username, &repos, |repo| {
                        self.repo_languages(username, &repo.name, token)
                    })
                    .await?;

                Ok::<_, ActivityError>(ScoreReport {
                    username: username.to_string(),
                    total_repos: repos.len(),
                    score: score(repos.iter().zip(maps.iter())),
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::querier::testing::*;

    fn repo(size_kb: u64) -> Repository {
        Repository {
            name: format!("repo-{}", size_kb),
            html_url: String::new(),
            size_kb,
        }
    }

    fn languages(count: usize) -> LanguageMap {
        (0..count).map(|i| (format!("lang-{}", i), 100)).collect()
    }

    #[test]
    fn test_score_rounds_the_sum_half_up() {
        let repos = [repo(500), repo(0)];
        let maps = [languages(2), languages(1)];

        // (2 * 10 + 0.5) + (1 * 10 + 0) = 30.5
        assert_eq!(score(repos.iter().zip(maps.iter())), 31);
    }

    #[test]
    fn test_rounding_happens_once_not_per_repository() {
        let repos = [repo(400), repo(400)];
        let maps = [languages(0), languages(0)];

        // 0.4 + 0.4 = 0.8, not round(0.4) + round(0.4) = 0
        assert_eq!(score(repos.iter().zip(maps.iter())), 1);
    }

    #[test]
    fn test_no_repositories_scores_zero() {
        assert_eq!(score(std::iter::empty()), 0);
    }

    #[test]
    fn test_repo_contribution() {
        assert_eq!(repo_contribution(3, 2500), 32.5);
        assert_eq!(repo_contribution(0, 0), 0.0);
    }

    #[tokio::test]
    async fn test_calculate_score_from_upstream() {
        let api = FakeGitHub::new()
            .with_repo("octocat", "hello", 500)
            .with_repo("octocat", "world", 0)
            .with_languages("hello", &[("Rust", 10), ("Shell", 5)])
            .with_languages("world", &[("Go", 1)]);
        let querier = querier(&api);

        let report = querier.calculate_score("octocat", None).await.unwrap();

        assert_eq!(
            report,
            ScoreReport {
                username: "octocat".to_string(),
                total_repos: 2,
                score: 31,
            }
        );
    }
}
