use crate::cache::{keys, TokenClass};
use crate::error::UpstreamError;
use crate::github::Repository;
use crate::pagination::collect_pages;
use crate::querier::ActivityQuerier;

impl ActivityQuerier {
    /// Lists the repositories owned by `username`, most recently updated first.
    ///
    /// Upstream failures are logged and returned, never swallowed here.
    pub async fn list_repos(
        &self,
        username: &str,
        token: Option<&str>,
    ) -> Result<Vec<Repository>, UpstreamError> {
        let token = self.effective_token(token);
        let key = keys::repos(username, &TokenClass::of(token));

        self.cache
            .with_cache(&key, self.config.repos_ttl(), || async {
                collect_pages(|page| self.api.repos_page(username, page, token))
                    .await
                    .inspect_err(|e| {
                        tracing::error!(
                            username,
                            status = ?e.status(),
                            "Listing repositories failed: {}",
                            e
                        );
                    })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::querier::testing::*;

    #[tokio::test]
    async fn test_list_repos_is_cached_per_token_class() {
        let api = FakeGitHub::new()
            .with_repo("octocat", "hello", 10)
            .with_repo("octocat", "world", 20);
        let querier = querier(&api);

        let first = querier.list_repos("octocat", None).await.unwrap();
        let second = querier.list_repos("octocat", None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(api.calls().len(), 1);

        // a credentialed caller gets its own entry
        querier.list_repos("octocat", Some("ghp_token")).await.unwrap();
        assert_eq!(api.calls().len(), 2);
        assert_eq!(api.tokens_seen()[1].as_deref(), Some("ghp_token"));
    }

    #[tokio::test]
    async fn test_list_repos_follows_full_pages() {
        let mut api = FakeGitHub::new();
        for i in 0..130 {
            api = api.with_repo("prolific", &format!("repo-{}", i), 1);
        }
        let querier = querier(&api);

        let repos = querier.list_repos("prolific", None).await.unwrap();

        assert_eq!(repos.len(), 130);
        assert_eq!(
            api.calls(),
            vec![
                Call::Repos {
                    username: "prolific".to_string(),
                    page: 1
                },
                Call::Repos {
                    username: "prolific".to_string(),
                    page: 2
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_list_repos_failure_is_returned_and_not_cached() {
        let api = FakeGitHub::new().failing_user("ghost");
        let querier = querier(&api);

        let err = querier.list_repos("ghost", None).await.unwrap_err();
        assert_eq!(err.status(), Some(404));

        querier.list_repos("ghost", None).await.unwrap_err();
        assert_eq!(api.calls().len(), 2);
    }
}
