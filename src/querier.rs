//! Service layer for querying and caching per-user GitHub activity.
//!
//! This module implements `ActivityQuerier`, the entry point every report goes
//! through. It owns:
//! 1. The upstream client, behind the `GitHubApi` trait.
//! 2. The cache-aside layer and its hit/miss counters.
//! 3. The bounded fan-out used to visit every repository of a user.
//!
//! The individual operations live next to their data types, in `repos`,
//! `commits`, `languages`, `scores` and `wrapped`.

use crate::cache::{self, CacheAside, CacheStats};
use crate::config::AppConfig;
use crate::error::{ActivityError, UpstreamError};
use crate::github::{GitHubApi, GitHubClient, Repository};
use crate::retry::RetryPolicy;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::sync::Arc;

#[derive(Clone)]
pub struct ActivityQuerier {
    pub(crate) api: Arc<dyn GitHubApi>,
    pub(crate) cache: CacheAside,
    pub(crate) config: AppConfig,
}

impl ActivityQuerier {
    /// Initializes a new ActivityQuerier.
    ///
    /// This sets up the Octocrab-backed client and the cache store selected by
    /// the configuration.
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let client = GitHubClient::new(
            config.github_api_url.clone(),
            RetryPolicy::from_config(config),
        )?;
        let store = cache::store_from_config(config);
        let cache = CacheAside::new(store, Arc::new(CacheStats::new()));

        Ok(Self::with_parts(Arc::new(client), cache, config.clone()))
    }

    /// Assembles a querier from explicit parts.
    pub fn with_parts(api: Arc<dyn GitHubApi>, cache: CacheAside, config: AppConfig) -> Self {
        Self { api, cache, config }
    }

    pub fn cache_stats(&self) -> &Arc<CacheStats> {
        self.cache.stats()
    }

    /// The caller's credential, or the server default when the caller has none.
    pub(crate) fn effective_token<'a>(&'a self, token: Option<&'a str>) -> Option<&'a str> {
        token
            .filter(|t| !t.is_empty())
            .or(self.config.github_token.as_deref())
    }

    /// Runs `visit` for every repository with at most `fanout_concurrency`
    /// requests in flight, returning results in repository order.
    ///
    /// The first failure aborts the fan-out. Visits are boxed before they enter
    /// the stream; the returned future must be `Send` to serve as a handler body.
    pub(crate) fn fan_out<'a, T, F, Fut>(
        &'a self,
        owner: &'a str,
        repos: &'a [Repository],
        visit: F,
    ) -> impl Future<Output = Result<Vec<T>, ActivityError>> + Send + 'a
    where
        T: Send + 'a,
        F: Fn(&'a Repository) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'a,
    {
        let pending: Vec<BoxFuture<'a, Result<T, ActivityError>>> = repos
            .iter()
            .map(|repo| {
                let repo_name = format!("{}/{}", owner, repo.name);
                let visiting = visit(repo);
                async move {
                    visiting
                        .await
                        .map_err(|source| ActivityError::AggregationIncomplete {
                            repo: repo_name,
                            source,
                        })
                }
                .boxed()
            })
            .collect();

        stream::iter(pending)
            .buffered(self.config.fanout_limit())
            .try_collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory upstream used by the service tests.

    use super::*;
    use crate::cache::MemoryStore;
    use crate::github::{CommitFilter, CommitRef, LanguageMap, PER_PAGE};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Repos { username: String, page: u32 },
        Commits { repo: String, page: u32, author: Option<String> },
        Languages { repo: String },
    }

    #[derive(Default)]
    struct FakeState {
        repos: HashMap<String, Vec<Repository>>,
        commits: HashMap<String, usize>,
        languages: HashMap<String, LanguageMap>,
        failing_languages: Vec<String>,
        failing_users: Vec<String>,
        calls: Vec<Call>,
        tokens: Vec<Option<String>>,
    }

    /// Serves canned data and records every page request.
    #[derive(Default, Clone)]
    pub struct FakeGitHub {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeGitHub {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_repo(self, owner: &str, name: &str, size_kb: u64) -> Self {
            self.state
                .lock()
                .unwrap()
                .repos
                .entry(owner.to_string())
                .or_default()
                .push(Repository {
                    name: name.to_string(),
                    html_url: format!("https://github.com/{}/{}", owner, name),
                    size_kb,
                });
            self
        }

        pub fn with_commits(self, repo: &str, count: usize) -> Self {
            self.state
                .lock()
                .unwrap()
                .commits
                .insert(repo.to_string(), count);
            self
        }

        pub fn with_languages(self, repo: &str, languages: &[(&str, u64)]) -> Self {
            let map = languages
                .iter()
                .map(|(lang, bytes)| (lang.to_string(), *bytes))
                .collect();
            self.state
                .lock()
                .unwrap()
                .languages
                .insert(repo.to_string(), map);
            self
        }

        pub fn failing_languages(self, repo: &str) -> Self {
            self.state
                .lock()
                .unwrap()
                .failing_languages
                .push(repo.to_string());
            self
        }

        pub fn failing_user(self, username: &str) -> Self {
            self.state
                .lock()
                .unwrap()
                .failing_users
                .push(username.to_string());
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn tokens_seen(&self) -> Vec<Option<String>> {
            self.state.lock().unwrap().tokens.clone()
        }

        fn record(&self, call: Call, token: Option<&str>) {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            state.tokens.push(token.map(str::to_string));
        }
    }

    fn page_of<T: Clone>(items: &[T], page: u32) -> Vec<T> {
        let start = (page as usize - 1) * PER_PAGE;
        items.iter().skip(start).take(PER_PAGE).cloned().collect()
    }

    #[async_trait]
    impl GitHubApi for FakeGitHub {
        async fn repos_page(
            &self,
            username: &str,
            page: u32,
            token: Option<&str>,
        ) -> Result<Vec<Repository>, UpstreamError> {
            self.record(
                Call::Repos {
                    username: username.to_string(),
                    page,
                },
                token,
            );
            let state = self.state.lock().unwrap();
            if state.failing_users.iter().any(|u| u == username) {
                return Err(UpstreamError::rejected("list_repos", username, 404, "Not Found"));
            }
            let repos = state.repos.get(username).cloned().unwrap_or_default();
            Ok(page_of(&repos, page))
        }

        async fn commits_page(
            &self,
            _owner: &str,
            repo: &str,
            filter: &CommitFilter,
            page: u32,
            token: Option<&str>,
        ) -> Result<Vec<CommitRef>, UpstreamError> {
            self.record(
                Call::Commits {
                    repo: repo.to_string(),
                    page,
                    author: filter.author.clone(),
                },
                token,
            );
            let total = self
                .state
                .lock()
                .unwrap()
                .commits
                .get(repo)
                .copied()
                .unwrap_or(0);
            let start = (page as usize - 1) * PER_PAGE;
            let len = total.saturating_sub(start).min(PER_PAGE);
            Ok((0..len)
                .map(|i| CommitRef {
                    sha: format!("{:040x}", start + i),
                })
                .collect())
        }

        async fn repo_languages(
            &self,
            owner: &str,
            repo: &str,
            token: Option<&str>,
        ) -> Result<LanguageMap, UpstreamError> {
            self.record(
                Call::Languages {
                    repo: repo.to_string(),
                },
                token,
            );
            let state = self.state.lock().unwrap();
            if state.failing_languages.iter().any(|r| r == repo) {
                return Err(UpstreamError::unavailable(
                    "repo_languages",
                    format!("{}/{}", owner, repo),
                    "connection reset",
                ));
            }
            Ok(state.languages.get(repo).cloned().unwrap_or_default())
        }
    }

    pub fn querier(api: &FakeGitHub) -> ActivityQuerier {
        querier_with_config(api, AppConfig::default())
    }

    pub fn querier_with_config(api: &FakeGitHub, config: AppConfig) -> ActivityQuerier {
        let cache = CacheAside::new(Arc::new(MemoryStore::new(1_000)), Arc::new(CacheStats::new()));
        ActivityQuerier::with_parts(Arc::new(api.clone()), cache, config)
    }
}
