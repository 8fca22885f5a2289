//! Application configuration and environment variable parsing.
//!
//! This module handles loading configuration settings from the environment (e.g., .env file).
//! It defines the `AppConfig` struct which governs behavior such as cache TTLs per
//! operation, the upstream retry budget, and the width of the per-repository fan-out.

use serde::Deserialize;
use std::time::Duration as StdDuration;

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Optional GitHub Personal Access Token used when the caller supplies none.
    pub github_token: Option<String>,

    /// Base URI of the GitHub REST API. Defaults to api.github.com when unset.
    pub github_api_url: Option<String>,

    /// Time to live for a user's repository listing, in seconds.
    #[serde(default = "default_short_ttl")]
    pub repos_ttl_seconds: u64,

    /// Time to live for a per-repository commit count, in seconds.
    #[serde(default = "default_short_ttl")]
    pub commit_count_ttl_seconds: u64,

    /// Time to live for a per-repository language map, in seconds.
    #[serde(default = "default_repo_languages_ttl")]
    pub repo_languages_ttl_seconds: u64,

    /// Time to live for a user's aggregated language breakdown, in seconds.
    #[serde(default = "default_report_ttl")]
    pub language_breakdown_ttl_seconds: u64,

    /// Time to live for a user's full wrapped report, in seconds.
    #[serde(default = "default_report_ttl")]
    pub wrapped_ttl_seconds: u64,

    /// Time to live for a standalone score report, in seconds.
    #[serde(default = "default_report_ttl")]
    pub score_ttl_seconds: u64,

    /// Maximum number of entries to keep in the in-memory cache store.
    #[serde(default = "default_cache_max_capacity")]
    pub cache_max_capacity: u64,

    /// Redis connection URL. Only honoured when built with the `redis` feature.
    pub cache_redis_url: Option<String>,

    /// Upper bound on a single cache store operation, in milliseconds.
    #[serde(default = "default_cache_timeout_ms")]
    pub cache_timeout_ms: u64,

    /// Maximum number of repositories fetched concurrently while aggregating.
    #[serde(default = "default_fanout_concurrency")]
    pub fanout_concurrency: usize,

    /// Maximum retry attempts for a retryable upstream read.
    #[serde(default = "default_upstream_max_retries")]
    pub upstream_max_retries: usize,

    /// Initial backoff between upstream retries, in milliseconds.
    #[serde(default = "default_retry_min_delay_ms")]
    pub upstream_retry_min_delay_ms: u64,

    /// Upper bound on the backoff between upstream retries, in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub upstream_retry_max_delay_ms: u64,

    /// Port the HTTP server binds to.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_short_ttl() -> u64 {
    300
}

fn default_repo_languages_ttl() -> u64 {
    900
}

fn default_report_ttl() -> u64 {
    600
}

fn default_cache_max_capacity() -> u64 {
    10_000
}

fn default_cache_timeout_ms() -> u64 {
    250
}

fn default_fanout_concurrency() -> usize {
    8
}

fn default_upstream_max_retries() -> usize {
    3
}

fn default_retry_min_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    5_000
}

fn default_port() -> u16 {
    4000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            github_token: None,
            github_api_url: None,
            repos_ttl_seconds: default_short_ttl(),
            commit_count_ttl_seconds: default_short_ttl(),
            repo_languages_ttl_seconds: default_repo_languages_ttl(),
            language_breakdown_ttl_seconds: default_report_ttl(),
            wrapped_ttl_seconds: default_report_ttl(),
            score_ttl_seconds: default_report_ttl(),
            cache_max_capacity: default_cache_max_capacity(),
            cache_redis_url: None,
            cache_timeout_ms: default_cache_timeout_ms(),
            fanout_concurrency: default_fanout_concurrency(),
            upstream_max_retries: default_upstream_max_retries(),
            upstream_retry_min_delay_ms: default_retry_min_delay_ms(),
            upstream_retry_max_delay_ms: default_retry_max_delay_ms(),
            port: default_port(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn repos_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.repos_ttl_seconds)
    }

    pub fn commit_count_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.commit_count_ttl_seconds)
    }

    pub fn repo_languages_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.repo_languages_ttl_seconds)
    }

    pub fn language_breakdown_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.language_breakdown_ttl_seconds)
    }

    pub fn wrapped_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.wrapped_ttl_seconds)
    }

    pub fn score_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.score_ttl_seconds)
    }

    pub fn cache_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.cache_timeout_ms)
    }

    /// Fan-out width, never below one.
    pub fn fanout_limit(&self) -> usize {
        self.fanout_concurrency.max(1)
    }
}
