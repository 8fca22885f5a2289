//! Error types shared by the upstream client, the cache layer and the services.

use thiserror::Error;

/// Failure talking to the GitHub REST API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Network failure or timeout. Retryable.
    #[error("{operation} {target}: upstream unavailable: {message}")]
    Unavailable {
        operation: &'static str,
        target: String,
        message: String,
    },

    /// The API answered with a non-2xx status.
    #[error("{operation} {target}: upstream rejected request with status {status}: {body}")]
    Rejected {
        operation: &'static str,
        target: String,
        status: u16,
        body: String,
    },
}

impl UpstreamError {
    pub fn unavailable(
        operation: &'static str,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Unavailable {
            operation,
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn rejected(
        operation: &'static str,
        target: impl Into<String>,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            operation,
            target: target.into(),
            status,
            body: body.into(),
        }
    }

    /// Upstream HTTP status, if the API answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unavailable { .. } => None,
            Self::Rejected { status, .. } => Some(*status),
        }
    }

    /// Whether a bounded retry with backoff is worth attempting.
    ///
    /// Secondary rate limits come back as 403 with a "rate limit" message,
    /// primary ones as 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Rejected { status: 429, .. } => true,
            Self::Rejected {
                status: 403, body, ..
            } => body.to_lowercase().contains("rate limit"),
            Self::Rejected { .. } => false,
        }
    }
}

/// Failure of the backing key-value store. Never surfaced past `CacheAside`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache value could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by the aggregation services.
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// One repository failed in the middle of a fan-out.
    #[error("aggregation incomplete at {repo}: {source}")]
    AggregationIncomplete {
        repo: String,
        #[source]
        source: UpstreamError,
    },
}

impl ActivityError {
    pub fn upstream(&self) -> &UpstreamError {
        match self {
            Self::Upstream(e) => e,
            Self::AggregationIncomplete { source, .. } => source,
        }
    }

    /// Upstream HTTP status behind this error, if any.
    pub fn status(&self) -> Option<u16> {
        self.upstream().status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(UpstreamError::unavailable("list_repos", "octocat", "timed out").is_retryable());
        assert!(UpstreamError::rejected("list_repos", "octocat", 429, "slow down").is_retryable());
        assert!(UpstreamError::rejected(
            "list_repos",
            "octocat",
            403,
            "API rate limit exceeded for 1.2.3.4"
        )
        .is_retryable());
        assert!(!UpstreamError::rejected("list_repos", "octocat", 403, "Forbidden").is_retryable());
        assert!(!UpstreamError::rejected("list_repos", "ghost", 404, "Not Found").is_retryable());
    }

    #[test]
    fn test_aggregation_incomplete_exposes_upstream_status() {
        let err = ActivityError::AggregationIncomplete {
            repo: "octocat/hello".to_string(),
            source: UpstreamError::rejected("repo_languages", "octocat/hello", 404, "Not Found"),
        };
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("octocat/hello"));
    }
}
