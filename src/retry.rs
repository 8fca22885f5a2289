//! Bounded retry with exponential backoff for idempotent upstream reads.

use crate::config::AppConfig;
use crate::error::UpstreamError;
use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// How often and how patiently a failed upstream read is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: usize,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            min_delay: Duration::from_millis(config.upstream_retry_min_delay_ms),
            max_delay: Duration::from_millis(config.upstream_retry_max_delay_ms),
            max_retries: config.upstream_max_retries,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_retries: 0,
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

/// Runs `operation`, retrying only errors for which `UpstreamError::is_retryable` holds.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    target: &str,
    mut op: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let attempt = AtomicU32::new(0);

    let counted = || {
        attempt.fetch_add(1, Ordering::SeqCst);
        op()
    };

    counted
        .retry(policy.backoff())
        .when(UpstreamError::is_retryable)
        .notify(|err, dur| {
            tracing::warn!(
                operation,
                resource = target,
                attempt = attempt.load(Ordering::SeqCst),
                "Retrying upstream read in {:?}: {}",
                dur,
                err
            );
        })
        .await
}
