use std::{future::Future, time::Duration};
use tracing::{error, warn};

use crate::config::RetryConfig;
use crate::error::{PipelineError, Stage};

/// Whole-stage retry: a fixed number of extra attempts, a fixed delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            retries: cfg.retries,
            delay: cfg.delay(),
        }
    }
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. Nothing is cleaned up between attempts; stages
/// overwrite their named artifact, so a bare re-run is safe.
pub async fn run_with_retry<T, F, Fut>(
    stage: Stage,
    policy: RetryPolicy,
    mut attempt: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut tries = 0u32;
    loop {
        tries += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && tries <= policy.retries => {
                warn!(
                    %stage,
                    attempt = tries,
                    delay_secs = policy.delay.as_secs(),
                    error = %err,
                    "stage failed; retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(err) => {
                error!(%stage, attempts = tries, error = %err, "stage failed");
                return Err(err);
            }
        }
    }
}
