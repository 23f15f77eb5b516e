use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Transient;
use crate::util::env::env_parse;

const MAX_DELAY: Duration = Duration::from_secs(30);
// Upper bound on a server-requested wait.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

/// Bounded exponential backoff for transient upstream/storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// `SYNC_MAX_RETRIES` / `SYNC_BACKOFF_MS`, defaulting to 3 retries from 500ms.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_retries: env_parse("SYNC_MAX_RETRIES", d.max_retries),
            base_delay: Duration::from_millis(env_parse(
                "SYNC_BACKOFF_MS",
                d.base_delay.as_millis() as u64,
            )),
        }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Backoff for `retry`, stretched to the remote's `Retry-After` when that is longer.
    pub fn wait_for<E: Transient>(&self, retry: u32, err: &E) -> Duration {
        let backoff = self.delay_for(retry);
        match err.retry_after() {
            Some(asked) => backoff.max(asked.min(MAX_RETRY_AFTER)),
            None => backoff,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && retry < self.max_retries => {
                    let delay = self.wait_for(retry, &e);
                    warn!(what, attempt = retry + 1, delay_ms = delay.as_millis() as u64, error = %e, "transient failure; retrying");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
