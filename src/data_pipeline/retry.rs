// DANS : src/data_pipeline/retry.rs

use crate::{config::RetryConfig, error::Result};
use std::{
    future::Future,
    sync::{Mutex, PoisonError},
    time::Duration,
};
use tokio::time::{Instant, sleep};
use tracing::warn;

/// Ré-essai avec backoff exponentiel (`base * 2^tentative`, plafonné à `max_delay`),
/// plus un délai minimum entre deux échecs consécutifs vers la même source.
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    failure_cooldown: Duration,
    last_failure: Mutex<Option<Instant>>,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            failure_cooldown: config.failure_cooldown,
            last_failure: Mutex::new(None),
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn cooldown_remaining(&self) -> Duration {
        let last = *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner);
        match last {
            Some(at) => self.failure_cooldown.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }

    fn mark_failure(&self) {
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Exécute `op` jusqu'à `1 + max_retries` fois. Seules les erreurs
    /// `is_retryable()` déclenchent une nouvelle tentative.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let cooldown = self.cooldown_remaining();
            if !cooldown.is_zero() {
                sleep(cooldown).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    self.mark_failure();
                    if !e.is_retryable() || attempt >= self.max_retries {
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        "[Retry] {} : tentative {}/{} échouée ({}), nouvel essai dans {:?}.",
                        label,
                        attempt + 1,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(&RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            failure_cooldown: Duration::ZERO,
        })
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let p = policy(5);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(350));
        assert_eq!(p.delay_for(40), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let p = policy(3);
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let value = p
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(MonitorError::TransientNetwork("timeout".into()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_exhausted() {
        let p = policy(2);
        let calls = AtomicU32::new(0);
        let result: Result<()> = p
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MonitorError::TransientNetwork("down".into()))
            })
            .await;
        assert!(matches!(result, Err(MonitorError::TransientNetwork(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let p = policy(5);
        let calls = AtomicU32::new(0);
        let result: Result<()> = p
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MonitorError::Upstream("HTTP 404".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_failures_respect_the_cooldown() {
        let p = RetryPolicy::new(&RetryConfig {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            failure_cooldown: Duration::from_secs(2),
        });
        let _ = p.run("a", || async { Err::<(), _>(MonitorError::Upstream("x".into())) }).await;
        let start = Instant::now();
        let _ = p.run("b", || async { Ok::<_, MonitorError>(()) }).await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }
}
