use crate::ProviderError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Upper bound of the random extra wait, as a fraction of the base delay.
const JITTER_FACTOR: f64 = 0.25;

/// Bounded retry with exponential backoff. Every attempt is capped by
/// `call_timeout` so a hung remote call surfaces as `ProviderError::Timeout`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no sleeping. Handy in tests.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            call_timeout: Duration::from_secs(30),
        }
    }

    pub async fn run<T, F, Fut>(&self, op: &str, mut f: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt: u32 = 0;
        let mut delay = self.base_delay;
        loop {
            attempt = attempt.saturating_add(1);
            let outcome = match tokio::time::timeout(self.call_timeout, f()).await {
                Ok(res) => res,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "{op} exceeded {:?}",
                    self.call_timeout
                ))),
            };
            match outcome {
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    warn!(op, attempt, error = %err, "transient store failure, retrying");
                    tokio::time::sleep(delay.saturating_add(jitter(delay))).await;
                    delay = delay.saturating_mul(2).min(self.max_delay);
                }
                other => return other,
            }
        }
    }
}

fn jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return Duration::ZERO;
    }
    let factor = rand::rng().random_range(0.0..JITTER_FACTOR);
    delay.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            call_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let res = quick(3)
            .run("list", move || async move {
                let calls = counter;
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Transient("busy".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(res, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let res: Result<(), _> = quick(2)
            .run("upload", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Transient("busy".into()))
            })
            .await;
        assert!(res.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let res: Result<(), _> = quick(5)
            .run("delete", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::RequestFailed("401".into()))
            })
            .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn jitter_stays_within_a_quarter_of_the_delay() {
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
        let delay = Duration::from_millis(400);
        let samples: Vec<Duration> = (0..64).map(|_| jitter(delay)).collect();
        assert!(samples.iter().all(|j| *j < delay / 4));
        // Independent draws, not a shared clock reading.
        assert!(samples.iter().any(|j| *j != samples[0]));
    }

    #[tokio::test]
    async fn hung_calls_time_out() {
        let res: Result<(), _> = quick(1)
            .run("download", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(ProviderError::Timeout(_))));
    }
}
