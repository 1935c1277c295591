/// Exponential backoff with jitter for flaky transport calls.
///
/// A [`RetryPolicy`] describes how delays grow; a [`Backoff`] tracks the
/// running delay and attempt count for one retried invocation. After each
/// failure the delay is multiplied by `backoff_factor`, a random jitter
/// drawn from `jitter` is added, and the result is capped at `max_delay`.
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    /// Inclusive range of extra delay added after each failure.
    pub jitter: (Duration, Duration),
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy for listing notifications. Capped lower than mark-seen since
    /// a stale notification list means requests go unanswered.
    pub fn list_notifications() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            backoff_factor: 1.1,
            jitter: (Duration::from_secs(5), Duration::from_secs(10)),
            max_delay: Duration::from_secs(300),
        }
    }

    /// Policy for updating the seen-at marker.
    pub fn mark_seen() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            backoff_factor: 1.1,
            jitter: (Duration::from_secs(5), Duration::from_secs(10)),
            max_delay: Duration::from_secs(600),
        }
    }
}

pub struct Backoff {
    policy: RetryPolicy,
    current_delay: Duration,
    /// Number of failed attempts so far.
    pub attempt: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        let current_delay = policy.initial_delay.min(policy.max_delay);
        Self {
            policy,
            current_delay,
            attempt: 0,
        }
    }

    /// Returns the delay to wait now and advances the state.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let delay = self.current_delay;
        self.attempt += 1;

        let (lo, hi) = self.policy.jitter;
        let jitter = if hi > lo {
            rng.gen_range(lo.as_secs_f64()..=hi.as_secs_f64())
        } else {
            lo.as_secs_f64()
        };
        let grown = self.current_delay.as_secs_f64() * self.policy.backoff_factor + jitter;
        self.current_delay = Duration::from_secs_f64(grown).min(self.policy.max_delay);

        delay
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retriable: Display {
    fn is_retriable(&self) -> bool;
}

/// Runs `op` until it succeeds, sleeping between failures according to
/// `policy`. Gives up only on an error that is not retriable; callers bound
/// the rest with a timeout.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retriable,
{
    let mut backoff = Backoff::new(policy.clone());
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retriable() => {
                warn!(attempt = backoff.attempt + 1, "{label} failed permanently: {e}");
                return Err(e);
            }
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    attempt = backoff.attempt,
                    delay_secs = delay.as_secs_f64(),
                    "{label} failed: {e}, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
