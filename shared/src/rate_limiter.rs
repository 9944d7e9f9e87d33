use governor::{Quota, RateLimiter as GovernorRateLimiter};
use nonzero_ext::nonzero;
use rand::{thread_rng, Rng};
use std::fmt::Display;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Exponential backoff schedule for one class of retryable failures.
///
/// The n-th wait (starting at zero) is `factor * 2^n`, capped at
/// `max_backoff`, plus up to 10% random jitter. `max_tries` counts the
/// initial attempt, so a policy with `max_tries = 4` sleeps at most three
/// times before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub name: &'static str,
    pub max_tries: u32,
    pub factor: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(600);

    pub const fn new(name: &'static str, max_tries: u32, factor: Duration) -> Self {
        Self {
            name,
            max_tries,
            factor,
            max_backoff: Self::DEFAULT_MAX_BACKOFF,
        }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(retry);
        self.factor.saturating_mul(multiplier).min(self.max_backoff)
    }
}

/// Process-wide call ceiling over a rolling window, with a retry loop that
/// re-acquires capacity before every attempt.
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<
        GovernorRateLimiter<
            governor::state::direct::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
    request_count: Arc<AtomicU64>,
    last_log_time: Arc<std::sync::Mutex<Instant>>,
    configured_per_minute: u32,
}

impl RateLimiter {
    const STATS_INTERVAL: Duration = Duration::from_secs(60);

    /// Calls are spaced evenly at `60s / calls_per_minute` with no burst
    /// allowance, so no rolling 60 second window admits more than
    /// `calls_per_minute` calls.
    pub fn per_minute(calls_per_minute: u32) -> Self {
        let calls = NonZeroU32::new(calls_per_minute).unwrap_or(nonzero!(1u32));
        let quota = Quota::per_minute(calls).allow_burst(nonzero!(1u32));
        let limiter = Arc::new(GovernorRateLimiter::direct(quota));

        debug!(
            "Creating rate limit with limit of {} requests per minute",
            calls
        );
        Self {
            limiter,
            request_count: Arc::new(AtomicU64::new(0)),
            last_log_time: Arc::new(std::sync::Mutex::new(Instant::now())),
            configured_per_minute: calls.get(),
        }
    }

    pub async fn check_rate_limit(&self) {
        self.limiter.until_ready().await;

        self.request_count.fetch_add(1, Ordering::Relaxed);

        let Ok(mut last_log) = self.last_log_time.lock() else {
            return;
        };
        let elapsed = last_log.elapsed();

        if elapsed >= Self::STATS_INTERVAL {
            let count = self.request_count.swap(0, Ordering::Relaxed);
            let actual_rpm = count as f64 / elapsed.as_secs_f64() * 60.0;

            info!(
                "Rate limiter stats: actual={:.2} req/min, limit={} req/min",
                actual_rpm, self.configured_per_minute
            );

            *last_log = Instant::now();
        }
    }

    /// Runs `operation` until it succeeds, or until `classify` declares the
    /// error non-retryable, or until the policy returned for that error has
    /// used up its tries. Each policy keeps its own attempt counter.
    pub async fn execute_with_retry<T, E, F, Fut, C>(&self, operation: F, classify: C) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        C: Fn(&E) -> Option<RetryPolicy>,
        E: Display,
    {
        let mut tries: Vec<(&'static str, u32)> = Vec::new();

        loop {
            self.check_rate_limit().await;

            let err = match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            let Some(policy) = classify(&err) else {
                return Err(err);
            };

            let used = match tries.iter_mut().find(|(name, _)| *name == policy.name) {
                Some((_, count)) => {
                    *count += 1;
                    *count
                }
                None => {
                    tries.push((policy.name, 1));
                    1
                }
            };

            if used >= policy.max_tries {
                warn!(
                    "Giving up after {} {} attempt(s): {}",
                    used, policy.name, err
                );
                return Err(err);
            }

            let delay = policy.delay_for(used - 1);
            let jitter_ceiling = (delay.as_millis() as u64 / 10).max(1);
            let wait_time = delay + Duration::from_millis(thread_rng().gen_range(0..jitter_ceiling));

            warn!(
                "Retryable {} failure, retry {} of {}, waiting {:?}: {}",
                policy.name,
                used,
                policy.max_tries - 1,
                wait_time,
                err
            );

            sleep(wait_time).await;
        }
    }
}
