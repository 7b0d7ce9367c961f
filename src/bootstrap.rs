//! Turning a [`Config`] into a live [`Connection`], retrying until the server answers.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::Config;
use crate::connection::Connection;
use crate::error::TxMiddlewareError;
use crate::postgres::PgHandle;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Delay between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Constant(Duration),
    /// `initial * factor^(n-1)` after the n-th failure, capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        factor: f64,
    },
}

impl Backoff {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Constant(d) => d,
            Backoff::Exponential {
                initial,
                max,
                factor,
            } => {
                let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let secs = initial.as_secs_f64() * factor.powi(exp);
                Duration::try_from_secs_f64(secs).map_or(max, |d| d.min(max))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
    /// Stop once the next sleep would end past this much time since the first attempt.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Constant(DEFAULT_RETRY_DELAY),
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no sleeping.
    #[must_use]
    pub fn fail_fast() -> Self {
        Self {
            max_attempts: Some(1),
            ..Self::default()
        }
    }

    /// The policy a config asks for: [`RetryPolicy::fail_fast`] or the default.
    #[must_use]
    pub fn for_config(config: &Config) -> Self {
        if config.fail_fast {
            Self::fail_fast()
        } else {
            Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Source of delays (and of the time they are measured against).
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Run `op` until it succeeds or `policy` gives up, sleeping between attempts.
///
/// `op` receives the 1-based attempt number.
///
/// # Errors
/// The error of the last attempt.
pub async fn retry<T, F, Fut, S>(
    policy: &RetryPolicy,
    sleeper: &S,
    mut op: F,
) -> Result<T, TxMiddlewareError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TxMiddlewareError>>,
    S: Sleeper + ?Sized,
{
    let started = sleeper.now();
    let mut attempt: u32 = 1;
    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            tracing::warn!(attempt, error = %err, "giving up: attempts exhausted");
            return Err(err);
        }
        let delay = policy.backoff.delay(attempt);
        if let Some(deadline) = policy.deadline
            && sleeper.now().duration_since(started) + delay > deadline
        {
            tracing::warn!(attempt, error = %err, "giving up: deadline reached");
            return Err(err);
        }

        tracing::warn!(
            attempt,
            error = %err,
            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "attempt failed, retrying"
        );
        sleeper.sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

/// Verify `config` under `policy` and wrap a pool for it in a [`Connection`].
///
/// # Errors
/// A TLS setup error before any attempt, otherwise the driver error of the last attempt,
/// unchanged.
pub async fn connect_with<S: Sleeper + ?Sized>(
    config: &Config,
    policy: &RetryPolicy,
    sleeper: &S,
) -> Result<Connection<PgHandle>, TxMiddlewareError> {
    let manager = config.manager()?;
    let handle = retry(policy, sleeper, |attempt| {
        tracing::debug!(attempt, host = %config.host, port = config.port, "connecting");
        PgHandle::connect(manager.clone())
    })
    .await?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        "connected to database"
    );
    Ok(Connection::new(handle))
}

impl Config {
    /// Connect with [`RetryPolicy::for_config`] on the tokio timer.
    ///
    /// Without `fail_fast` this does not return until the server is reachable.
    ///
    /// # Errors
    /// With `fail_fast`, the first driver error.
    pub async fn connect(&self) -> Result<Connection<PgHandle>, TxMiddlewareError> {
        connect_with(self, &RetryPolicy::for_config(self), &TokioSleeper).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Records requested sleeps and advances a virtual clock instead of waiting.
    struct FakeSleeper {
        base: Instant,
        slept: Mutex<Vec<Duration>>,
    }

    impl FakeSleeper {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                slept: Mutex::new(Vec::new()),
            }
        }

        fn slept(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for FakeSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }

        fn now(&self) -> Instant {
            self.base + self.slept.lock().unwrap().iter().sum::<Duration>()
        }
    }

    fn refused() -> TxMiddlewareError {
        TxMiddlewareError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))
    }

    async fn fail_times(
        policy: &RetryPolicy,
        sleeper: &FakeSleeper,
        failures: u32,
    ) -> (Result<u32, TxMiddlewareError>, u32) {
        let calls = AtomicU32::new(0);
        let res = retry(policy, sleeper, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt <= failures {
                    Err(refused())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        (res, calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn default_policy_retries_until_success() {
        let sleeper = FakeSleeper::new();
        let (res, calls) = fail_times(&RetryPolicy::default(), &sleeper, 4).await;
        assert_eq!(res.unwrap(), 5);
        assert_eq!(calls, 5);
        assert_eq!(sleeper.slept(), vec![DEFAULT_RETRY_DELAY; 4]);
    }

    #[tokio::test]
    async fn max_attempts_bounds_calls_and_sleeps_only_between() {
        let sleeper = FakeSleeper::new();
        let policy = RetryPolicy::default().with_max_attempts(3);
        let (res, calls) = fail_times(&policy, &sleeper, u32::MAX).await;
        assert!(matches!(res, Err(TxMiddlewareError::Io(_))));
        assert_eq!(calls, 3);
        assert_eq!(sleeper.slept().len(), 2);
    }

    #[tokio::test]
    async fn fail_fast_makes_one_attempt() {
        let sleeper = FakeSleeper::new();
        let cfg = Config::new("u", "p", "h", 5432, "d", crate::config::SslMode::Disable)
            .with_fail_fast(true);
        let (res, calls) = fail_times(&RetryPolicy::for_config(&cfg), &sleeper, 1).await;
        assert!(res.is_err());
        assert_eq!(calls, 1);
        assert!(sleeper.slept().is_empty());
    }

    #[tokio::test]
    async fn deadline_stops_before_oversleeping() {
        let sleeper = FakeSleeper::new();
        let policy = RetryPolicy::default().with_deadline(Duration::from_secs(12));
        let (res, calls) = fail_times(&policy, &sleeper, u32::MAX).await;
        assert!(res.is_err());
        // 5s + 5s fits, a third sleep would end at 15s.
        assert_eq!(calls, 3);
        assert_eq!(sleeper.slept(), vec![DEFAULT_RETRY_DELAY; 2]);
    }

    #[test]
    fn exponential_backoff_caps() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
        assert_eq!(backoff.delay(5), Duration::from_secs(1));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn fail_fast_connect_returns_driver_error() {
        // Nothing listens on port 1.
        let cfg = Config::new("u", "p", "127.0.0.1", 1, "d", crate::config::SslMode::Disable)
            .with_fail_fast(true)
            .with_connect_timeout(Duration::from_secs(2));
        let err = cfg.connect().await.unwrap_err();
        assert!(
            matches!(err, TxMiddlewareError::Postgres(_)),
            "expected the driver error, got {err:?}"
        );
    }
}
