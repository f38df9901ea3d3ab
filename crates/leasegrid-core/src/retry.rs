//! Retry policies.
//!
//! A [`RetryPolicy`] pairs an attempt ceiling with a [`Backoff`] shape. The
//! failure classifier is supplied per call site, so the same policy can be
//! used for storage calls and management calls with different notions of
//! what is transient.
//!
//! ```text
//! attempt 0 ── fail (transient) ── sleep delay(0) ── attempt 1 ── ...
//!          └── fail (permanent) ── propagate unchanged
//! ```
//!
//! No state survives between calls to [`RetryPolicy::run`]: the attempt
//! counter is local to one invocation.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry right away.
    Immediate,
    /// Same delay before every retry.
    Fixed(Duration),
    /// `min(cap, step * (attempt + 1))`.
    Linear { step: Duration, cap: Duration },
    /// `min(cap, unit * (attempt + 1)^2)`.
    Quadratic { unit: Duration, cap: Duration },
}

impl Backoff {
    /// Delay to wait after the failure of attempt `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let n = attempt.saturating_add(1);
        match *self {
            Backoff::Immediate => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Linear { step, cap } => step.saturating_mul(n).min(cap),
            Backoff::Quadratic { unit, cap } => unit.saturating_mul(n.saturating_mul(n)).min(cap),
        }
    }
}

/// Attempt ceiling plus backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt; `None` retries forever.
    max_retries: Option<u32>,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Retry at most `max_retries` times after the first attempt.
    pub fn bounded(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries: Some(max_retries),
            backoff,
        }
    }

    /// Retry transient failures until the operation succeeds.
    pub fn unbounded(backoff: Backoff) -> Self {
        Self {
            max_retries: None,
            backoff,
        }
    }

    /// Run exactly once.
    pub fn no_retry() -> Self {
        Self::bounded(0, Backoff::Immediate)
    }

    /// Transient server errors: 30 retries, quadratic seconds capped at 5 minutes.
    pub fn transient_server_errors() -> Self {
        Self::bounded(
            30,
            Backoff::Quadratic {
                unit: Duration::from_secs(1),
                cap: Duration::from_secs(300),
            },
        )
    }

    /// Bootstrap loops that must eventually succeed.
    pub fn slow_instantiation() -> Self {
        Self::unbounded(Backoff::Quadratic {
            unit: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        })
    }

    /// Conditional-write conflicts: frequent, short-lived, retried forever.
    pub fn optimistic_concurrency() -> Self {
        Self::unbounded(Backoff::Linear {
            step: Duration::from_millis(10),
            cap: Duration::from_millis(500),
        })
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Whether another attempt is allowed after `retries_done` retries.
    pub fn allows_retry(&self, retries_done: u32) -> bool {
        self.max_retries.is_none_or(|max| retries_done < max)
    }

    /// Run `op`, retrying failures that `is_transient` accepts.
    ///
    /// Non-transient failures and the failure that exhausts the ceiling are
    /// returned unchanged.
    pub async fn run<T, E, Op, Fut, C>(&self, operation: &str, is_transient: C, mut op: Op) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: Display,
    {
        let mut retries: u32 = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !is_transient(&err) {
                return Err(err);
            }
            if !self.allows_retry(retries) {
                warn!(operation, attempts = retries + 1, error = %err, "retries exhausted");
                return Err(err);
            }

            let delay = self.backoff.delay(retries);
            debug!(
                operation,
                retry = retries + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
            retries = retries.saturating_add(1);
        }
    }
}

/// Classifier that treats every failure as permanent.
pub fn never<E>(_: &E) -> bool {
    false
}

/// Classifier that treats every failure as transient.
pub fn always<E>(_: &E) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::time::Instant;

    #[test]
    fn quadratic_backoff_is_capped() {
        let backoff = RetryPolicy::transient_server_errors().backoff();
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(4));
        assert_eq!(backoff.delay(4), Duration::from_secs(25));
        assert_eq!(backoff.delay(16), Duration::from_secs(289));
        assert_eq!(backoff.delay(17), Duration::from_secs(300));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn linear_and_fixed_backoff() {
        let linear = Backoff::Linear {
            step: Duration::from_millis(10),
            cap: Duration::from_millis(25),
        };
        assert_eq!(linear.delay(0), Duration::from_millis(10));
        assert_eq!(linear.delay(1), Duration::from_millis(20));
        assert_eq!(linear.delay(2), Duration::from_millis(25));

        let fixed = Backoff::Fixed(Duration::from_secs(2));
        assert_eq!(fixed.delay(0), fixed.delay(9));
        assert_eq!(Backoff::Immediate.delay(3), Duration::ZERO);
    }

    #[tokio::test]
    async fn permanent_failure_propagates_immediately() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::bounded(10, Backoff::Immediate);

        let result: Result<(), String> = policy
            .run("op", never, || {
                calls.set(calls.get() + 1);
                async { Err("boom".to_string()) }
            })
            .await;

        assert_eq!(result, Err("boom".to_string()));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn bounded_policy_stops_at_ceiling() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::bounded(3, Backoff::Immediate);

        let result: Result<(), String> = policy
            .run("op", always, || {
                calls.set(calls.get() + 1);
                async { Err("busy".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn classifier_decides_per_error() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::bounded(10, Backoff::Immediate);

        let result: Result<(), String> = policy
            .run("op", |e: &String| e == "throttled", || {
                let n = calls.get() + 1;
                calls.set(n);
                async move {
                    if n < 3 {
                        Err("throttled".to_string())
                    } else {
                        Err("missing".to_string())
                    }
                }
            })
            .await;

        assert_eq!(result, Err("missing".to_string()));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_policy_sleeps_between_attempts() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::slow_instantiation();
        assert_eq!(policy.max_retries(), None);
        let started = Instant::now();

        let result: Result<u32, String> = policy
            .run("op", always, || {
                let n = calls.get() + 1;
                calls.set(n);
                async move { if n < 4 { Err("blip".to_string()) } else { Ok(n) } }
            })
            .await;

        assert_eq!(result, Ok(4));
        // 1 + 4 + 9 seconds of backoff before the fourth attempt.
        assert!(started.elapsed() >= Duration::from_secs(14));
    }

    #[test]
    fn allows_retry_respects_ceiling() {
        let bounded = RetryPolicy::bounded(2, Backoff::Immediate);
        assert!(bounded.allows_retry(1));
        assert!(!bounded.allows_retry(2));
        assert!(RetryPolicy::optimistic_concurrency().allows_retry(u32::MAX));
        assert!(!RetryPolicy::no_retry().allows_retry(0));
    }
}
