//! Circuit breaker around the upstream HTTP source
//!
//! A generic failure-accumulation guard: after a run of consecutive failures
//! the breaker opens and rejects calls immediately, which is the backpressure
//! mechanism protecting an overloaded or silently-hanging upstream. After a
//! reset window a single trial call is let through; its outcome decides
//! whether the breaker closes again or reopens with a fresh window.
//!
//! Breakers are explicitly constructed and injected; jobs share one instance
//! and its state transition is a single critical section.

use crate::config::BreakerConfig;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Observable breaker state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow through; failures accumulate
    Closed,
    /// Calls are rejected until the reset window elapses
    Open,
    /// One trial call is in flight; everyone else is rejected
    HalfOpen,
}

/// Error returned by [`CircuitBreaker::execute`]
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without invoking the operation
    #[error("circuit breaker is open")]
    Open,

    /// The operation ran and failed; the failure was counted
    #[error("{0}")]
    Inner(E),
}

impl From<BreakerError<crate::error::Error>> for crate::error::Error {
    fn from(err: BreakerError<crate::error::Error>) -> Self {
        match err {
            BreakerError::Open => crate::error::Error::CircuitOpen,
            BreakerError::Inner(e) => e,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
}

/// Failure-accumulation guard wrapping any fallible async call
pub struct CircuitBreaker {
    shared: Mutex<BreakerState>,
    threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    /// Create a breaker that opens after `threshold` consecutive failures and
    /// allows a trial call `reset_timeout` after the last failure
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            shared: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
            }),
            threshold,
            reset_timeout,
        }
    }

    /// Create a breaker from its config section
    pub fn from_config(config: &BreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.reset_timeout)
    }

    /// Run `operation` under the breaker
    ///
    /// In the open state, before the reset window elapses, this fails with
    /// [`BreakerError::Open`] without invoking the operation. Any `Err` from
    /// the operation counts as a failure; any `Ok` clears the failure
    /// counter and closes the breaker.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.admit()?;

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure(&e);
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Current state (transitions Open→HalfOpen are only visible through
    /// `execute`, not this accessor)
    pub fn state(&self) -> CircuitState {
        self.shared
            .lock()
            .map(|s| s.state)
            .unwrap_or(CircuitState::Open)
    }

    /// Current consecutive failure count
    pub fn consecutive_failures(&self) -> u32 {
        self.shared
            .lock()
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
    }

    /// Decide whether a call may proceed, moving Open→HalfOpen when the
    /// reset window has elapsed. The caller that wins the transition is the
    /// single trial; concurrent callers keep seeing Open.
    fn admit<E>(&self) -> Result<(), BreakerError<E>> {
        let Ok(mut shared) = self.shared.lock() else {
            return Err(BreakerError::Open);
        };
        match shared.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Err(BreakerError::Open),
            CircuitState::Open => {
                let window_elapsed = shared
                    .last_failure_at
                    .is_some_and(|at| at.elapsed() >= self.reset_timeout);
                if window_elapsed {
                    shared.state = CircuitState::HalfOpen;
                    tracing::debug!("Circuit breaker half-open, allowing trial call");
                    Ok(())
                } else {
                    Err(BreakerError::Open)
                }
            }
        }
    }

    fn on_success(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            if shared.state != CircuitState::Closed {
                tracing::info!("Circuit breaker closed after successful trial");
            }
            shared.state = CircuitState::Closed;
            shared.consecutive_failures = 0;
        }
    }

    fn on_failure(&self, error: &impl std::fmt::Display) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.consecutive_failures += 1;
            shared.last_failure_at = Some(Instant::now());

            let reopened = shared.state == CircuitState::HalfOpen;
            if reopened || shared.consecutive_failures >= self.threshold {
                if shared.state != CircuitState::Open {
                    tracing::warn!(
                        failures = shared.consecutive_failures,
                        error = %error,
                        "Circuit breaker opened"
                    );
                }
                shared.state = CircuitState::Open;
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(threshold, Duration::from_millis(reset_ms))
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError<String>> {
        b.execute(|| async { Err::<(), _>("boom".to_string()) }).await
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let b = breaker(3, 60_000);

        for _ in 0..2 {
            assert!(matches!(fail(&b).await, Err(BreakerError::Inner(_))));
            assert_eq!(b.state(), CircuitState::Closed);
        }

        assert!(matches!(fail(&b).await, Err(BreakerError::Inner(_))));
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.consecutive_failures(), 3);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_invoking() {
        let b = breaker(1, 60_000);
        fail(&b).await.ok();
        assert_eq!(b.state(), CircuitState::Open);

        let invoked = Arc::new(AtomicU32::new(0));
        let invoked_clone = invoked.clone();
        let result = b
            .execute(|| {
                let invoked = invoked_clone.clone();
                async move {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(42)
                }
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0, "must not invoke while open");
    }

    #[tokio::test]
    async fn half_open_success_closes_and_resets_counter() {
        let b = breaker(2, 20);
        fail(&b).await.ok();
        fail(&b).await.ok();
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;

        let result = b.execute(|| async { Ok::<_, String>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_with_fresh_window() {
        let b = breaker(2, 30);
        fail(&b).await.ok();
        fail(&b).await.ok();

        tokio::time::sleep(Duration::from_millis(50)).await;

        // Trial call fails -> straight back to open
        assert!(matches!(fail(&b).await, Err(BreakerError::Inner(_))));
        assert_eq!(b.state(), CircuitState::Open);

        // Fresh window: an immediate call is rejected again
        let result = b.execute(|| async { Ok::<_, String>(1) }).await;
        assert!(matches!(result, Err(BreakerError::Open)));
    }

    #[tokio::test]
    async fn success_clears_failure_run_below_threshold() {
        let b = breaker(3, 60_000);
        fail(&b).await.ok();
        fail(&b).await.ok();
        assert_eq!(b.consecutive_failures(), 2);

        b.execute(|| async { Ok::<_, String>(()) }).await.unwrap();
        assert_eq!(b.consecutive_failures(), 0);

        // Two more failures still do not trip a threshold of three
        fail(&b).await.ok();
        fail(&b).await.ok();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn only_one_trial_passes_while_half_open() {
        let b = Arc::new(breaker(1, 10));
        fail(&b).await.ok();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel::<()>();

        let trial_breaker = b.clone();
        let trial = tokio::spawn(async move {
            trial_breaker
                .execute(|| async move {
                    entered_tx.send(()).ok();
                    release_rx.await.ok();
                    Ok::<_, String>(1)
                })
                .await
        });

        // Wait until the trial call is inside the breaker
        entered_rx.await.unwrap();

        // A concurrent call sees the breaker as still unavailable
        let concurrent = b.execute(|| async { Ok::<_, String>(2) }).await;
        assert!(matches!(concurrent, Err(BreakerError::Open)));

        release_tx.send(()).ok();
        assert_eq!(trial.await.unwrap().unwrap(), 1);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn breaker_error_maps_into_crate_error() {
        let open: BreakerError<crate::error::Error> = BreakerError::Open;
        assert!(matches!(
            crate::error::Error::from(open),
            crate::error::Error::CircuitOpen
        ));

        let inner: BreakerError<crate::error::Error> =
            BreakerError::Inner(crate::error::Error::ShuttingDown);
        assert!(matches!(
            crate::error::Error::from(inner),
            crate::error::Error::ShuttingDown
        ));
    }
}
