//! Bounded retry with backoff.

use std::future::Future;
use std::time::Duration;

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Wait the same delay after every failed attempt.
    Fixed(Duration),
    /// Wait `step * attempt` after failed attempt number `attempt`.
    Linear { step: Duration },
}

impl Backoff {
    /// Delay to wait after the given one-based attempt fails.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Linear { step } => step.saturating_mul(attempt),
        }
    }
}

/// Maximum attempt count plus the backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

/// The successful outcome of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Every attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    /// A policy making at most `max_attempts` attempts (at least one).
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self::new(max_attempts, Backoff::Linear { step })
    }

    /// A single attempt, no retry.
    pub fn once() -> Self {
        Self::new(1, Backoff::None)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Runs `op` until it succeeds or the attempt bound is reached.
    ///
    /// `op` receives the one-based attempt number. No delay follows the last
    /// attempt.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<Retried<T>, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    });
                }
                Err(last_error) if attempt >= self.max_attempts => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error,
                    });
                }
                Err(_) => {
                    let delay = self.backoff.delay_after(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
