use crate::runtime::config::GulpConfig;
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Returned (through `anyhow`) when the token fires before an attempt or
/// during a backoff sleep.
#[derive(Debug)]
pub(crate) struct RetryCancelled;

impl std::fmt::Display for RetryCancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "retry cancelled")
    }
}

impl std::error::Error for RetryCancelled {}

/// How many times a chunk fetch is tried and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RetryPolicy {
    max_attempts: usize,
    initial_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub(crate) fn new(max_attempts: usize, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
        }
    }

    pub(crate) fn from_config(config: &GulpConfig) -> Self {
        Self::new(
            config.fetch_attempts(),
            config.initial_backoff(),
            config.max_backoff(),
        )
    }

    pub(crate) fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Waits between consecutive attempts: doubling from the initial delay,
    /// capped at the maximum. A zero initial delay grows to 1ms first.
    pub(crate) fn delays(&self) -> impl Iterator<Item = Duration> {
        let max_delay = self.max_delay;
        std::iter::successors(Some(self.initial_delay.min(max_delay)), move |current| {
            let next = if current.is_zero() {
                Duration::from_millis(1)
            } else {
                current.saturating_mul(2)
            };
            Some(next.min(max_delay))
        })
        .take(self.max_attempts - 1)
    }
}

pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

/// One failed attempt, as reported to the caller's logging hook.
pub(crate) struct FailedAttempt<'e> {
    pub number: usize,
    pub error: &'e anyhow::Error,
    /// Wait before the next attempt; `None` when this was the last one.
    pub next_delay: Option<Duration>,
}

/// Runs `operation` until it succeeds, `classify` aborts, the policy runs out
/// of attempts, or `cancel` fires. Cancellation is observed before each
/// attempt and while sleeping, never during an attempt.
pub(crate) async fn retry_with_backoff<T, F, Fut, C, L>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
    mut classify: C,
    mut on_failure: L,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
    C: FnMut(&anyhow::Error) -> RetryDisposition,
    L: FnMut(FailedAttempt<'_>),
{
    let mut delays = policy.delays();
    let mut number = 0;

    loop {
        number += 1;
        if cancel.is_cancelled() {
            return Err(RetryCancelled.into());
        }

        let err = match operation(number).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if let RetryDisposition::Abort = classify(&err) {
            return Err(err);
        }

        let next_delay = delays.next();
        on_failure(FailedAttempt {
            number,
            error: &err,
            next_delay,
        });

        match next_delay {
            Some(delay) => pause(delay, cancel).await?,
            None => return Err(err),
        }
    }
}

async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    tokio::select! {
        _ = cancel.cancelled() => Err(RetryCancelled.into()),
        _ = sleep(delay) => Ok(()),
    }
}
