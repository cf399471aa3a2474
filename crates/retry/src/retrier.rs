use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{RetryError, RetryPolicy, Retryable};

/// Per-call bookkeeping, created fresh for every [`Retrier::execute`].
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub operation: String,
    /// 1-based number of the attempt that ran last.
    pub attempt: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl RetryContext {
    fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            attempt: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.last_attempt_at = Some(Utc::now());
    }
}

/// A successful result plus how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Runs fallible async operations under a [`RetryPolicy`].
///
/// An optional shutdown token interrupts backoff waits; an interrupted wait
/// ends the call with [`RetryError::Interrupted`] instead of trying again.
#[derive(Debug, Clone, Default)]
pub struct Retrier {
    shutdown: Option<CancellationToken>,
}

impl Retrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a retrier whose waits end early when `shutdown` is cancelled.
    pub fn with_shutdown(shutdown: CancellationToken) -> Self {
        Self {
            shutdown: Some(shutdown),
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// policy's attempt budget is spent.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        op: F,
    ) -> Result<Attempted<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::error::Error + 'static,
    {
        self.execute_with_callback(operation, policy, op, |_, _, _| {})
            .await
    }

    /// Like [`execute`](Self::execute), calling `on_retry` with the context,
    /// the upcoming wait and the last error before every backoff wait.
    pub async fn execute_with_callback<T, E, F, Fut, C>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        mut op: F,
        mut on_retry: C,
    ) -> Result<Attempted<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::error::Error + 'static,
        C: FnMut(&RetryContext, Duration, &E),
    {
        let max_attempts = policy.attempts();
        let mut ctx = RetryContext::new(operation);

        loop {
            ctx.begin_attempt();
            let err = match op().await {
                Ok(value) => {
                    if ctx.attempt > 1 {
                        debug!(operation, attempts = ctx.attempt, "operation succeeded after retry");
                    }
                    return Ok(Attempted {
                        value,
                        attempts: ctx.attempt,
                    });
                }
                Err(err) => err,
            };
            ctx.last_error = Some(err.to_string());

            if !err.is_retryable() {
                warn!(operation, attempt = ctx.attempt, error = %err, "non-retryable failure");
                return Err(RetryError::Aborted {
                    operation: ctx.operation,
                    attempts: ctx.attempt,
                    source: err,
                });
            }

            if ctx.attempt >= max_attempts {
                error!(operation, attempts = ctx.attempt, error = %err, "retry budget exhausted");
                return Err(RetryError::Exhausted {
                    operation: ctx.operation,
                    attempts: ctx.attempt,
                    source: err,
                });
            }

            let delay = policy.delay_before_attempt(ctx.attempt + 1);
            debug!(
                operation,
                attempt = ctx.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, backing off"
            );
            on_retry(&ctx, delay, &err);

            if !self.wait(delay).await {
                warn!(operation, attempts = ctx.attempt, "retry wait interrupted");
                return Err(RetryError::Interrupted {
                    operation: ctx.operation,
                    attempts: ctx.attempt,
                });
            }
        }
    }

    /// Sleeps for `delay`. Returns `false` if shutdown fired first.
    async fn wait(&self, delay: Duration) -> bool {
        match &self.shutdown {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => false,
                    _ = tokio::time::sleep(delay) => true,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}
