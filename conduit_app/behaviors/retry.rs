use async_trait::async_trait;
use futures_util::FutureExt;
use std::{panic::AssertUnwindSafe, time::Duration};
use tracing::{debug, warn};

use conduit_types::errors::{ApplicationError, Result};

use crate::{
    config::Config,
    cqrs::{Request, RequestContext},
    pipeline::{Next, PipelineBehavior, Priority, panic_message},
};

/// Re-runs the rest of the pipeline on transient failures, with a linear
/// backoff (`base_delay * attempt`) between attempts.
///
/// Deterministic failures (see `ApplicationError::is_transient`) are returned
/// as they are. When every attempt fails the last error is wrapped in
/// `RetryExhausted`. Waiting between attempts stops as soon as the call is
/// cancelled.
#[derive(Debug, Clone)]
pub struct RetryBehavior {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryBehavior {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.retry_max_attempts, config.retry_base_delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[async_trait]
impl<R: Request> PipelineBehavior<R> for RetryBehavior {
    async fn handle(
        &self,
        _request: &R,
        ctx: &RequestContext,
        next: Next<'_, R>,
    ) -> Result<R::Response> {
        let mut attempt = 1;
        loop {
            let result = match AssertUnwindSafe(next.run()).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(ApplicationError::handler_exception(panic_message(&*panic))),
            };

            let error = match result {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(
                            correlation_id = %ctx.correlation_id(),
                            request = ctx.short_name(),
                            attempt,
                            "Request succeeded after retrying"
                        );
                    }
                    return Ok(response);
                }
                Err(error) if !error.is_transient() => return Err(error),
                Err(error) => error,
            };

            if attempt >= self.max_attempts {
                warn!(
                    correlation_id = %ctx.correlation_id(),
                    request = ctx.short_name(),
                    attempts = attempt,
                    %error,
                    "Giving up on request"
                );
                return Err(ApplicationError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.delay_for(attempt);
            debug!(
                correlation_id = %ctx.correlation_id(),
                request = ctx.short_name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                %error,
                "Retrying request"
            );

            tokio::select! {
                _ = ctx.cancellation().cancelled() => return Err(ApplicationError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    fn priority(&self) -> Priority {
        Priority::RETRY
    }
}
