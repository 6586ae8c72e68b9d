use async_trait::async_trait;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::time::Instant;
use tracing::{Instrument, error, info, info_span, warn};

use conduit_types::errors::{ApplicationError, Result};

use crate::{
    cqrs::RequestContext,
    pipeline::{AnyResponse, ErasedNext, GlobalBehavior, Priority, panic_message},
};

/// Logs start and completion of every request inside a span carrying its
/// correlation id. A panic further down the pipeline is turned into a
/// `HANDLER_EXCEPTION` error here, so it never reaches the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingBehavior;

impl LoggingBehavior {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GlobalBehavior for LoggingBehavior {
    async fn handle(&self, ctx: &RequestContext, next: ErasedNext<'_>) -> Result<AnyResponse> {
        let span = info_span!(
            "request",
            correlation_id = %ctx.correlation_id(),
            request = ctx.short_name(),
            kind = %ctx.kind(),
        );

        async move {
            info!("Handling request");
            let started = Instant::now();

            let result = match AssertUnwindSafe(next.run()).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(&*panic);
                    error!(%message, "Pipeline panicked");
                    Err(ApplicationError::handler_exception(message))
                }
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(_) => info!(elapsed_ms, success = true, "Request handled"),
                Err(error) => warn!(
                    elapsed_ms,
                    success = false,
                    code = error.code(),
                    %error,
                    "Request failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }

    fn priority(&self) -> Priority {
        Priority::LOGGING
    }
}
