use async_trait::async_trait;
use futures_util::FutureExt;
use std::{
    panic::{AssertUnwindSafe, resume_unwind},
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use conduit_types::errors::Result;

use crate::{
    config::Config,
    cqrs::RequestContext,
    pipeline::{AnyResponse, ErasedNext, GlobalBehavior, Priority},
};

/// Flags requests slower than a threshold. Never alters the outcome:
/// results pass through and panics are re-raised once timed.
#[derive(Debug, Clone)]
pub struct PerformanceBehavior {
    threshold: Duration,
}

impl PerformanceBehavior {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.slow_request_threshold)
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn is_slow(&self, elapsed: Duration) -> bool {
        elapsed > self.threshold
    }

    fn report(&self, ctx: &RequestContext, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        if self.is_slow(elapsed) {
            warn!(
                correlation_id = %ctx.correlation_id(),
                request = ctx.short_name(),
                elapsed_ms,
                threshold_ms = self.threshold.as_millis() as u64,
                "Slow request"
            );
        } else {
            debug!(
                correlation_id = %ctx.correlation_id(),
                request = ctx.short_name(),
                elapsed_ms,
                "Request timing"
            );
        }
    }
}

#[async_trait]
impl GlobalBehavior for PerformanceBehavior {
    async fn handle(&self, ctx: &RequestContext, next: ErasedNext<'_>) -> Result<AnyResponse> {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(next.run()).catch_unwind().await;
        self.report(ctx, started.elapsed());

        match outcome {
            Ok(result) => result,
            Err(panic) => resume_unwind(panic),
        }
    }

    fn priority(&self) -> Priority {
        Priority::PERFORMANCE
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures_util::FutureExt;
    use std::{
        panic::AssertUnwindSafe,
        sync::{Arc, atomic::AtomicU32},
    };
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        pipeline::{GlobalAdapter, Next, Pipeline, PipelineBehavior},
        test_utils::tests::{Ping, SleepyHandler},
    };

    fn ctx() -> RequestContext {
        RequestContext::for_request::<Ping>(CancellationToken::new())
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let behavior = PerformanceBehavior::new(Duration::from_millis(500));

        assert!(!behavior.is_slow(Duration::from_millis(500)));
        assert!(behavior.is_slow(Duration::from_millis(501)));
    }

    #[test]
    fn test_from_config() {
        let config = Config::default().with_slow_request_threshold(Duration::from_millis(42));

        assert_eq!(
            PerformanceBehavior::from_config(&config).threshold(),
            Duration::from_millis(42)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_request_keeps_its_result() {
        let pipeline = Pipeline::<Ping>::new(
            Arc::new(SleepyHandler::new(
                Duration::from_millis(50),
                Arc::new(AtomicU32::new(0)),
            )),
            vec![Arc::new(GlobalAdapter(Arc::new(PerformanceBehavior::new(
                Duration::from_millis(10),
            ))))],
        );

        let response = pipeline.execute(&Ping { id: 9 }, &ctx()).await.unwrap();

        assert_eq!(response, "slept 9");
    }

    struct PanickingBehavior;

    #[async_trait]
    impl PipelineBehavior<Ping> for PanickingBehavior {
        async fn handle(
            &self,
            _request: &Ping,
            _ctx: &RequestContext,
            _next: Next<'_, Ping>,
        ) -> Result<String> {
            panic!("downstream panic")
        }
    }

    #[tokio::test]
    async fn test_panics_are_reraised() {
        let pipeline = Pipeline::<Ping>::new(
            Arc::new(SleepyHandler::new(
                Duration::ZERO,
                Arc::new(AtomicU32::new(0)),
            )),
            vec![
                Arc::new(GlobalAdapter(Arc::new(PerformanceBehavior::new(
                    Duration::from_millis(10),
                )))),
                Arc::new(PanickingBehavior),
            ],
        );
        let ctx = ctx();

        let outcome = AssertUnwindSafe(pipeline.execute(&Ping { id: 1 }, &ctx))
            .catch_unwind()
            .await;

        assert!(outcome.is_err());
    }
}
