use futures_util::{FutureExt, future::join_all};
use std::{
    any::type_name, future::Future, panic::AssertUnwindSafe, pin::Pin, sync::Arc,
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use conduit_types::errors::{ApplicationError, Result};

use crate::{
    config::Config,
    cqrs::{Notification, Request, RequestContext},
    pipeline::panic_message,
    registry::Registry,
};

/// Outcome of a `publish`: every handler ran, some may have failed.
#[derive(Debug, Default)]
pub struct PublishReport {
    /// Number of handlers invoked.
    pub handled: usize,
    /// Errors of the handlers that failed, in registration order.
    pub failures: Vec<ApplicationError>,
}

impl PublishReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.handled - self.failures.len()
    }
}

/// Mediator
/// This struct is the central entry point for all application logic.
/// It does not contain any business logic itself: it resolves the pipeline of
/// a message from the registry, runs it and hands back the result.
///
/// It holds no per-call state, so a single instance can serve any number of
/// concurrent calls.
pub struct Mediator {
    registry: Arc<Registry>,
    config: Arc<Config>,
}

impl Mediator {
    pub fn new(registry: Arc<Registry>, config: Arc<Config>) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Sends a request to its handler, through its pipeline.
    /// The configured default timeout applies, if any.
    pub async fn send<R: Request>(&self, request: R) -> Result<R::Response> {
        match self.config.default_timeout {
            Some(timeout) => self.send_with_timeout(request, timeout).await,
            None => self.dispatch(&request, CancellationToken::new()).await,
        }
    }

    /// Like `send`, but gives up after `timeout` with a `Timeout` error.
    ///
    /// The call's cancellation token fires first, and the pipeline gets the
    /// configured grace period to observe it (a transaction rolls back, for
    /// instance) before it is dropped.
    pub async fn send_with_timeout<R: Request>(
        &self,
        request: R,
        timeout: Duration,
    ) -> Result<R::Response> {
        let token = CancellationToken::new();
        let call = self.dispatch(&request, token.clone());
        tokio::pin!(call);

        tokio::select! {
            biased;
            result = &mut call => return result,
            _ = tokio::time::sleep(timeout) => {}
        }

        warn!(
            request = type_name::<R>(),
            timeout_ms = timeout.as_millis() as u64,
            "Request timed out"
        );
        token.cancel();
        self.wind_down(type_name::<R>(), call).await;
        Err(ApplicationError::Timeout(timeout))
    }

    /// Like `send`, but aborts with `Cancelled` as soon as `token` fires.
    /// The pipeline sees the cancellation and gets the same grace period as
    /// on a timeout.
    pub async fn send_with_cancellation<R: Request>(
        &self,
        request: R,
        token: CancellationToken,
    ) -> Result<R::Response> {
        if token.is_cancelled() {
            return Err(ApplicationError::Cancelled);
        }

        let call = self.dispatch(&request, token.child_token());
        tokio::pin!(call);

        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            result = &mut call => return result,
        }

        debug!(request = type_name::<R>(), "Request cancelled by caller");
        self.wind_down(type_name::<R>(), call).await;
        Err(ApplicationError::Cancelled)
    }

    /// Delivers a notification to all of its handlers, concurrently.
    ///
    /// Publishing never fails: handlers that return an error or panic are
    /// logged and reported, and never stop the other handlers from running.
    pub async fn publish<N: Notification>(&self, notification: N) -> PublishReport {
        let handlers = self.registry.resolve_notification_handlers::<N>();
        if handlers.is_empty() {
            debug!(notification = type_name::<N>(), "No handlers for notification");
            return PublishReport::default();
        }

        let ctx = RequestContext::for_notification::<N>(CancellationToken::new());
        let outcomes = join_all(
            handlers
                .iter()
                .map(|handler| AssertUnwindSafe(handler.handle(&notification, &ctx)).catch_unwind()),
        )
        .await;

        let mut report = PublishReport {
            handled: handlers.len(),
            failures: Vec::new(),
        };

        for (index, outcome) in outcomes.into_iter().enumerate() {
            let result = outcome.unwrap_or_else(|panic| {
                Err(ApplicationError::handler_exception(panic_message(&*panic)))
            });

            if let Err(error) = result {
                warn!(
                    correlation_id = %ctx.correlation_id(),
                    notification = ctx.short_name(),
                    handler = index,
                    %error,
                    "Notification handler failed"
                );
                report.failures.push(error);
            }
        }

        debug!(
            correlation_id = %ctx.correlation_id(),
            notification = ctx.short_name(),
            handled = report.handled,
            failed = report.failures.len(),
            "Notification published"
        );
        report
    }

    async fn dispatch<R: Request>(
        &self,
        request: &R,
        cancellation: CancellationToken,
    ) -> Result<R::Response> {
        let Some(pipeline) = self.registry.pipeline::<R>() else {
            warn!(request = type_name::<R>(), "No handler registered");
            return Err(ApplicationError::HandlerNotFound(type_name::<R>()));
        };

        let ctx = RequestContext::for_request::<R>(cancellation);
        match AssertUnwindSafe(pipeline.execute(request, &ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(
                    correlation_id = %ctx.correlation_id(),
                    request = ctx.short_name(),
                    %message,
                    "Request pipeline panicked"
                );
                Err(ApplicationError::handler_exception(message))
            }
        }
    }

    /// Keeps polling a cancelled call for at most the grace period.
    async fn wind_down<F, T>(&self, request: &'static str, call: Pin<&mut F>)
    where
        F: Future<Output = Result<T>>,
    {
        let grace = self.config.cancellation_grace;
        match tokio::time::timeout(grace, call).await {
            Ok(outcome) => debug!(request, ok = outcome.is_ok(), "Cancelled request wound down"),
            Err(_) => warn!(
                request,
                grace_ms = grace.as_millis() as u64,
                "Cancelled request still running after grace period, dropping it"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };
    use tokio::time::Instant;

    use super::*;
    use crate::{
        cqrs::RequestHandler,
        registry::Registry,
        test_utils::tests::{
            Announce, FailingNotificationHandler, Journal, JournalHandler,
            JournalNotificationHandler, Lookup, PanickingBehavior, PanickingNotificationHandler,
            Ping, RecordingBehavior, SleepyHandler, entries, journal,
        },
    };

    /// Waits for the call to be cancelled and notes it.
    struct CancellationObserver(Journal);

    #[async_trait]
    impl RequestHandler<Ping> for CancellationObserver {
        async fn handle(&self, _request: &Ping, ctx: &RequestContext) -> Result<String> {
            ctx.cancellation().cancelled().await;
            self.0.lock().unwrap().push("cancelled".to_string());
            Err(ApplicationError::Cancelled)
        }
    }

    /// Ignores cancellation and takes a long time.
    struct StubbornHandler(Arc<AtomicU32>);

    #[async_trait]
    impl RequestHandler<Ping> for StubbornHandler {
        async fn handle(&self, request: &Ping, _ctx: &RequestContext) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("late {}", request.id))
        }
    }

    fn mediator(registry: Registry) -> Mediator {
        Mediator::new(Arc::new(registry), Arc::new(Config::default()))
    }

    #[tokio::test]
    async fn test_send_runs_pipeline() {
        let log = journal();
        let mut builder = Registry::builder();
        builder
            .handler::<Ping, _>(JournalHandler::new(log.clone()))
            .unwrap()
            .behavior::<Ping, _>(RecordingBehavior::new("A", log.clone()))
            .behavior::<Ping, _>(RecordingBehavior::new("B", log.clone()))
            .behavior::<Ping, _>(RecordingBehavior::new("C", log.clone()));
        let mediator = mediator(builder.build());

        let response = mediator.send(Ping { id: 5 }).await.unwrap();

        assert_eq!(response, "pong 5");
        assert_eq!(
            entries(&log),
            vec!["A-pre", "B-pre", "C-pre", "handler", "C-post", "B-post", "A-post"]
        );
    }

    #[tokio::test]
    async fn test_send_without_handler_fails() {
        let mediator = mediator(Registry::builder().build());

        let err = mediator.send(Lookup { id: 1 }).await.unwrap_err();

        assert_eq!(err.code(), "HANDLER_NOT_FOUND");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_with_timeout_gives_up_early() {
        let observed = Arc::new(AtomicU32::new(0));
        let mut builder = Registry::builder();
        builder
            .handler::<Ping, _>(SleepyHandler::new(Duration::from_millis(100), observed.clone()))
            .unwrap();
        let mediator = mediator(builder.build());

        let started = Instant::now();
        let err = mediator
            .send_with_timeout(Ping { id: 1 }, Duration::from_millis(10))
            .await
            .unwrap_err();

        assert_eq!(err, ApplicationError::Timeout(Duration::from_millis(10)));
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_applies_to_send() {
        let observed = Arc::new(AtomicU32::new(0));
        let mut builder = Registry::builder();
        builder
            .handler::<Ping, _>(SleepyHandler::new(Duration::from_secs(5), observed))
            .unwrap();
        let config = Config::default().with_default_timeout(Duration::from_millis(50));
        let mediator = Mediator::new(Arc::new(builder.build()), Arc::new(config));

        let err = mediator.send(Ping { id: 1 }).await.unwrap_err();

        assert_eq!(err.code(), "TIMEOUT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_completes_within_timeout() {
        let observed = Arc::new(AtomicU32::new(0));
        let mut builder = Registry::builder();
        builder
            .handler::<Ping, _>(SleepyHandler::new(Duration::from_millis(5), observed))
            .unwrap();
        let mediator = mediator(builder.build());

        let response = mediator
            .send_with_timeout(Ping { id: 2 }, Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(response, "slept 2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation_aborts_call() {
        let observed = Arc::new(AtomicU32::new(0));
        let mut builder = Registry::builder();
        builder
            .handler::<Ping, _>(SleepyHandler::new(Duration::from_secs(5), observed))
            .unwrap();
        let mediator = mediator(builder.build());
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            })
        };

        let err = mediator
            .send_with_cancellation(Ping { id: 1 }, token)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert_eq!(err, ApplicationError::Cancelled);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_never_dispatches() {
        let log = journal();
        let mut builder = Registry::builder();
        builder.handler::<Ping, _>(JournalHandler::new(log.clone())).unwrap();
        let mediator = mediator(builder.build());
        let token = CancellationToken::new();
        token.cancel();

        let err = mediator
            .send_with_cancellation(Ping { id: 1 }, token)
            .await
            .unwrap_err();

        assert_eq!(err, ApplicationError::Cancelled);
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn test_panicking_behavior_is_reported_without_global_behaviors() {
        let log = journal();
        let mut builder = Registry::builder();
        builder
            .handler::<Ping, _>(JournalHandler::new(log.clone()))
            .unwrap()
            .behavior::<Ping, _>(PanickingBehavior);
        let mediator = mediator(builder.build());

        let err = mediator.send(Ping { id: 1 }).await.unwrap_err();

        assert_eq!(err.code(), "HANDLER_EXCEPTION");
        assert!(err.to_string().contains("behavior exploded"));
        assert!(entries(&log).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_observed_by_the_handler() {
        let log = journal();
        let mut builder = Registry::builder();
        builder
            .handler::<Ping, _>(CancellationObserver(log.clone()))
            .unwrap();
        let mediator = mediator(builder.build());

        let err = mediator
            .send_with_timeout(Ping { id: 1 }, Duration::from_millis(10))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "TIMEOUT");
        assert_eq!(entries(&log), vec!["cancelled"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stubborn_handler_is_dropped_after_grace_period() {
        let observed = Arc::new(AtomicU32::new(0));
        let mut builder = Registry::builder();
        builder
            .handler::<Ping, _>(StubbornHandler(observed.clone()))
            .unwrap();
        let config = Config::default().with_cancellation_grace(Duration::from_millis(20));
        let mediator = Mediator::new(Arc::new(builder.build()), Arc::new(config));

        let started = Instant::now();
        let err = mediator
            .send_with_timeout(Ping { id: 1 }, Duration::from_millis(10))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "TIMEOUT");
        assert!(started.elapsed() < Duration::from_millis(100));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(observed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_publish_without_handlers_completes() {
        let mediator = mediator(Registry::builder().build());

        let report = mediator.publish(Announce { text: "hi".into() }).await;

        assert_eq!(report.handled, 0);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_publish_reaches_every_handler_despite_failures() {
        let log = journal();
        let mut builder = Registry::builder();
        builder
            .notification_handler::<Announce, _>(JournalNotificationHandler::new("first", log.clone()))
            .notification_handler::<Announce, _>(FailingNotificationHandler)
            .notification_handler::<Announce, _>(PanickingNotificationHandler)
            .notification_handler::<Announce, _>(JournalNotificationHandler::new("last", log.clone()));
        let mediator = mediator(builder.build());

        let report = mediator.publish(Announce { text: "hi".into() }).await;

        assert_eq!(report.handled, 4);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[1].code(), "HANDLER_EXCEPTION");

        let mut seen = entries(&log);
        seen.sort();
        assert_eq!(seen, vec!["first: hi", "last: hi"]);
    }

    #[tokio::test]
    async fn test_concurrent_sends_share_one_mediator() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut builder = Registry::builder();
        builder
            .handler::<Lookup, _>(crate::test_utils::tests::LookupHandler::new(calls.clone()))
            .unwrap();
        let mediator = Arc::new(mediator(builder.build()));

        let tasks: Vec<_> = (0..16)
            .map(|id| {
                let mediator = mediator.clone();
                tokio::spawn(async move { mediator.send(Lookup { id }).await })
            })
            .collect();

        for (id, task) in tasks.into_iter().enumerate() {
            let item = task.await.unwrap().unwrap();
            assert_eq!(item.id, id as u32);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 16);
    }
}
