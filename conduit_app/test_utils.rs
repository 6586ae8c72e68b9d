#[cfg(any(test, feature = "test-utils"))]
#[cfg(not(tarpaulin_include))]
pub mod tests {
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    use conduit_types::{
        MessageKind,
        errors::{ApplicationError, FieldError, Result},
    };

    use crate::{
        cqrs::{Notification, NotificationHandler, Request, RequestContext, RequestHandler},
        pipeline::{AnyResponse, ErasedNext, GlobalBehavior, Next, PipelineBehavior, Priority},
        uow::{UnitOfWork, UnitOfWorkProvider},
    };

    /// Shared, ordered record of what ran during a test.
    pub type Journal = Arc<Mutex<Vec<String>>>;

    pub fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    fn record(journal: &Journal, entry: impl Into<String>) {
        journal.lock().unwrap().push(entry.into());
    }

    // Messages

    #[derive(Debug, Clone, Serialize)]
    pub struct Ping {
        pub id: u32,
    }

    impl Request for Ping {
        type Response = String;
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct Lookup {
        pub id: u32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Item {
        pub id: u32,
        pub name: String,
    }

    impl Request for Lookup {
        type Response = Item;
        const KIND: MessageKind = MessageKind::Query;
    }

    #[derive(Debug, Clone)]
    pub struct Save {
        pub name: String,
    }

    impl Request for Save {
        type Response = ();
    }

    #[derive(Debug, Clone)]
    pub struct Announce {
        pub text: String,
    }

    impl Notification for Announce {}

    // Request handlers

    pub struct JournalHandler {
        journal: Journal,
    }

    impl JournalHandler {
        pub fn new(journal: Journal) -> Self {
            Self { journal }
        }
    }

    #[async_trait]
    impl RequestHandler<Ping> for JournalHandler {
        async fn handle(&self, request: &Ping, _ctx: &RequestContext) -> Result<String> {
            record(&self.journal, "handler");
            Ok(format!("pong {}", request.id))
        }
    }

    pub struct LookupHandler {
        calls: Arc<AtomicU32>,
    }

    impl LookupHandler {
        pub fn new(calls: Arc<AtomicU32>) -> Self {
            Self { calls }
        }
    }

    #[async_trait]
    impl RequestHandler<Lookup> for LookupHandler {
        async fn handle(&self, request: &Lookup, _ctx: &RequestContext) -> Result<Item> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Item {
                id: request.id,
                name: format!("item {}", request.id),
            })
        }
    }

    pub struct PanickingHandler;

    #[async_trait]
    impl RequestHandler<Ping> for PanickingHandler {
        async fn handle(&self, _request: &Ping, _ctx: &RequestContext) -> Result<String> {
            panic!("boom")
        }
    }

    /// Fails with a transient error for the first `failures` calls.
    pub struct FlakyHandler {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    impl FlakyHandler {
        pub fn new(failures: u32, calls: Arc<AtomicU32>) -> Self {
            Self { failures, calls }
        }
    }

    #[async_trait]
    impl RequestHandler<Ping> for FlakyHandler {
        async fn handle(&self, request: &Ping, _ctx: &RequestContext) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(ApplicationError::generic(
                    "DB_DOWN",
                    format!("connection refused (call {call})"),
                ));
            }
            Ok(format!("pong {}", request.id))
        }
    }

    /// Always fails with the same error.
    pub struct FailingHandler {
        error: ApplicationError,
        calls: Arc<AtomicU32>,
    }

    impl FailingHandler {
        pub fn new(error: ApplicationError, calls: Arc<AtomicU32>) -> Self {
            Self { error, calls }
        }
    }

    #[async_trait]
    impl RequestHandler<Ping> for FailingHandler {
        async fn handle(&self, _request: &Ping, _ctx: &RequestContext) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    /// Sleeps for `delay` unless the call is cancelled first; `completed`
    /// only moves if the sleep finished.
    pub struct SleepyHandler {
        delay: Duration,
        completed: Arc<AtomicU32>,
    }

    impl SleepyHandler {
        pub fn new(delay: Duration, completed: Arc<AtomicU32>) -> Self {
            Self { delay, completed }
        }
    }

    #[async_trait]
    impl RequestHandler<Ping> for SleepyHandler {
        async fn handle(&self, request: &Ping, ctx: &RequestContext) -> Result<String> {
            tokio::select! {
                _ = ctx.cancellation().cancelled() => Err(ApplicationError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {
                    self.completed.fetch_add(1, Ordering::SeqCst);
                    Ok(format!("slept {}", request.id))
                }
            }
        }
    }

    pub struct SaveHandler {
        journal: Journal,
        fail: bool,
        delay: Duration,
    }

    impl SaveHandler {
        pub fn new(journal: Journal) -> Self {
            Self {
                journal,
                fail: false,
                delay: Duration::ZERO,
            }
        }

        pub fn failing(journal: Journal) -> Self {
            Self {
                fail: true,
                ..Self::new(journal)
            }
        }

        /// Takes `delay` before writing, without looking at cancellation.
        pub fn slow(journal: Journal, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(journal)
            }
        }
    }

    #[async_trait]
    impl RequestHandler<Save> for SaveHandler {
        async fn handle(&self, request: &Save, _ctx: &RequestContext) -> Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            record(&self.journal, format!("save {}", request.name));
            if self.fail {
                return Err(ApplicationError::generic("DB_DOWN", "write failed"));
            }
            Ok(())
        }
    }

    // Behaviors

    /// Records `{label}-pre` and `{label}-post` around the rest of the pipeline.
    pub struct RecordingBehavior {
        label: &'static str,
        journal: Journal,
    }

    impl RecordingBehavior {
        pub fn new(label: &'static str, journal: Journal) -> Self {
            Self { label, journal }
        }
    }

    #[async_trait]
    impl<R: Request> PipelineBehavior<R> for RecordingBehavior {
        async fn handle(
            &self,
            _request: &R,
            _ctx: &RequestContext,
            next: Next<'_, R>,
        ) -> Result<R::Response> {
            record(&self.journal, format!("{}-pre", self.label));
            let result = next.run().await;
            record(&self.journal, format!("{}-post", self.label));
            result
        }

        fn name(&self) -> &'static str {
            self.label
        }
    }

    pub struct RecordingGlobal {
        label: &'static str,
        priority: Priority,
        journal: Journal,
    }

    impl RecordingGlobal {
        pub fn new(label: &'static str, priority: Priority, journal: Journal) -> Self {
            Self {
                label,
                priority,
                journal,
            }
        }
    }

    #[async_trait]
    impl GlobalBehavior for RecordingGlobal {
        async fn handle(&self, _ctx: &RequestContext, next: ErasedNext<'_>) -> Result<AnyResponse> {
            record(&self.journal, format!("{}-pre", self.label));
            let result = next.run().await;
            record(&self.journal, format!("{}-post", self.label));
            result
        }

        fn priority(&self) -> Priority {
            self.priority
        }

        fn name(&self) -> &'static str {
            self.label
        }
    }

    /// Short-circuits every request with a validation error.
    pub struct RejectingBehavior;

    #[async_trait]
    impl<R: Request> PipelineBehavior<R> for RejectingBehavior {
        async fn handle(
            &self,
            _request: &R,
            _ctx: &RequestContext,
            _next: Next<'_, R>,
        ) -> Result<R::Response> {
            Err(ApplicationError::Validation(vec![FieldError::new(
                "request",
                "is rejected",
            )]))
        }
    }

    pub struct PanickingBehavior;

    #[async_trait]
    impl<R: Request> PipelineBehavior<R> for PanickingBehavior {
        async fn handle(
            &self,
            _request: &R,
            _ctx: &RequestContext,
            _next: Next<'_, R>,
        ) -> Result<R::Response> {
            panic!("behavior exploded")
        }
    }

    // Unit of work

    pub struct MockUnitOfWork {
        journal: Journal,
    }

    #[async_trait]
    impl UnitOfWork for MockUnitOfWork {
        async fn commit(self: Box<Self>) -> Result<(), ApplicationError> {
            record(&self.journal, "commit");
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<(), ApplicationError> {
            record(&self.journal, "rollback");
            Ok(())
        }
    }

    /// Records `begin`, `commit` and `rollback` in its journal.
    pub struct MockUnitOfWorkProvider {
        journal: Journal,
    }

    impl MockUnitOfWorkProvider {
        pub fn new(journal: Journal) -> Self {
            Self { journal }
        }
    }

    #[async_trait]
    impl UnitOfWorkProvider for MockUnitOfWorkProvider {
        async fn begin(&self) -> Result<Box<dyn UnitOfWork>, ApplicationError> {
            record(&self.journal, "begin");
            Ok(Box::new(MockUnitOfWork {
                journal: self.journal.clone(),
            }))
        }
    }

    // Notification handlers

    pub struct JournalNotificationHandler {
        label: &'static str,
        journal: Journal,
    }

    impl JournalNotificationHandler {
        pub fn new(label: &'static str, journal: Journal) -> Self {
            Self { label, journal }
        }
    }

    #[async_trait]
    impl NotificationHandler<Announce> for JournalNotificationHandler {
        async fn handle(&self, notification: &Announce, _ctx: &RequestContext) -> Result<()> {
            record(&self.journal, format!("{}: {}", self.label, notification.text));
            Ok(())
        }
    }

    pub struct FailingNotificationHandler;

    #[async_trait]
    impl NotificationHandler<Announce> for FailingNotificationHandler {
        async fn handle(&self, _notification: &Announce, _ctx: &RequestContext) -> Result<()> {
            Err(ApplicationError::generic("SMTP_DOWN", "mail server unreachable"))
        }
    }

    pub struct PanickingNotificationHandler;

    #[async_trait]
    impl NotificationHandler<Announce> for PanickingNotificationHandler {
        async fn handle(&self, _notification: &Announce, _ctx: &RequestContext) -> Result<()> {
            panic!("notification boom")
        }
    }
}
