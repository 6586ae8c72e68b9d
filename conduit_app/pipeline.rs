use async_trait::async_trait;
use futures_util::{FutureExt, future::BoxFuture};
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use conduit_types::errors::{ApplicationError, Result};

use crate::cqrs::{Request, RequestContext, RequestHandler, short_type_name};

/// Response of a request once its concrete type has been erased.
pub type AnyResponse = Box<dyn Any + Send>;

/// Position of a behavior in a pipeline: lower values wrap higher ones.
/// Behaviors with the same priority keep global-first, then registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i16);

impl Priority {
    pub const LOGGING: Self = Self(-300);
    pub const PERFORMANCE: Self = Self(-200);
    pub const VALIDATION: Self = Self(-100);
    pub const DEFAULT: Self = Self(0);
    pub const CACHING: Self = Self(100);
    pub const RETRY: Self = Self(200);
    pub const TRANSACTION: Self = Self(300);
}

/// A pipeline element wrapping the handler of one request type.
///
/// A behavior either calls `next.run()` (optionally post-processing its
/// result) or short-circuits by returning without calling it.
#[async_trait]
pub trait PipelineBehavior<R: Request>: Send + Sync {
    async fn handle(
        &self,
        request: &R,
        ctx: &RequestContext,
        next: Next<'_, R>,
    ) -> Result<R::Response>;

    fn priority(&self) -> Priority {
        Priority::DEFAULT
    }

    fn name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }
}

/// A pipeline element wrapping the handler of every request type.
///
/// It only sees the request context and an erased continuation, which is
/// enough for concerns that don't depend on the request payload.
#[async_trait]
pub trait GlobalBehavior: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, next: ErasedNext<'_>) -> Result<AnyResponse>;

    fn priority(&self) -> Priority {
        Priority::DEFAULT
    }

    fn name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }
}

/// The rest of the pipeline, from the point of view of a behavior.
///
/// `Next` is `Copy`: calling `run` more than once re-executes everything
/// downstream, which is what retrying behaviors rely on.
pub struct Next<'a, R: Request> {
    request: &'a R,
    ctx: &'a RequestContext,
    behaviors: &'a [Arc<dyn PipelineBehavior<R>>],
    handler: &'a dyn RequestHandler<R>,
}

impl<R: Request> Clone for Next<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R: Request> Copy for Next<'_, R> {}

impl<'a, R: Request> Next<'a, R> {
    pub async fn run(self) -> Result<R::Response> {
        match self.behaviors.split_first() {
            Some((behavior, rest)) => {
                let next = Next {
                    behaviors: rest,
                    ..self
                };
                behavior.handle(self.request, self.ctx, next).await
            }
            None => invoke_handler(self.handler, self.request, self.ctx).await,
        }
    }
}

trait ErasedRun: Send + Sync {
    fn run_erased(&self) -> BoxFuture<'_, Result<AnyResponse>>;
}

impl<R: Request> ErasedRun for Next<'_, R> {
    fn run_erased(&self) -> BoxFuture<'_, Result<AnyResponse>> {
        let next = *self;
        Box::pin(async move {
            next.run()
                .await
                .map(|response| Box::new(response) as AnyResponse)
        })
    }
}

/// Type-erased `Next`, handed to global behaviors.
#[derive(Clone, Copy)]
pub struct ErasedNext<'a> {
    inner: &'a dyn ErasedRun,
}

impl<'a> ErasedNext<'a> {
    fn new<R: Request>(next: &'a Next<'_, R>) -> Self {
        Self { inner: next }
    }

    pub async fn run(self) -> Result<AnyResponse> {
        self.inner.run_erased().await
    }
}

/// Lets a global behavior sit in the typed chain of any request.
pub(crate) struct GlobalAdapter(pub(crate) Arc<dyn GlobalBehavior>);

#[async_trait]
impl<R: Request> PipelineBehavior<R> for GlobalAdapter {
    async fn handle(
        &self,
        _request: &R,
        ctx: &RequestContext,
        next: Next<'_, R>,
    ) -> Result<R::Response> {
        let response = self.0.handle(ctx, ErasedNext::new(&next)).await?;

        response
            .downcast::<R::Response>()
            .map(|response| *response)
            .map_err(|_| {
                ApplicationError::generic(
                    "RESPONSE_TYPE_MISMATCH",
                    format!(
                        "{} returned a response that doesn't belong to {}",
                        self.0.name(),
                        ctx.message_name()
                    ),
                )
            })
    }

    fn priority(&self) -> Priority {
        self.0.priority()
    }

    fn name(&self) -> &'static str {
        self.0.name()
    }
}

/// The ordered chain of behaviors of one request type, ending in its handler.
///
/// Built once when the registry is built. Behaviors `[A, B, C]` run as
/// `A -> B -> C -> handler` and unwind as `C -> B -> A`.
pub struct Pipeline<R: Request> {
    behaviors: Vec<Arc<dyn PipelineBehavior<R>>>,
    handler: Arc<dyn RequestHandler<R>>,
}

impl<R: Request> Pipeline<R> {
    pub fn new(
        handler: Arc<dyn RequestHandler<R>>,
        behaviors: Vec<Arc<dyn PipelineBehavior<R>>>,
    ) -> Self {
        Self { behaviors, handler }
    }

    pub fn handler(&self) -> &Arc<dyn RequestHandler<R>> {
        &self.handler
    }

    pub async fn execute(&self, request: &R, ctx: &RequestContext) -> Result<R::Response> {
        Next {
            request,
            ctx,
            behaviors: &self.behaviors,
            handler: self.handler.as_ref(),
        }
        .run()
        .await
    }
}

/// Terminal element of every pipeline. A panicking handler never escapes:
/// it becomes a `HANDLER_EXCEPTION` error.
async fn invoke_handler<R: Request>(
    handler: &dyn RequestHandler<R>,
    request: &R,
    ctx: &RequestContext,
) -> Result<R::Response> {
    match AssertUnwindSafe(handler.handle(request, ctx))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(&*panic);
            tracing::error!(
                correlation_id = %ctx.correlation_id(),
                request = ctx.short_name(),
                %message,
                "Handler panicked"
            );
            Err(ApplicationError::handler_exception(message))
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
