use async_trait::async_trait;
use conduit_types::{MessageKind, errors::ApplicationError};
use std::sync::Arc;

use crate::cqrs::RequestContext;

/// A message dispatched to exactly one handler, which produces a `Response`.
///
/// Commands change the state of the system: a plain command uses `()` as its
/// response, a command with a result uses any other type. Queries read state
/// and must override `KIND` with `MessageKind::Query`. At the dispatch layer
/// queries and commands with results are interchangeable.
pub trait Request: Send + Sync + 'static {
    /// The data type that the handler of this request returns.
    type Response: Send + 'static;

    const KIND: MessageKind = MessageKind::Command;
}

/// A trait for handlers that execute Requests.
/// Handlers should observe `ctx.cancellation()` around long suspension points.
#[async_trait]
pub trait RequestHandler<R: Request>: Send + Sync {
    async fn handle(&self, request: &R, ctx: &RequestContext)
    -> Result<R::Response, ApplicationError>;
}

// A single handler instance implementing several capabilities can be shared
// between registrations.
#[async_trait]
impl<R: Request, H: RequestHandler<R> + ?Sized> RequestHandler<R> for Arc<H> {
    async fn handle(
        &self,
        request: &R,
        ctx: &RequestContext,
    ) -> Result<R::Response, ApplicationError> {
        (**self).handle(request, ctx).await
    }
}
