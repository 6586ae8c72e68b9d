use async_trait::async_trait;
use conduit_types::errors::ApplicationError;
use std::sync::Arc;

use crate::cqrs::RequestContext;

/// A marker trait for Notification structs.
/// Notifications are broadcast to every registered handler and have no response.
pub trait Notification: Send + Sync + 'static {}

/// A trait for handlers reacting to Notifications.
/// A failing handler never prevents the others from running.
#[async_trait]
pub trait NotificationHandler<N: Notification>: Send + Sync {
    async fn handle(&self, notification: &N, ctx: &RequestContext)
    -> Result<(), ApplicationError>;
}

#[async_trait]
impl<N: Notification, H: NotificationHandler<N> + ?Sized> NotificationHandler<N> for Arc<H> {
    async fn handle(&self, notification: &N, ctx: &RequestContext) -> Result<(), ApplicationError> {
        (**self).handle(notification, ctx).await
    }
}
