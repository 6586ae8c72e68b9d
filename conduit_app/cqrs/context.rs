use conduit_types::MessageKind;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cqrs::{Notification, Request};

/// Per-call data shared by every element of a pipeline.
/// It's created fresh for each dispatch and never shared between calls.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: Uuid,
    message_name: &'static str,
    kind: MessageKind,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn for_request<R: Request>(cancellation: CancellationToken) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            message_name: std::any::type_name::<R>(),
            kind: R::KIND,
            cancellation,
        }
    }

    pub fn for_notification<N: Notification>(cancellation: CancellationToken) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            message_name: std::any::type_name::<N>(),
            kind: MessageKind::Notification,
            cancellation,
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Fully qualified type name of the dispatched message.
    pub fn message_name(&self) -> &'static str {
        self.message_name
    }

    /// Type name without its module path, for log lines.
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.message_name)
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

pub(crate) fn short_type_name(name: &'static str) -> &'static str {
    // Generic arguments may contain paths too, so only look before the first `<`.
    let head = name.split('<').next().unwrap_or(name);
    match head.rfind("::") {
        Some(idx) => &name[idx + 2..],
        None => name,
    }
}
