use async_trait::async_trait;
use futures_util::FutureExt;
use std::{
    panic::{AssertUnwindSafe, resume_unwind},
    sync::Arc,
};
use tracing::{debug, error};

use conduit_types::{
    MessageKind,
    errors::{ApplicationError, Result},
};

use crate::{
    cqrs::{Request, RequestContext},
    pipeline::{Next, PipelineBehavior, Priority},
    uow::UnitOfWorkProvider,
};

/// Runs commands inside a unit of work: commit on success, rollback on
/// failure, panic or cancellation. Queries pass straight through.
///
/// Once the call's token fires the rest of the pipeline is dropped, so
/// nothing it does afterwards can land in the committed state.
pub struct TransactionBehavior {
    uow_provider: Arc<dyn UnitOfWorkProvider>,
}

impl TransactionBehavior {
    pub fn new(uow_provider: Arc<dyn UnitOfWorkProvider>) -> Self {
        Self { uow_provider }
    }
}

#[async_trait]
impl<R: Request> PipelineBehavior<R> for TransactionBehavior {
    async fn handle(
        &self,
        _request: &R,
        ctx: &RequestContext,
        next: Next<'_, R>,
    ) -> Result<R::Response> {
        if ctx.kind() != MessageKind::Command {
            return next.run().await;
        }

        if ctx.is_cancelled() {
            return Err(ApplicationError::Cancelled);
        }

        let uow = self.uow_provider.begin().await?;
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => None,
            outcome = AssertUnwindSafe(next.run()).catch_unwind() => Some(outcome),
        };

        match outcome {
            None => {
                if let Err(rollback_err) = uow.rollback().await {
                    error!(
                        correlation_id = %ctx.correlation_id(),
                        error = %rollback_err,
                        "Rollback after cancellation failed"
                    );
                }
                debug!(
                    correlation_id = %ctx.correlation_id(),
                    "Transaction rolled back on cancellation"
                );
                Err(ApplicationError::Cancelled)
            }
            Some(Ok(Ok(response))) => {
                uow.commit().await?;
                debug!(correlation_id = %ctx.correlation_id(), "Transaction committed");
                Ok(response)
            }
            Some(Ok(Err(err))) => {
                if let Err(rollback_err) = uow.rollback().await {
                    error!(
                        correlation_id = %ctx.correlation_id(),
                        error = %rollback_err,
                        "Rollback failed"
                    );
                }
                debug!(correlation_id = %ctx.correlation_id(), "Transaction rolled back");
                Err(err)
            }
            Some(Err(panic)) => {
                if let Err(rollback_err) = uow.rollback().await {
                    error!(
                        correlation_id = %ctx.correlation_id(),
                        error = %rollback_err,
                        "Rollback after panic failed"
                    );
                }
                resume_unwind(panic)
            }
        }
    }

    fn priority(&self) -> Priority {
        Priority::TRANSACTION
    }
}
