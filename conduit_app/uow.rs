use conduit_types::errors::ApplicationError;

/// A Unit of Work (UoW) groups everything a command does into a single
/// transaction, committed or rolled back as a whole.
#[async_trait::async_trait]
pub trait UnitOfWork: Send + Sync {
    // Consume self to ensure the UoW is not used after commit/rollback
    async fn commit(self: Box<Self>) -> Result<(), ApplicationError>;
    async fn rollback(self: Box<Self>) -> Result<(), ApplicationError>;
}

/// A factory for creating Unit of Work instances.
#[async_trait::async_trait]
pub trait UnitOfWorkProvider: Send + Sync {
    /// Begin a new Unit of Work (transaction).
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, ApplicationError>;
}
