use std::sync::Arc;

use conduit_app::{
    HandlerModule, RegistryBuilder,
    behaviors::{
        CachingBehavior, RetryBehavior, Rules, TransactionBehavior, ValidationBehavior,
    },
    cache::CacheStore,
    config::Config,
    uow::UnitOfWorkProvider,
};
use conduit_types::errors::RegistryError;

use super::{
    AuditTrail, CreateUser, CreateUserCommandHandler, GetUser, GetUserQueryHandler,
    InMemoryUserStore, UserAuditHandler, UserCreated, WelcomeEmailHandler,
};

/// Everything the users capability needs, registered in one go.
pub struct UsersModule {
    pub store: Arc<InMemoryUserStore>,
    pub audit: Arc<AuditTrail>,
    pub cache: Arc<dyn CacheStore>,
    pub uow_provider: Arc<dyn UnitOfWorkProvider>,
    pub config: Arc<Config>,
}

impl UsersModule {
    fn create_user_rules() -> Rules<CreateUser> {
        Rules::<CreateUser>::new()
            .required("first_name", |c| &c.first_name)
            .max_len("first_name", |c| &c.first_name, 50)
            .required("last_name", |c| &c.last_name)
            .max_len("last_name", |c| &c.last_name, 50)
            .required("email", |c| &c.email)
            .email("email", |c| &c.email)
    }
}

impl HandlerModule for UsersModule {
    fn register(&self, builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
        builder
            .handler::<CreateUser, _>(CreateUserCommandHandler::new(self.store.clone()))?
            .behavior::<CreateUser, _>(
                ValidationBehavior::new().with(Self::create_user_rules()),
            )
            .behavior::<CreateUser, _>(TransactionBehavior::new(self.uow_provider.clone()));

        builder
            .handler::<GetUser, _>(GetUserQueryHandler::new(self.store.clone()))?
            .behavior::<GetUser, _>(CachingBehavior::<GetUser>::from_config(
                self.cache.clone(),
                &self.config,
            ))
            .behavior::<GetUser, _>(RetryBehavior::from_config(&self.config));

        builder
            .notification_handler::<UserCreated, _>(WelcomeEmailHandler::new(self.audit.clone()))
            .notification_handler::<UserCreated, _>(UserAuditHandler::new(self.audit.clone()));

        Ok(())
    }
}
