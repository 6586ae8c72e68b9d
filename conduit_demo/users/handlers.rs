use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

use conduit_app::cqrs::{NotificationHandler, RequestContext, RequestHandler};
use conduit_types::errors::{ApplicationError, Result};

use super::{AuditTrail, CreateUser, GetUser, InMemoryUserStore, UserCreated, UserDto};

pub struct CreateUserCommandHandler {
    store: Arc<InMemoryUserStore>,
}

impl CreateUserCommandHandler {
    pub fn new(store: Arc<InMemoryUserStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestHandler<CreateUser> for CreateUserCommandHandler {
    #[instrument(skip_all, fields(email = %command.email))]
    async fn handle(&self, command: &CreateUser, ctx: &RequestContext) -> Result<u32> {
        let Some(user) = self
            .store
            .insert(&command.first_name, &command.last_name, &command.email)
        else {
            return Err(ApplicationError::validation(
                "email",
                "is already registered",
            ));
        };
        info!(correlation_id = %ctx.correlation_id(), user_id = user.id, "User created");
        Ok(user.id)
    }
}

pub struct GetUserQueryHandler {
    store: Arc<InMemoryUserStore>,
}

impl GetUserQueryHandler {
    pub fn new(store: Arc<InMemoryUserStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestHandler<GetUser> for GetUserQueryHandler {
    #[instrument(skip_all, fields(user_id = query.id))]
    async fn handle(&self, query: &GetUser, _ctx: &RequestContext) -> Result<UserDto> {
        self.store
            .get(query.id)
            .ok_or_else(|| ApplicationError::not_found(format!("User {}", query.id)))
    }
}

pub struct WelcomeEmailHandler {
    audit: Arc<AuditTrail>,
}

impl WelcomeEmailHandler {
    pub fn new(audit: Arc<AuditTrail>) -> Self {
        Self { audit }
    }
}

#[async_trait]
impl NotificationHandler<UserCreated> for WelcomeEmailHandler {
    async fn handle(&self, event: &UserCreated, _ctx: &RequestContext) -> Result<()> {
        // Stand-in for an actual mail client.
        info!(email = %event.email, "Sending welcome email");
        self.audit.record(format!("welcome email to {}", event.email));
        Ok(())
    }
}

pub struct UserAuditHandler {
    audit: Arc<AuditTrail>,
}

impl UserAuditHandler {
    pub fn new(audit: Arc<AuditTrail>) -> Self {
        Self { audit }
    }
}

#[async_trait]
impl NotificationHandler<UserCreated> for UserAuditHandler {
    async fn handle(&self, event: &UserCreated, _ctx: &RequestContext) -> Result<()> {
        self.audit.record(format!("user {} created", event.id));
        Ok(())
    }
}
