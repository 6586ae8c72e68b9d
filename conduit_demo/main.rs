use std::sync::Arc;

use conduit_app::{Mediator, cache::InMemoryCacheStore, config::Config};
use conduit_demo::{
    build_mediator,
    logs::setup_logging,
    users::{
        AuditTrail, CountingUnitOfWorkProvider, CreateUser, GetUser, InMemoryUserStore,
        UserCreated, UsersModule,
    },
};
use conduit_types::errors::{ApplicationError, Result};

#[tokio::main]
#[cfg(not(tarpaulin_include))]
async fn main() -> Result<(), ApplicationError> {
    setup_logging();
    let (mediator, users) = setup_app()?;

    run_walkthrough(&mediator).await?;

    tracing::info!(
        users = users.store.len(),
        audit = ?users.audit.entries(),
        "Walkthrough finished"
    );
    Ok(())
}

fn setup_app() -> Result<(Mediator, UsersModule), ApplicationError> {
    let config = Arc::new(Config::from_env());
    let users = UsersModule {
        store: Arc::new(InMemoryUserStore::new()),
        audit: Arc::new(AuditTrail::new()),
        cache: Arc::new(InMemoryCacheStore::new()),
        uow_provider: Arc::new(CountingUnitOfWorkProvider::new()),
        config: config.clone(),
    };

    let mediator = build_mediator(config, &users)
        .map_err(|e| ApplicationError::generic("REGISTRY", e.to_string()))?;

    let registry = mediator.registry();
    tracing::info!(
        requests = ?registry.registered_requests(),
        notifications = ?registry.registered_notifications(),
        "Mediator ready"
    );

    Ok((mediator, users))
}

async fn run_walkthrough(mediator: &Mediator) -> Result<(), ApplicationError> {
    let command = CreateUser {
        first_name: "John".to_string(),
        last_name: "Doe".to_string(),
        email: "john.doe@example.com".to_string(),
    };
    let email = command.email.clone();
    let id = mediator.send(command).await?;

    let report = mediator.publish(UserCreated { id, email }).await;
    if !report.is_clean() {
        tracing::warn!(failures = report.failures.len(), "Some notification handlers failed");
    }

    // The second lookup is served from the cache.
    for _ in 0..2 {
        let user = mediator.send(GetUser { id }).await?;
        tracing::info!(?user, "Fetched user");
    }

    let invalid = CreateUser {
        first_name: String::new(),
        last_name: "Doe".to_string(),
        email: "bad-email".to_string(),
    };
    match mediator.send(invalid).await {
        Ok(id) => tracing::error!(id, "Invalid user was accepted"),
        Err(e) => tracing::info!(error = %e, "Invalid user rejected"),
    }

    match mediator.send(GetUser { id: 999 }).await {
        Ok(user) => tracing::error!(?user, "Unknown user was found"),
        Err(e) => tracing::info!(error = %e, code = e.code(), "Lookup failed"),
    }

    Ok(())
}
