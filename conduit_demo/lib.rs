pub mod logs;
pub mod users;

use std::sync::Arc;

use conduit_app::{
    Mediator, RegistryBuilder,
    behaviors::{LoggingBehavior, PerformanceBehavior},
    config::Config,
};
use conduit_types::errors::RegistryError;

use users::UsersModule;

/// Builds a mediator with the global behaviors and the users capability.
pub fn build_mediator(config: Arc<Config>, users: &UsersModule) -> Result<Mediator, RegistryError> {
    let mut builder = RegistryBuilder::from_config(&config);
    builder
        .global_behavior(LoggingBehavior::new())
        .global_behavior(PerformanceBehavior::from_config(&config))
        .module(users)?;

    Ok(Mediator::new(Arc::new(builder.build()), config))
}
