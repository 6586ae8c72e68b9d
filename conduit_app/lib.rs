pub mod behaviors;
pub mod cache;
pub mod config;
pub mod cqrs;
pub mod mediator;
pub mod pipeline;
pub mod registry;
pub mod uow;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use mediator::{Mediator, PublishReport};
pub use registry::{DuplicatePolicy, HandlerModule, Registry, RegistryBuilder};
