use thiserror::Error;

/// Misconfigurations detected while building the registry, before any
/// message is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("A handler for {0} is already registered")]
    DuplicateHandler(&'static str),
}
