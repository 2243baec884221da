//! Error types for Shipyard.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("duplicate node: {0}")]
    DuplicateNode(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// A hard reference was requested before the referenced node was allocated.
    #[error("dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),

    /// A node failed to provision; the whole apply is aborted.
    #[error("provisioning failed at {node}: {message}")]
    PartialGraphFailure { node: String, message: String },

    #[error("invalid transition from {phase} on {signal}")]
    InvalidTransition { phase: String, signal: String },

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
