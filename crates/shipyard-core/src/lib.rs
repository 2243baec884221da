//! Core domain types and traits for Shipyard.
//!
//! This crate contains:
//! - Node and generation identifiers
//! - Resource nodes, attribute values, references and deferred patches
//! - Access rules for security groups
//! - Feature toggles for optional subsystems
//! - Blue/green release state and deployment bundle documents
//! - Event contracts and pipeline executions
//! - Provisioner and notification sink traits (external collaborator seams)

pub mod access;
pub mod bundle;
pub mod error;
pub mod event;
pub mod id;
pub mod notify;
pub mod pipeline;
pub mod provisioner;
pub mod release;
pub mod resource;
pub mod toggle;

pub use error::{Error, Result};
pub use id::{NodeId, ResourceId};
pub use resource::{AttrValue, NodeHandle, Patch, Phase, Reference, ResourceKind, ResourceNode};
pub use toggle::{NetworkMode, Toggle};
