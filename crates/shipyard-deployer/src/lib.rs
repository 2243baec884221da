//! Blue/green release engine for Shipyard.
//!
//! This crate contains:
//! - `ServiceState`: listener, target pools and task sets of the running service
//! - `ReleaseController`: the release state machine
//! - `BlueGreenDeployer`: drives a controller from a signal stream

pub mod driver;
pub mod machine;
pub mod service;

pub use driver::{BlueGreenDeployer, ReleaseOutcome};
pub use machine::{BundleTemplate, ReleaseController, ReleaseSignal, Transition};
pub use service::{Listener, ServiceState, TargetPool, TaskSet, TaskSetStatus};
