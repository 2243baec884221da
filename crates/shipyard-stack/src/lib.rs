//! Resource graph assembly for Shipyard.
//!
//! This crate contains:
//! - `ResourceGraph`: declared nodes, deferred patches, outputs, rendering
//! - `SecurityGroupBinder`: two-phase resolution of cross-referencing groups
//! - Subsystem resolution and every component declaration
//! - `GraphBuilder`: the whole stack in dependency order
//! - `PipelineTrigger` and `NotificationRouter`
//! - `Applier` and the in-memory `SimulatedProvisioner`

pub mod apply;
pub mod binder;
pub mod builder;
pub mod components;
pub mod graph;
pub mod naming;
pub mod router;
pub mod simulated;
pub mod subsystems;
pub mod trigger;

pub use apply::{Applier, ApplyReport};
pub use binder::{GroupSpec, SecurityGroupBinder};
pub use builder::{GraphBuilder, Stack};
pub use graph::{NodeBuilder, ResourceGraph};
pub use router::{NotificationRouter, RouteOutcome};
pub use simulated::SimulatedProvisioner;
pub use subsystems::Subsystems;
pub use trigger::PipelineTrigger;
