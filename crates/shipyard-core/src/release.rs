//! Blue/green release types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::ResourceId;
use crate::bundle::DeploymentBundle;

/// One of the two interchangeable deployment slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentColor {
    Blue,
    Green,
}

impl DeploymentColor {
    pub fn other(&self) -> Self {
        match self {
            DeploymentColor::Blue => DeploymentColor::Green,
            DeploymentColor::Green => DeploymentColor::Blue,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentColor::Blue => "blue",
            DeploymentColor::Green => "green",
        }
    }
}

impl std::fmt::Display for DeploymentColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Phase of one release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePhase {
    Idle,
    Staging,
    Deploying,
    TrafficShifted,
    Terminating,
    RolledBack,
}

impl std::fmt::Display for ReleasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleasePhase::Idle => write!(f, "idle"),
            ReleasePhase::Staging => write!(f, "staging"),
            ReleasePhase::Deploying => write!(f, "deploying"),
            ReleasePhase::TrafficShifted => write!(f, "traffic_shifted"),
            ReleasePhase::Terminating => write!(f, "terminating"),
            ReleasePhase::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Why a deployment failed. Every cause is recovered by rolling back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    HealthCheck,
    Timeout,
    Engine(String),
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::HealthCheck => write!(f, "health check failed"),
            FailureCause::Timeout => write!(f, "deployment timed out"),
            FailureCause::Engine(msg) => write!(f, "engine error: {}", msg),
        }
    }
}

/// The artifact that started a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRevision {
    pub image_tag: String,
    pub task_revision: u32,
}

/// Declared release configuration, shared by the graph declaration and the
/// state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasePolicy {
    /// How long the previous color survives after traffic shift.
    pub termination_wait: Duration,
    pub deployment_config: String,
    pub platform_version: String,
}

impl ReleasePolicy {
    /// Rollback fires on deployment failure only, never on alarms or manual stops.
    pub const AUTO_ROLLBACK_EVENTS: &'static [&'static str] = &["DEPLOYMENT_FAILURE"];
    /// Traffic shifts as soon as the standby pool is healthy.
    pub const READINESS_ACTION: &'static str = "CONTINUE_DEPLOYMENT";

    pub fn termination_wait_minutes(&self) -> u64 {
        self.termination_wait.as_secs() / 60
    }
}

impl Default for ReleasePolicy {
    fn default() -> Self {
        Self {
            termination_wait: Duration::from_secs(5 * 60),
            deployment_config: "CodeDeployDefault.ECSAllAtOnce".to_string(),
            platform_version: "LATEST".to_string(),
        }
    }
}

/// State of one release attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseState {
    pub generation: ResourceId,
    pub phase: ReleasePhase,
    /// Color serving traffic when the attempt began.
    pub active: DeploymentColor,
    /// Color the attempt deploys to.
    pub desired: DeploymentColor,
    pub health: BTreeMap<DeploymentColor, PoolHealth>,
    pub rolled_back: bool,
    /// Set once Terminating hands back to Idle.
    pub completed: bool,
    pub failure: Option<FailureCause>,
    pub artifact: Option<ArtifactRevision>,
    pub bundle: Option<DeploymentBundle>,
    pub wait_started_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

impl ReleaseState {
    pub fn new(active: DeploymentColor) -> Self {
        let health = [
            (active, PoolHealth::Healthy),
            (active.other(), PoolHealth::Unknown),
        ]
        .into_iter()
        .collect();

        Self {
            generation: ResourceId::new(),
            phase: ReleasePhase::Idle,
            active,
            desired: active.other(),
            health,
            rolled_back: false,
            completed: false,
            failure: None,
            artifact: None,
            bundle: None,
            wait_started_at: None,
            started_at: Utc::now(),
        }
    }

    /// Idle after completion and RolledBack end an attempt.
    pub fn is_terminal(&self) -> bool {
        match self.phase {
            ReleasePhase::RolledBack => true,
            ReleasePhase::Idle => self.completed,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other_color() {
        assert_eq!(DeploymentColor::Blue.other(), DeploymentColor::Green);
        assert_eq!(DeploymentColor::Green.other(), DeploymentColor::Blue);
    }

    #[test]
    fn test_new_state_targets_idle_color() {
        let state = ReleaseState::new(DeploymentColor::Green);
        assert_eq!(state.desired, DeploymentColor::Blue);
        assert_eq!(state.health[&DeploymentColor::Green], PoolHealth::Healthy);
        assert_eq!(state.health[&DeploymentColor::Blue], PoolHealth::Unknown);
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_default_policy_waits_five_minutes() {
        let policy = ReleasePolicy::default();
        assert_eq!(policy.termination_wait_minutes(), 5);
        assert_eq!(policy.deployment_config, "CodeDeployDefault.ECSAllAtOnce");
    }
}
