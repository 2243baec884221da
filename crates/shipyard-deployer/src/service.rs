//! The running service as the release engine sees it: one listener, two
//! target pools and a task set per color.

use serde::Serialize;
use shipyard_core::release::DeploymentColor;
use std::collections::BTreeMap;

/// A routable set of running tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetPool {
    pub name: String,
    pub color: DeploymentColor,
}

/// The listener forwards to exactly one pool. There is no way to hold two
/// default targets, so the single-target invariant holds by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listener {
    port: u16,
    default_target: DeploymentColor,
}

impl Listener {
    pub fn new(port: u16, default_target: DeploymentColor) -> Self {
        Self {
            port,
            default_target,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn default_target(&self) -> DeploymentColor {
        self.default_target
    }

    pub(crate) fn switch_to(&mut self, color: DeploymentColor) {
        self.default_target = color;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSetStatus {
    Starting,
    Running,
    Abandoned,
    TornDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSet {
    pub color: DeploymentColor,
    pub revision: u32,
    pub status: TaskSetStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceState {
    pub name: String,
    listener: Listener,
    pools: BTreeMap<DeploymentColor, TargetPool>,
    task_sets: BTreeMap<DeploymentColor, TaskSet>,
}

impl ServiceState {
    /// A steady-state service: `active` serves `revision`, the other color is
    /// empty.
    pub fn new(name: impl Into<String>, port: u16, active: DeploymentColor, revision: u32) -> Self {
        let name = name.into();
        let pools = [DeploymentColor::Blue, DeploymentColor::Green]
            .into_iter()
            .map(|color| {
                (
                    color,
                    TargetPool {
                        name: format!("{}-tg-{}", name, color),
                        color,
                    },
                )
            })
            .collect();
        let task_sets = BTreeMap::from([(
            active,
            TaskSet {
                color: active,
                revision,
                status: TaskSetStatus::Running,
            },
        )]);

        Self {
            name,
            listener: Listener::new(port, active),
            pools,
            task_sets,
        }
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Color the listener currently forwards to.
    pub fn active_color(&self) -> DeploymentColor {
        self.listener.default_target()
    }

    /// Pool the listener currently forwards to.
    pub fn live_pool(&self) -> Option<&TargetPool> {
        self.pools.get(&self.listener.default_target())
    }

    pub fn pool(&self, color: DeploymentColor) -> Option<&TargetPool> {
        self.pools.get(&color)
    }

    pub fn task_set(&self, color: DeploymentColor) -> Option<&TaskSet> {
        self.task_sets.get(&color)
    }

    pub(crate) fn switch_listener(&mut self, color: DeploymentColor) {
        self.listener.switch_to(color);
    }

    pub(crate) fn start_task_set(&mut self, color: DeploymentColor, revision: u32) {
        self.task_sets.insert(
            color,
            TaskSet {
                color,
                revision,
                status: TaskSetStatus::Starting,
            },
        );
    }

    pub(crate) fn set_task_status(&mut self, color: DeploymentColor, status: TaskSetStatus) {
        if let Some(set) = self.task_sets.get_mut(&color) {
            set.status = status;
        }
    }
}
