//! Blue/green release state machine.
//!
//! The controller is passive: every transition is driven by a signal from the
//! external release engine. The service is taken by exclusive borrow, so one
//! attempt at a time holds write authority over the listener.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shipyard_core::bundle::{BundleInputs, DeploymentBundle, TaskSpecDocument};
use shipyard_core::release::{
    ArtifactRevision, DeploymentColor, FailureCause, PoolHealth, ReleasePhase, ReleasePolicy,
    ReleaseState,
};
use shipyard_core::{Error, Result};
use tracing::{info, warn};

use crate::service::{ServiceState, TaskSetStatus};

/// Signals produced by the external release engine and health checker.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseSignal {
    ArtifactDetected(ArtifactRevision),
    BundleUploaded,
    StandbyHealthy,
    /// Traffic shift confirmed; starts the termination wait window.
    ShiftConfirmed { at: DateTime<Utc> },
    Tick { now: DateTime<Utc> },
    DeploymentFailed(FailureCause),
    Alarm { name: String },
    ManualStop,
}

impl ReleaseSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ReleaseSignal::ArtifactDetected(_) => "artifact_detected",
            ReleaseSignal::BundleUploaded => "bundle_uploaded",
            ReleaseSignal::StandbyHealthy => "standby_healthy",
            ReleaseSignal::ShiftConfirmed { .. } => "shift_confirmed",
            ReleaseSignal::Tick { .. } => "tick",
            ReleaseSignal::DeploymentFailed(_) => "deployment_failed",
            ReleaseSignal::Alarm { .. } => "alarm",
            ReleaseSignal::ManualStop => "manual_stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: ReleasePhase,
    pub to: ReleasePhase,
    pub signal: &'static str,
}

/// Fixed parts of the deployment bundle. Each artifact revision fills in the
/// image tag and the task revision.
#[derive(Debug, Clone)]
pub struct BundleTemplate {
    pub service_name: String,
    /// Repository URL without a tag.
    pub repository_url: String,
    /// Task spec with the unrevisioned task definition ARN.
    pub task_spec: TaskSpecDocument,
    pub container_name: String,
    pub container_port: u16,
}

impl BundleTemplate {
    pub fn inputs(&self, artifact: &ArtifactRevision, policy: &ReleasePolicy) -> BundleInputs {
        let mut task_spec = self.task_spec.clone();
        task_spec.revision = artifact.task_revision.to_string();
        if !task_spec.task_definition_arn.is_empty() {
            task_spec.task_definition_arn =
                format!("{}:{}", task_spec.task_definition_arn, artifact.task_revision);
        }

        BundleInputs {
            service_name: self.service_name.clone(),
            image_uri: format!("{}:{}", self.repository_url, artifact.image_tag),
            task_spec,
            container_name: self.container_name.clone(),
            container_port: self.container_port,
            platform_version: policy.platform_version.clone(),
        }
    }
}

pub struct ReleaseController {
    state: ReleaseState,
    policy: ReleasePolicy,
    template: BundleTemplate,
    history: Vec<Transition>,
}

impl ReleaseController {
    /// Start an attempt against the color the service currently serves from.
    pub fn new(service: &ServiceState, policy: ReleasePolicy, template: BundleTemplate) -> Self {
        Self {
            state: ReleaseState::new(service.active_color()),
            policy,
            template,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> &ReleaseState {
        &self.state
    }

    pub fn policy(&self) -> &ReleasePolicy {
        &self.policy
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn into_state(self) -> ReleaseState {
        self.state
    }

    /// Feed one signal. Returns the transition taken, or `None` when the
    /// signal was accepted without changing phase.
    pub fn apply(
        &mut self,
        service: &mut ServiceState,
        signal: ReleaseSignal,
    ) -> Result<Option<Transition>> {
        let from = self.state.phase;
        let name = signal.name();

        if self.state.is_terminal() {
            return Err(self.invalid(name));
        }

        let to = match (from, signal) {
            (_, ReleaseSignal::Alarm { name: alarm }) => {
                info!(generation = %self.state.generation, alarm = %alarm, "alarm ignored, rollback is triggered by deployment failure only");
                return Ok(None);
            }
            (_, ReleaseSignal::ManualStop) => {
                info!(generation = %self.state.generation, "manual stop ignored, rollback is triggered by deployment failure only");
                return Ok(None);
            }
            (ReleasePhase::Idle, ReleaseSignal::ArtifactDetected(artifact)) => {
                let bundle =
                    DeploymentBundle::package(self.template.inputs(&artifact, &self.policy))?;
                info!(
                    generation = %self.state.generation,
                    image_tag = %artifact.image_tag,
                    revision = artifact.task_revision,
                    "deployment bundle packaged"
                );
                self.state.bundle = Some(bundle);
                self.state.artifact = Some(artifact);
                ReleasePhase::Staging
            }
            (ReleasePhase::Staging, ReleaseSignal::BundleUploaded) => {
                let revision = self
                    .state
                    .artifact
                    .as_ref()
                    .map(|a| a.task_revision)
                    .ok_or_else(|| Error::Internal("staging without an artifact".to_string()))?;
                service.start_task_set(self.state.desired, revision);
                self.state.health.insert(self.state.desired, PoolHealth::Unknown);
                ReleasePhase::Deploying
            }
            (ReleasePhase::Deploying, ReleaseSignal::StandbyHealthy) => {
                self.state.health.insert(self.state.desired, PoolHealth::Healthy);
                service.set_task_status(self.state.desired, TaskSetStatus::Running);
                service.switch_listener(self.state.desired);
                ReleasePhase::TrafficShifted
            }
            (ReleasePhase::TrafficShifted, ReleaseSignal::ShiftConfirmed { at }) => {
                self.state.wait_started_at = Some(at);
                ReleasePhase::Terminating
            }
            (ReleasePhase::Terminating, ReleaseSignal::Tick { now }) => {
                if !self.wait_expired(now)? {
                    return Ok(None);
                }
                service.set_task_status(self.state.active, TaskSetStatus::TornDown);
                self.state.completed = true;
                ReleasePhase::Idle
            }
            (
                ReleasePhase::Deploying | ReleasePhase::TrafficShifted | ReleasePhase::Terminating,
                ReleaseSignal::DeploymentFailed(cause),
            ) => {
                self.roll_back(service, cause);
                ReleasePhase::RolledBack
            }
            _ => return Err(self.invalid(name)),
        };

        self.state.phase = to;
        let transition = Transition {
            from,
            to,
            signal: name,
        };
        info!(
            generation = %self.state.generation,
            from = %from,
            to = %to,
            signal = name,
            listener = %service.active_color(),
            "release transition"
        );
        self.history.push(transition.clone());
        Ok(Some(transition))
    }

    fn wait_expired(&self, now: DateTime<Utc>) -> Result<bool> {
        let started = self
            .state
            .wait_started_at
            .ok_or_else(|| Error::Internal("terminating without a wait window".to_string()))?;
        let wait = chrono::Duration::from_std(self.policy.termination_wait)
            .map_err(|e| Error::Internal(format!("termination wait out of range: {}", e)))?;
        Ok(now >= started + wait)
    }

    fn roll_back(&mut self, service: &mut ServiceState, cause: FailureCause) {
        warn!(
            generation = %self.state.generation,
            phase = %self.state.phase,
            cause = %cause,
            restored = %self.state.active,
            "deployment failed, rolling back"
        );
        service.switch_listener(self.state.active);
        service.set_task_status(self.state.desired, TaskSetStatus::Abandoned);
        if cause == FailureCause::HealthCheck {
            self.state.health.insert(self.state.desired, PoolHealth::Unhealthy);
        }
        self.state.rolled_back = true;
        self.state.failure = Some(cause);
    }

    fn invalid(&self, signal: &str) -> Error {
        warn!(generation = %self.state.generation, phase = %self.state.phase, signal, "invalid release signal");
        Error::InvalidTransition {
            phase: self.state.phase.to_string(),
            signal: signal.to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;

    pub(crate) fn template() -> BundleTemplate {
        BundleTemplate {
            service_name: "app-name".to_string(),
            repository_url: "123456789012.dkr.ecr.us-east-1.amazonaws.com/app-name".to_string(),
            task_spec: TaskSpecDocument {
                task_definition_arn: "arn:aws:ecs:us-east-1:123456789012:task-definition/app-name"
                    .to_string(),
                container_definitions: json!([{"name": "app-name", "image": "app-name:latest"}]),
                family: "app-name".to_string(),
                task_role_arn: String::new(),
                execution_role_arn: "arn:aws:iam::123456789012:role/app-name-ecs-execution-role"
                    .to_string(),
                network_mode: "awsvpc".to_string(),
                revision: String::new(),
                volumes: json!([]),
                requires_compatibilities: vec!["FARGATE".to_string()],
                cpu: "256".to_string(),
                memory: "512".to_string(),
            },
            container_name: "app-name".to_string(),
            container_port: 80,
        }
    }

    pub(crate) fn artifact() -> ArtifactRevision {
        ArtifactRevision {
            image_tag: "latest".to_string(),
            task_revision: 2,
        }
    }

    fn setup() -> (ReleaseController, ServiceState) {
        let service = ServiceState::new("app-name", 80, DeploymentColor::Green, 1);
        let controller = ReleaseController::new(&service, ReleasePolicy::default(), template());
        (controller, service)
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, minute, 0).unwrap()
    }

    fn advance_to_deploying(controller: &mut ReleaseController, service: &mut ServiceState) {
        controller
            .apply(service, ReleaseSignal::ArtifactDetected(artifact()))
            .unwrap();
        controller.apply(service, ReleaseSignal::BundleUploaded).unwrap();
    }

    #[test]
    fn test_steady_state_has_single_listener_target() {
        let (controller, service) = setup();
        assert_eq!(controller.state().phase, ReleasePhase::Idle);
        assert_eq!(service.active_color(), DeploymentColor::Green);
        assert_eq!(controller.state().desired, DeploymentColor::Blue);
    }

    #[test]
    fn test_full_release_moves_listener_to_standby() {
        let (mut controller, mut service) = setup();
        let standby = controller.state().desired;

        advance_to_deploying(&mut controller, &mut service);
        assert_eq!(controller.state().phase, ReleasePhase::Deploying);
        assert_eq!(
            service.task_set(standby).unwrap().status,
            TaskSetStatus::Starting
        );
        // Traffic stays on the old color until the standby is healthy.
        assert_eq!(service.active_color(), DeploymentColor::Green);

        controller
            .apply(&mut service, ReleaseSignal::StandbyHealthy)
            .unwrap();
        assert_eq!(service.active_color(), standby);

        controller
            .apply(&mut service, ReleaseSignal::ShiftConfirmed { at: at(0) })
            .unwrap();
        assert_eq!(controller.state().phase, ReleasePhase::Terminating);

        let early = controller
            .apply(&mut service, ReleaseSignal::Tick { now: at(4) })
            .unwrap();
        assert!(early.is_none());
        assert_eq!(
            service.task_set(DeploymentColor::Green).unwrap().status,
            TaskSetStatus::Running
        );

        let done = controller
            .apply(&mut service, ReleaseSignal::Tick { now: at(5) })
            .unwrap()
            .unwrap();
        assert_eq!(done.from, ReleasePhase::Terminating);
        assert_eq!(done.to, ReleasePhase::Idle);
        assert!(controller.state().is_terminal());
        assert!(controller.state().completed);
        assert_eq!(service.active_color(), standby);
        assert_eq!(service.live_pool().unwrap().name, "app-name-tg-blue");
        assert_eq!(
            service.task_set(DeploymentColor::Green).unwrap().status,
            TaskSetStatus::TornDown
        );
        assert_eq!(controller.history().len(), 5);
    }

    #[test]
    fn test_staging_packages_bundle() {
        let (mut controller, mut service) = setup();
        controller
            .apply(&mut service, ReleaseSignal::ArtifactDetected(artifact()))
            .unwrap();

        let bundle = controller.state().bundle.as_ref().unwrap();
        assert_eq!(
            bundle.image_definitions[0].image_uri,
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/app-name:latest"
        );
        assert_eq!(bundle.task_spec.revision, "2");
        assert!(bundle.task_spec.task_definition_arn.ends_with("task-definition/app-name:2"));
        assert_eq!(bundle.app_spec.resources[0].target_service.properties.platform_version, "LATEST");
    }

    #[test]
    fn test_packaging_failure_leaves_state_untouched() {
        let service = ServiceState::new("app-name", 80, DeploymentColor::Green, 1);
        let mut broken = template();
        broken.container_name.clear();
        let mut controller = ReleaseController::new(&service, ReleasePolicy::default(), broken);
        let mut service = service;

        let err = controller
            .apply(&mut service, ReleaseSignal::ArtifactDetected(artifact()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(controller.state().phase, ReleasePhase::Idle);
        assert!(controller.state().bundle.is_none());
    }

    #[test]
    fn test_rollback_from_deploying_keeps_old_pool() {
        let (mut controller, mut service) = setup();
        advance_to_deploying(&mut controller, &mut service);

        let transition = controller
            .apply(
                &mut service,
                ReleaseSignal::DeploymentFailed(FailureCause::HealthCheck),
            )
            .unwrap()
            .unwrap();
        assert_eq!(transition.to, ReleasePhase::RolledBack);

        let state = controller.state();
        assert!(state.rolled_back);
        assert!(state.is_terminal());
        assert_eq!(state.failure, Some(FailureCause::HealthCheck));
        assert_eq!(state.health[&DeploymentColor::Blue], PoolHealth::Unhealthy);

        assert_eq!(service.active_color(), DeploymentColor::Green);
        let old = service.task_set(DeploymentColor::Green).unwrap();
        assert_eq!(old.status, TaskSetStatus::Running);
        assert_eq!(old.revision, 1);
        assert_eq!(
            service.task_set(DeploymentColor::Blue).unwrap().status,
            TaskSetStatus::Abandoned
        );
    }

    fn assert_rolled_back_to_green(controller: &ReleaseController, service: &ServiceState) {
        assert_eq!(controller.state().phase, ReleasePhase::RolledBack);
        assert!(controller.state().rolled_back);
        assert_eq!(service.active_color(), DeploymentColor::Green);
        let old = service.task_set(DeploymentColor::Green).unwrap();
        assert_eq!(old.status, TaskSetStatus::Running);
        assert_eq!(old.revision, 1);
        assert_eq!(
            service.task_set(DeploymentColor::Blue).unwrap().status,
            TaskSetStatus::Abandoned
        );
    }

    #[test]
    fn test_rollback_from_traffic_shifted_reverts_listener() {
        let (mut controller, mut service) = setup();
        advance_to_deploying(&mut controller, &mut service);
        controller
            .apply(&mut service, ReleaseSignal::StandbyHealthy)
            .unwrap();
        assert_eq!(controller.state().phase, ReleasePhase::TrafficShifted);
        assert_eq!(service.active_color(), DeploymentColor::Blue);

        let transition = controller
            .apply(&mut service, ReleaseSignal::DeploymentFailed(FailureCause::Timeout))
            .unwrap()
            .unwrap();
        assert_eq!(transition.from, ReleasePhase::TrafficShifted);
        assert_rolled_back_to_green(&controller, &service);
        assert_eq!(controller.state().failure, Some(FailureCause::Timeout));
    }

    #[test]
    fn test_rollback_from_terminating_reverts_listener() {
        let (mut controller, mut service) = setup();
        advance_to_deploying(&mut controller, &mut service);
        controller
            .apply(&mut service, ReleaseSignal::StandbyHealthy)
            .unwrap();
        controller
            .apply(&mut service, ReleaseSignal::ShiftConfirmed { at: at(0) })
            .unwrap();
        assert_eq!(service.active_color(), DeploymentColor::Blue);

        let transition = controller
            .apply(&mut service, ReleaseSignal::DeploymentFailed(FailureCause::Timeout))
            .unwrap()
            .unwrap();
        assert_eq!(transition.from, ReleasePhase::Terminating);
        assert_rolled_back_to_green(&controller, &service);
    }

    #[test]
    fn test_alarm_and_manual_stop_are_ignored() {
        let (mut controller, mut service) = setup();
        advance_to_deploying(&mut controller, &mut service);

        let alarm = controller
            .apply(
                &mut service,
                ReleaseSignal::Alarm {
                    name: "high-5xx".to_string(),
                },
            )
            .unwrap();
        assert!(alarm.is_none());
        let stop = controller
            .apply(&mut service, ReleaseSignal::ManualStop)
            .unwrap();
        assert!(stop.is_none());
        assert_eq!(controller.state().phase, ReleasePhase::Deploying);
        assert!(!controller.state().rolled_back);
    }

    #[test]
    fn test_invalid_signal_is_rejected() {
        let (mut controller, mut service) = setup();
        let err = controller
            .apply(&mut service, ReleaseSignal::StandbyHealthy)
            .unwrap_err();
        match err {
            Error::InvalidTransition { phase, signal } => {
                assert_eq!(phase, "idle");
                assert_eq!(signal, "standby_healthy");
            }
            other => panic!("unexpected error: {other}"),
        }

        // Failure before any tasks started has nothing to roll back.
        assert!(controller
            .apply(
                &mut service,
                ReleaseSignal::DeploymentFailed(FailureCause::Timeout)
            )
            .is_err());
        assert_eq!(controller.state().phase, ReleasePhase::Idle);
    }

    #[test]
    fn test_terminal_state_rejects_signals() {
        let (mut controller, mut service) = setup();
        advance_to_deploying(&mut controller, &mut service);
        controller
            .apply(
                &mut service,
                ReleaseSignal::DeploymentFailed(FailureCause::Engine("boom".to_string())),
            )
            .unwrap();

        let err = controller
            .apply(&mut service, ReleaseSignal::StandbyHealthy)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(service.active_color(), DeploymentColor::Green);
    }

    #[test]
    fn test_custom_wait_window() {
        let service = ServiceState::new("app-name", 80, DeploymentColor::Green, 1);
        let policy = ReleasePolicy {
            termination_wait: Duration::from_secs(30 * 60),
            ..ReleasePolicy::default()
        };
        let mut controller = ReleaseController::new(&service, policy, template());
        let mut service = service;
        advance_to_deploying(&mut controller, &mut service);
        controller
            .apply(&mut service, ReleaseSignal::StandbyHealthy)
            .unwrap();
        controller
            .apply(&mut service, ReleaseSignal::ShiftConfirmed { at: at(0) })
            .unwrap();

        assert!(controller
            .apply(&mut service, ReleaseSignal::Tick { now: at(29) })
            .unwrap()
            .is_none());
        assert!(controller
            .apply(&mut service, ReleaseSignal::Tick { now: at(30) })
            .unwrap()
            .is_some());
    }
}
