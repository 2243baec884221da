//! Drives a release controller from the engine's signal stream.

use futures::{Stream, StreamExt};
use shipyard_core::event::{DeploymentState, Event};
use shipyard_core::release::{ReleasePhase, ReleaseState};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::machine::{ReleaseController, ReleaseSignal, Transition};
use crate::service::ServiceState;

/// Result of driving one release attempt.
#[derive(Debug)]
pub struct ReleaseOutcome {
    pub state: ReleaseState,
    pub service: ServiceState,
    pub transitions: Vec<Transition>,
}

impl ReleaseOutcome {
    pub fn succeeded(&self) -> bool {
        self.state.phase == ReleasePhase::Idle && self.state.completed
    }
}

pub struct BlueGreenDeployer {
    application: String,
}

impl BlueGreenDeployer {
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
        }
    }

    /// Run a release attempt, returning a channel of deployment state-change
    /// events and a handle to get the outcome.
    ///
    /// The attempt ends at the first terminal state or when the signal stream
    /// is exhausted. Signals invalid for the current phase are logged and
    /// skipped.
    pub fn run<S>(
        &self,
        controller: ReleaseController,
        service: ServiceState,
        signals: S,
    ) -> (
        mpsc::Receiver<Event>,
        tokio::task::JoinHandle<ReleaseOutcome>,
    )
    where
        S: Stream<Item = ReleaseSignal> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(100);
        let application = self.application.clone();

        let handle = tokio::spawn(async move {
            Self::run_inner(application, controller, service, signals, tx).await
        });

        (rx, handle)
    }

    async fn run_inner<S>(
        application: String,
        mut controller: ReleaseController,
        mut service: ServiceState,
        signals: S,
        tx: mpsc::Sender<Event>,
    ) -> ReleaseOutcome
    where
        S: Stream<Item = ReleaseSignal> + Send + 'static,
    {
        let deployment_id = controller.state().generation.to_string();
        let mut signals = Box::pin(signals);

        info!(
            application = %application,
            deployment = %deployment_id,
            active = %service.active_color(),
            "release attempt started"
        );

        while let Some(signal) = signals.next().await {
            let name = signal.name();
            match controller.apply(&mut service, signal) {
                Ok(Some(transition)) => {
                    let state = match transition.to {
                        ReleasePhase::Deploying => Some(DeploymentState::Start),
                        ReleasePhase::Idle => Some(DeploymentState::Success),
                        ReleasePhase::RolledBack => Some(DeploymentState::Failure),
                        _ => None,
                    };
                    if let Some(state) = state {
                        let _ = tx
                            .send(Event::deployment_state(&application, &deployment_id, state))
                            .await;
                    }
                    if controller.state().is_terminal() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(deployment = %deployment_id, signal = name, error = %e, "signal skipped");
                }
            }
        }

        let phase = controller.state().phase;
        if !controller.state().is_terminal() {
            warn!(deployment = %deployment_id, phase = %phase, "signal stream ended before the attempt finished");
            if phase != ReleasePhase::Idle {
                let _ = tx
                    .send(Event::deployment_state(
                        &application,
                        &deployment_id,
                        DeploymentState::Stop,
                    ))
                    .await;
            }
        }

        info!(deployment = %deployment_id, phase = %phase, listener = %service.active_color(), "release attempt finished");

        let transitions = controller.history().to_vec();
        ReleaseOutcome {
            state: controller.into_state(),
            service,
            transitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::tests::{artifact, template};
    use chrono::Utc;
    use shipyard_core::release::{DeploymentColor, FailureCause, ReleasePolicy};
    use std::time::Duration;

    fn start() -> (ReleaseController, ServiceState) {
        let service = ServiceState::new("app-name", 80, DeploymentColor::Green, 1);
        let policy = ReleasePolicy {
            termination_wait: Duration::ZERO,
            ..ReleasePolicy::default()
        };
        let controller = ReleaseController::new(&service, policy, template());
        (controller, service)
    }

    async fn collect(mut rx: mpsc::Receiver<Event>) -> Vec<String> {
        let mut states = Vec::new();
        while let Some(event) = rx.recv().await {
            states.push(event.detail("state").unwrap_or_default().to_string());
        }
        states
    }

    #[tokio::test]
    async fn test_successful_release() {
        let (controller, service) = start();
        let now = Utc::now();
        let signals = futures::stream::iter(vec![
            ReleaseSignal::ArtifactDetected(artifact()),
            ReleaseSignal::BundleUploaded,
            ReleaseSignal::StandbyHealthy,
            ReleaseSignal::ShiftConfirmed { at: now },
            ReleaseSignal::Tick { now },
        ]);

        let (rx, handle) = BlueGreenDeployer::new("app-name").run(controller, service, signals);
        let outcome = handle.await.unwrap();
        let states = collect(rx).await;

        assert_eq!(states, vec!["START", "SUCCESS"]);
        assert!(outcome.succeeded());
        assert_eq!(outcome.service.active_color(), DeploymentColor::Blue);
        assert_eq!(outcome.transitions.len(), 5);
    }

    #[tokio::test]
    async fn test_failed_release_rolls_back() {
        let (controller, service) = start();
        let signals = futures::stream::iter(vec![
            ReleaseSignal::ArtifactDetected(artifact()),
            ReleaseSignal::BundleUploaded,
            ReleaseSignal::DeploymentFailed(FailureCause::HealthCheck),
            // Never reached: the attempt ends at the terminal state.
            ReleaseSignal::StandbyHealthy,
        ]);

        let (rx, handle) = BlueGreenDeployer::new("app-name").run(controller, service, signals);
        let outcome = handle.await.unwrap();

        assert_eq!(collect(rx).await, vec!["START", "FAILURE"]);
        assert!(!outcome.succeeded());
        assert!(outcome.state.rolled_back);
        assert_eq!(outcome.service.active_color(), DeploymentColor::Green);
    }

    #[tokio::test]
    async fn test_invalid_signals_are_skipped() {
        let (controller, service) = start();
        let signals = futures::stream::iter(vec![
            ReleaseSignal::StandbyHealthy,
            ReleaseSignal::ArtifactDetected(artifact()),
            ReleaseSignal::ManualStop,
            ReleaseSignal::BundleUploaded,
        ]);

        let (rx, handle) = BlueGreenDeployer::new("app-name").run(controller, service, signals);
        let outcome = handle.await.unwrap();

        // The stream ran dry mid-deployment.
        assert_eq!(collect(rx).await, vec!["START", "STOP"]);
        assert_eq!(outcome.state.phase, ReleasePhase::Deploying);
        assert_eq!(outcome.service.active_color(), DeploymentColor::Green);
    }
}
