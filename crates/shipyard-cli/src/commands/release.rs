//! Simulated blue/green release command.
//!
//! Applies the stack, fires the pipeline trigger with a registry push, then
//! drives one release attempt from a scripted signal stream. Deployment and
//! pipeline state changes go through the notification router.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shipyard_core::bundle::TaskSpecDocument;
use shipyard_core::event::{Event, RELEASE_TAG};
use shipyard_core::notify::NotificationSink;
use shipyard_core::release::{ArtifactRevision, DeploymentColor, FailureCause};
use shipyard_deployer::{BlueGreenDeployer, BundleTemplate, ReleaseController, ReleaseSignal, ServiceState};
use shipyard_stack::apply::NodeState;
use shipyard_stack::{ApplyReport, NotificationRouter, RouteOutcome, Stack};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::apply::apply_stack;
use super::build_stack;

/// Phase in which the scripted release reports a deployment failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Deploying,
    TrafficShifted,
    Terminating,
}

/// Prints every delivered notification.
struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, event: &Event) -> shipyard_core::Result<()> {
        let state = event.detail("state").unwrap_or("?");
        info!(source = %event.source, state = %state, "notification");
        println!("  ✉ {} {}", event.detail_type, state);
        Ok(())
    }
}

pub async fn release(path: &str, fail_at: Option<FailAt>) -> Result<()> {
    let (config, mut stack) = build_stack(path)?;
    let report = apply_stack(&mut stack, &config.region, None).await?;
    let router = stack.router(Arc::new(LogSink));

    let repository = input(node_state(&report, &stack.registry.repository)?, "name");
    let push = Event::registry_push(&repository, RELEASE_TAG, true);
    let mut execution = stack
        .pipeline
        .trigger
        .fire(&push)
        .context("Registry push did not match the pipeline trigger")?;
    println!("▶ Pipeline {} started ({})", execution.pipeline, execution.id);
    notify(&router, &execution.state_event()).await;
    execution.complete_stage(Ok(()))?;

    let (template, revision) = bundle_template(&stack, &report)?;
    let application = input(node_state(&report, &stack.release.application)?, "name");
    let service = ServiceState::new(
        template.service_name.clone(),
        stack.load_balancer.port,
        DeploymentColor::Green,
        revision,
    );
    let policy = stack.release.policy.clone();
    let artifact = ArtifactRevision {
        image_tag: RELEASE_TAG.to_string(),
        task_revision: revision + 1,
    };
    let signals = script(artifact, policy.termination_wait, fail_at, Utc::now())?;
    let controller = ReleaseController::new(&service, policy, template);

    println!(
        "▶ Releasing {} revision {}: {} -> {}",
        application,
        revision + 1,
        service.active_color(),
        service.active_color().other()
    );

    let (mut rx, handle) = BlueGreenDeployer::new(application).run(
        controller,
        service,
        futures::stream::iter(signals),
    );
    while let Some(event) = rx.recv().await {
        notify(&router, &event).await;
    }
    let outcome = handle.await.context("Release task failed")?;

    for t in &outcome.transitions {
        println!("  {} -> {} ({})", t.from, t.to, t.signal);
    }

    let result = match &outcome.state.failure {
        None if outcome.succeeded() => Ok(()),
        Some(cause) => Err(format!("rolled back: {}", cause)),
        None => Err(format!("stopped in {}", outcome.state.phase)),
    };
    execution.complete_stage(result.clone())?;
    notify(&router, &execution.state_event()).await;

    println!(
        "\nListener :{} -> {}",
        outcome.service.listener().port(),
        outcome
            .service
            .live_pool()
            .map(|p| p.name.as_str())
            .unwrap_or("?")
    );

    match result {
        Ok(()) => {
            println!("✓ Release succeeded");
            Ok(())
        }
        Err(message) => anyhow::bail!("Release failed: {}", message),
    }
}

async fn notify(router: &NotificationRouter, event: &Event) {
    if let RouteOutcome::Failed { rule, error } = router.route(event).await {
        eprintln!("notification rule {} failed: {}", rule, error);
    }
}

/// Signals the engine would produce for one attempt.
fn script(
    artifact: ArtifactRevision,
    wait: Duration,
    fail_at: Option<FailAt>,
    shifted_at: DateTime<Utc>,
) -> Result<Vec<ReleaseSignal>> {
    let mut signals = vec![
        ReleaseSignal::ArtifactDetected(artifact),
        ReleaseSignal::BundleUploaded,
    ];
    if fail_at == Some(FailAt::Deploying) {
        signals.push(ReleaseSignal::DeploymentFailed(FailureCause::HealthCheck));
        return Ok(signals);
    }

    signals.push(ReleaseSignal::StandbyHealthy);
    if fail_at == Some(FailAt::TrafficShifted) {
        signals.push(ReleaseSignal::DeploymentFailed(FailureCause::Timeout));
        return Ok(signals);
    }

    signals.push(ReleaseSignal::ShiftConfirmed { at: shifted_at });
    if fail_at == Some(FailAt::Terminating) {
        signals.push(ReleaseSignal::DeploymentFailed(FailureCause::Engine(
            "task set failed to stabilize".to_string(),
        )));
        return Ok(signals);
    }

    let wait = chrono::Duration::from_std(wait).context("Termination wait out of range")?;
    signals.push(ReleaseSignal::Tick { now: shifted_at });
    signals.push(ReleaseSignal::Tick {
        now: shifted_at + wait,
    });
    Ok(signals)
}

fn node_state<'a>(report: &'a ApplyReport, handle: &shipyard_core::NodeHandle) -> Result<&'a NodeState> {
    report
        .state
        .get(handle.id())
        .with_context(|| format!("{} was not provisioned", handle.id()))
}

fn input(state: &NodeState, key: &str) -> String {
    text(state.inputs.get(key))
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Bundle template from the provisioned task definition and repository.
fn bundle_template(stack: &Stack, report: &ApplyReport) -> Result<(BundleTemplate, u32)> {
    let task = node_state(report, &stack.compute.task_definition)?;
    let repository = node_state(report, &stack.registry.repository)?;
    let service = node_state(report, &stack.compute.service)?;

    let revision = task
        .provisioned
        .outputs
        .get("revision")
        .and_then(Value::as_u64)
        .and_then(|r| u32::try_from(r).ok())
        .context("Task definition has no revision")?;
    let container_definitions = serde_json::from_str(&input(task, "container_definitions"))
        .context("Task definition has malformed container definitions")?;
    let requires_compatibilities = task
        .inputs
        .get("requires_compatibilities")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(|v| text(Some(v))).collect())
        .unwrap_or_default();

    let task_spec = TaskSpecDocument {
        task_definition_arn: text(task.provisioned.outputs.get("arn")),
        container_definitions,
        family: input(task, "family"),
        task_role_arn: input(task, "task_role_arn"),
        execution_role_arn: input(task, "execution_role_arn"),
        network_mode: input(task, "network_mode"),
        revision: revision.to_string(),
        volumes: task.inputs.get("volume").cloned().unwrap_or(Value::Null),
        requires_compatibilities,
        cpu: input(task, "cpu"),
        memory: input(task, "memory"),
    };

    let template = BundleTemplate {
        service_name: input(service, "name"),
        repository_url: text(repository.provisioned.outputs.get("repository_url")),
        task_spec,
        container_name: stack.compute.container_name.clone(),
        container_port: stack.compute.container_port,
    };
    Ok((template, revision))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> ArtifactRevision {
        ArtifactRevision {
            image_tag: "latest".to_string(),
            task_revision: 2,
        }
    }

    #[test]
    fn test_script_for_successful_release() {
        let at = Utc::now();
        let signals = script(artifact(), Duration::from_secs(300), None, at).unwrap();
        assert_eq!(signals.len(), 6);
        assert_eq!(
            signals.last(),
            Some(&ReleaseSignal::Tick {
                now: at + chrono::Duration::minutes(5)
            })
        );
    }

    #[test]
    fn test_script_stops_at_failure() {
        let signals = script(
            artifact(),
            Duration::from_secs(300),
            Some(FailAt::Deploying),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(signals.len(), 3);
        assert!(matches!(
            signals.last(),
            Some(ReleaseSignal::DeploymentFailed(FailureCause::HealthCheck))
        ));
    }
}
