//! Event-driven start of the release pipeline.

use shipyard_core::bundle::DeploymentBundle;
use shipyard_core::event::{Event, EventPattern};
use shipyard_core::pipeline::{ArtifactRefs, PipelineExecution, TriggerSource};
use tracing::{debug, info};

/// Starts one pipeline execution per matching registry push. There is no
/// deduplication: every matching event starts its own execution.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTrigger {
    pattern: EventPattern,
    pipeline_name: String,
}

impl PipelineTrigger {
    pub fn new(pattern: EventPattern, pipeline_name: impl Into<String>) -> Self {
        Self {
            pattern,
            pipeline_name: pipeline_name.into(),
        }
    }

    pub fn pattern(&self) -> &EventPattern {
        &self.pattern
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn fire(&self, event: &Event) -> Option<PipelineExecution> {
        if !self.pattern.matches(event) {
            debug!(source = %event.source, "event does not match pipeline trigger");
            return None;
        }

        let repository = event.detail("repository-name").unwrap_or_default().to_string();
        let tag = event.detail("image-tag").unwrap_or_default().to_string();
        let execution = PipelineExecution::start(
            self.pipeline_name.as_str(),
            TriggerSource::RegistryPush {
                repository,
                tag: tag.clone(),
            },
            ArtifactRefs {
                image_tag: tag,
                bundle_key: DeploymentBundle::ARCHIVE_KEY.to_string(),
            },
        );

        info!(
            pipeline = %self.pipeline_name,
            execution = %execution.id,
            "pipeline execution started"
        );
        Some(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::pipeline::{ExecutionStatus, SOURCE_STAGE};

    fn trigger() -> PipelineTrigger {
        PipelineTrigger::new(EventPattern::registry_push("app-name"), "app-name-pipeline")
    }

    #[test]
    fn test_fires_on_successful_latest_push() {
        let execution = trigger()
            .fire(&Event::registry_push("app-name", "latest", true))
            .unwrap();

        assert_eq!(execution.pipeline, "app-name-pipeline");
        assert_eq!(execution.status, ExecutionStatus::Started);
        assert_eq!(execution.current_stage().unwrap().name, SOURCE_STAGE);
        assert_eq!(execution.artifacts.bundle_key, "ecs-defs.zip");
        assert_eq!(
            execution.trigger,
            TriggerSource::RegistryPush {
                repository: "app-name".to_string(),
                tag: "latest".to_string()
            }
        );
    }

    #[test]
    fn test_ignores_other_tags_results_and_repositories() {
        let trigger = trigger();
        assert!(trigger.fire(&Event::registry_push("app-name", "v2", true)).is_none());
        assert!(trigger.fire(&Event::registry_push("app-name", "latest", false)).is_none());
        assert!(trigger.fire(&Event::registry_push("other", "latest", true)).is_none());
    }

    #[test]
    fn test_rapid_pushes_start_concurrent_executions() {
        let trigger = trigger();
        let push = Event::registry_push("app-name", "latest", true);

        let executions: Vec<_> = (0..3).filter_map(|_| trigger.fire(&push)).collect();
        assert_eq!(executions.len(), 3);
        assert_ne!(executions[0].id, executions[1].id);
        assert_ne!(executions[1].id, executions[2].id);
    }
}
