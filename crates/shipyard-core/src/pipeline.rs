//! Release pipeline executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Event, PipelineState};
use crate::{Error, ResourceId, Result};

/// Stage names of the release pipeline, in run order.
pub const SOURCE_STAGE: &str = "Source";
pub const DEPLOY_STAGE: &str = "DeployToECS";

/// What started an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSource {
    /// A registry push event matched the trigger rule.
    RegistryPush { repository: String, tag: String },
    /// Started by hand.
    Manual,
}

/// Artifacts an execution works from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRefs {
    pub image_tag: String,
    /// Object key of the deployment bundle archive.
    pub bundle_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed { message: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRun {
    pub name: String,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageRun {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Started,
    Succeeded,
    Failed,
    Canceled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Started)
    }

    pub fn state(&self) -> PipelineState {
        match self {
            ExecutionStatus::Started => PipelineState::Started,
            ExecutionStatus::Succeeded => PipelineState::Succeeded,
            ExecutionStatus::Failed => PipelineState::Failed,
            ExecutionStatus::Canceled => PipelineState::Canceled,
        }
    }
}

/// One run of the release pipeline. Several may be in flight at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub id: ResourceId,
    pub pipeline: String,
    pub trigger: TriggerSource,
    pub artifacts: ArtifactRefs,
    pub stages: Vec<StageRun>,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineExecution {
    /// Create a started execution with the source stage running.
    pub fn start(pipeline: impl Into<String>, trigger: TriggerSource, artifacts: ArtifactRefs) -> Self {
        let now = Utc::now();
        let mut stages = vec![StageRun::pending(SOURCE_STAGE), StageRun::pending(DEPLOY_STAGE)];
        stages[0].status = StageStatus::Running;
        stages[0].started_at = Some(now);

        Self {
            id: ResourceId::new(),
            pipeline: pipeline.into(),
            trigger,
            artifacts,
            stages,
            status: ExecutionStatus::Started,
            created_at: now,
            finished_at: None,
        }
    }

    /// The stage currently running, if any.
    pub fn current_stage(&self) -> Option<&StageRun> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Running)
    }

    /// Finish the running stage. A failure fails the execution; success
    /// starts the next stage, or succeeds the execution after the last one.
    pub fn complete_stage(&mut self, outcome: std::result::Result<(), String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "execution {} already finished",
                self.id
            )));
        }
        let index = self
            .stages
            .iter()
            .position(|s| s.status == StageStatus::Running)
            .ok_or_else(|| Error::Internal(format!("execution {} has no running stage", self.id)))?;

        let now = Utc::now();
        let stage = &mut self.stages[index];
        stage.finished_at = Some(now);

        match outcome {
            Ok(()) => {
                stage.status = StageStatus::Succeeded;
                match self.stages.get_mut(index + 1) {
                    Some(next) => {
                        next.status = StageStatus::Running;
                        next.started_at = Some(now);
                    }
                    None => {
                        self.status = ExecutionStatus::Succeeded;
                        self.finished_at = Some(now);
                    }
                }
            }
            Err(message) => {
                stage.status = StageStatus::Failed { message };
                self.status = ExecutionStatus::Failed;
                self.finished_at = Some(now);
            }
        }
        Ok(())
    }

    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        for stage in &mut self.stages {
            if matches!(stage.status, StageStatus::Pending | StageStatus::Running) {
                stage.status = StageStatus::Cancelled;
            }
        }
        self.status = ExecutionStatus::Canceled;
        self.finished_at = Some(Utc::now());
    }

    /// State-change event for the current status.
    pub fn state_event(&self) -> Event {
        Event::pipeline_state(&self.pipeline, &self.id.to_string(), self.status.state())
    }
}
