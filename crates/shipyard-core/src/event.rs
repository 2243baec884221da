//! Platform events and event patterns.
//!
//! Events carry a source, a detail type and a flat string detail map, which
//! is all the patterns in this workspace ever filter on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Error, Result};

pub const PIPELINE_SOURCE: &str = "aws.codepipeline";
pub const PIPELINE_DETAIL_TYPE: &str = "CodePipeline Pipeline Execution State Change";
pub const DEPLOYMENT_SOURCE: &str = "aws.codedeploy";
pub const DEPLOYMENT_DETAIL_TYPE: &str = "CodeDeploy Deployment State-change Notification";
pub const REGISTRY_SOURCE: &str = "aws.ecr";
pub const REGISTRY_DETAIL_TYPE: &str = "ECR Image Action";

/// Tag whose push starts a release.
pub const RELEASE_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub source: String,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub detail: BTreeMap<String, String>,
}

impl Event {
    pub fn new(source: impl Into<String>, detail_type: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            detail_type: detail_type.into(),
            time: Utc::now(),
            detail: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }

    pub fn pipeline_state(pipeline: &str, execution_id: &str, state: PipelineState) -> Self {
        Self::new(PIPELINE_SOURCE, PIPELINE_DETAIL_TYPE)
            .with_detail("pipeline", pipeline)
            .with_detail("execution-id", execution_id)
            .with_detail("state", state.as_str())
    }

    pub fn deployment_state(application: &str, deployment_id: &str, state: DeploymentState) -> Self {
        Self::new(DEPLOYMENT_SOURCE, DEPLOYMENT_DETAIL_TYPE)
            .with_detail("application", application)
            .with_detail("deploymentId", deployment_id)
            .with_detail("state", state.as_str())
    }

    pub fn registry_push(repository: &str, tag: &str, success: bool) -> Self {
        Self::new(REGISTRY_SOURCE, REGISTRY_DETAIL_TYPE)
            .with_detail("action-type", "PUSH")
            .with_detail("image-tag", tag)
            .with_detail("repository-name", repository)
            .with_detail("result", if success { "SUCCESS" } else { "FAILURE" })
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.detail.get(key).map(String::as_str)
    }
}

/// Pipeline execution state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipelineState {
    Started,
    Succeeded,
    Failed,
    Canceled,
}

impl PipelineState {
    pub const ALL: [PipelineState; 4] = [
        PipelineState::Started,
        PipelineState::Succeeded,
        PipelineState::Failed,
        PipelineState::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Started => "STARTED",
            PipelineState::Succeeded => "SUCCEEDED",
            PipelineState::Failed => "FAILED",
            PipelineState::Canceled => "CANCELED",
        }
    }
}

/// Deployment state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeploymentState {
    Start,
    Stop,
    Failure,
    Success,
}

impl DeploymentState {
    pub const ALL: [DeploymentState; 4] = [
        DeploymentState::Start,
        DeploymentState::Stop,
        DeploymentState::Failure,
        DeploymentState::Success,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::Start => "START",
            DeploymentState::Stop => "STOP",
            DeploymentState::Failure => "FAILURE",
            DeploymentState::Success => "SUCCESS",
        }
    }
}

/// A content filter over events. Empty lists match anything; otherwise the
/// event value must be one of the listed values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPattern {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source: Vec<String>,
    #[serde(rename = "detail-type", default, skip_serializing_if = "Vec::is_empty")]
    pub detail_type: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub detail: BTreeMap<String, Vec<String>>,
}

impl EventPattern {
    pub fn new(source: impl Into<String>, detail_type: impl Into<String>) -> Self {
        Self {
            source: vec![source.into()],
            detail_type: vec![detail_type.into()],
            detail: BTreeMap::new(),
        }
    }

    pub fn with_detail<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.detail
            .insert(key.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Every pipeline execution state change.
    pub fn pipeline_states() -> Self {
        Self::new(PIPELINE_SOURCE, PIPELINE_DETAIL_TYPE)
            .with_detail("state", PipelineState::ALL.iter().map(|s| s.as_str()))
    }

    /// Every deployment state change.
    pub fn deployment_states() -> Self {
        Self::new(DEPLOYMENT_SOURCE, DEPLOYMENT_DETAIL_TYPE)
            .with_detail("state", DeploymentState::ALL.iter().map(|s| s.as_str()))
    }

    /// Successful pushes of the release tag to one repository.
    pub fn registry_push(repository: &str) -> Self {
        Self::new(REGISTRY_SOURCE, REGISTRY_DETAIL_TYPE)
            .with_detail("action-type", ["PUSH"])
            .with_detail("image-tag", [RELEASE_TAG])
            .with_detail("repository-name", [repository])
            .with_detail("result", ["SUCCESS"])
    }

    pub fn matches(&self, event: &Event) -> bool {
        let one_of = |allowed: &[String], value: &str| {
            allowed.is_empty() || allowed.iter().any(|a| a == value)
        };

        one_of(&self.source, &event.source)
            && one_of(&self.detail_type, &event.detail_type)
            && self.detail.iter().all(|(key, allowed)| {
                event
                    .detail(key)
                    .map(|value| one_of(allowed, value))
                    .unwrap_or(false)
            })
    }

    /// JSON document form, as attached to an event rule.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}
