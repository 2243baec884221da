//! Release pipeline and the event rule that starts it.

use shipyard_core::bundle::DeploymentBundle;
use shipyard_core::event::{EventPattern, RELEASE_TAG};
use shipyard_core::pipeline::{DEPLOY_STAGE, SOURCE_STAGE};
use shipyard_core::{AttrValue, Error, NodeHandle, ResourceKind, Result};

use crate::components::registry::Registry;
use crate::components::release::ReleaseDeclaration;
use crate::components::{allow, assume_role_policy, attr_from_json, policy_document};
use crate::graph::ResourceGraph;
use crate::naming::Naming;
use crate::trigger::PipelineTrigger;

const IMAGE_ARTIFACT: &str = "image";
const DEFINITIONS_ARTIFACT: &str = "definitions";

#[derive(Debug, Clone)]
pub struct ReleasePipeline {
    pub role: NodeHandle,
    pub pipeline: NodeHandle,
    pub event_role: NodeHandle,
    pub rule: NodeHandle,
    pub target: NodeHandle,
    pub trigger: PipelineTrigger,
}

pub fn declare(
    graph: &mut ResourceGraph,
    naming: &Naming,
    registry: &Registry,
    release: &ReleaseDeclaration,
) -> Result<ReleasePipeline> {
    let role = graph
        .declare(ResourceKind::IamRole, "ecs-codepipeline-iam-role")
        .attr("name", naming.name("codepipeline-role"))
        .attr("assume_role_policy", assume_role_policy("codepipeline.amazonaws.com"))
        .finish()?;

    graph
        .declare(ResourceKind::IamRolePolicy, "ecs-codepipeline-iam-policy")
        .attr("name", naming.name("codepipeline-policy"))
        .attr("role", role.id_ref())
        .attr(
            "policy",
            policy_document(vec![
                allow(
                    [
                        "codedeploy:CreateDeployment",
                        "codedeploy:GetApplication",
                        "codedeploy:GetApplicationRevision",
                        "codedeploy:GetDeployment",
                        "codedeploy:GetDeploymentConfig",
                        "codedeploy:RegisterApplicationRevision",
                    ],
                    [release.application.arn(), release.deployment_group.arn()],
                ),
                allow(
                    ["s3:GetObject", "s3:GetObjectVersion", "s3:GetBucketVersioning", "s3:PutObject"],
                    [
                        release.artifact_store.arn(),
                        AttrValue::concat([release.artifact_store.arn(), AttrValue::from("/*")]),
                    ],
                ),
                allow(["ecr:DescribeImages"], [registry.repository.arn()]),
                allow(["ecs:RegisterTaskDefinition", "iam:PassRole"], [AttrValue::from("*")]),
            ]),
        )
        .finish()?;

    let source_stage = AttrValue::map([
        ("name", AttrValue::from(SOURCE_STAGE)),
        (
            "action",
            AttrValue::list([
                action(
                    "Image",
                    "Source",
                    "ECR",
                    AttrValue::map([
                        ("RepositoryName", registry.repository.name_ref()),
                        ("ImageTag", AttrValue::from(RELEASE_TAG)),
                    ]),
                )
                .with("output_artifacts", AttrValue::list([IMAGE_ARTIFACT]))
                .build(),
                action(
                    "Definitions",
                    "Source",
                    "S3",
                    AttrValue::map([
                        ("S3Bucket", release.artifact_store.id_ref()),
                        ("S3ObjectKey", AttrValue::from(DeploymentBundle::ARCHIVE_KEY)),
                        ("PollForSourceChanges", AttrValue::from("false")),
                    ]),
                )
                .with("output_artifacts", AttrValue::list([DEFINITIONS_ARTIFACT]))
                .build(),
            ]),
        ),
    ]);

    let deploy_stage = AttrValue::map([
        ("name", AttrValue::from(DEPLOY_STAGE)),
        (
            "action",
            AttrValue::list([action(
                "Deploy",
                "Deploy",
                "CodeDeployToECS",
                AttrValue::map([
                    ("ApplicationName", release.application.name_ref()),
                    (
                        "DeploymentGroupName",
                        release.deployment_group.reference("deployment_group_name"),
                    ),
                    ("TaskDefinitionTemplateArtifact", AttrValue::from(DEFINITIONS_ARTIFACT)),
                    ("TaskDefinitionTemplatePath", AttrValue::from(DeploymentBundle::TASK_SPEC)),
                    ("AppSpecTemplateArtifact", AttrValue::from(DEFINITIONS_ARTIFACT)),
                    ("AppSpecTemplatePath", AttrValue::from(DeploymentBundle::APP_SPEC)),
                    ("Image1ArtifactName", AttrValue::from(IMAGE_ARTIFACT)),
                    ("Image1ContainerName", AttrValue::from("IMAGE1_NAME")),
                ]),
            )
            .with(
                "input_artifacts",
                AttrValue::list([DEFINITIONS_ARTIFACT, IMAGE_ARTIFACT]),
            )
            .build()]),
        ),
    ]);

    let pipeline_name = naming.name("pipeline");
    let pipeline = graph
        .declare(ResourceKind::Codepipeline, "ecs-pipeline")
        .attr("name", pipeline_name.as_str())
        .attr("role_arn", role.arn())
        .attr(
            "artifact_store",
            AttrValue::map([
                ("location", release.artifact_store.id_ref()),
                ("type", AttrValue::from("S3")),
            ]),
        )
        .attr("stage", AttrValue::list([source_stage, deploy_stage]))
        .depends_on(&release.bundle_object)
        .finish()?;

    let event_role = graph
        .declare(ResourceKind::IamRole, "ecs-cw-pipeline-event-role")
        .attr("name", naming.name("pipeline-event-role"))
        .attr("assume_role_policy", assume_role_policy("events.amazonaws.com"))
        .finish()?;

    // Scoped to this one pipeline.
    graph
        .declare(ResourceKind::IamRolePolicy, "ecs-cw-pipeline-event-role-policy")
        .attr("name", naming.name("pipeline-event-role-policy"))
        .attr("role", event_role.id_ref())
        .attr(
            "policy",
            policy_document(vec![allow(
                ["codepipeline:StartPipelineExecution"],
                [pipeline.arn()],
            )]),
        )
        .finish()?;

    let pattern = EventPattern::registry_push(naming.app());
    let pattern_value =
        serde_json::to_value(&pattern).map_err(|e| Error::Serialization(e.to_string()))?;
    let rule = graph
        .declare(ResourceKind::CloudwatchEventRule, "ecs-ecr-update-rule")
        .attr("name", naming.name("ecr-update"))
        .attr("description", "Start the release pipeline on image push")
        .attr("event_pattern", AttrValue::json(attr_from_json(&pattern_value)))
        .depends_on(&registry.repository)
        .finish()?;

    let target = graph
        .declare(ResourceKind::CloudwatchEventTarget, "ecs-cw-pipeline-target")
        .attr("rule", rule.name_ref())
        .attr("arn", pipeline.arn())
        .attr("role_arn", event_role.arn())
        .finish()?;

    Ok(ReleasePipeline {
        role,
        pipeline,
        event_role,
        rule,
        target,
        trigger: PipelineTrigger::new(pattern, pipeline_name),
    })
}

struct ActionBuilder {
    fields: Vec<(&'static str, AttrValue)>,
}

impl ActionBuilder {
    fn with(mut self, key: &'static str, value: AttrValue) -> Self {
        self.fields.push((key, value));
        self
    }

    fn build(self) -> AttrValue {
        AttrValue::map(self.fields)
    }
}

fn action(name: &str, category: &str, provider: &str, configuration: AttrValue) -> ActionBuilder {
    ActionBuilder {
        fields: vec![
            ("name", AttrValue::from(name)),
            ("category", AttrValue::from(category)),
            ("owner", AttrValue::from("AWS")),
            ("provider", AttrValue::from(provider)),
            ("version", AttrValue::from("1")),
            ("configuration", configuration),
        ],
    }
}
