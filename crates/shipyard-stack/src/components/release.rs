//! Blue/green release declaration: artifact store, deployment bundle archive,
//! release application and deployment group.

use serde_json::Value;
use shipyard_core::bundle::{AppSpec, DeploymentBundle};
use shipyard_core::release::{DeploymentColor, ReleasePolicy};
use shipyard_core::{AttrValue, Error, NodeHandle, ResourceKind, Result};

use crate::components::compute::ComputeCluster;
use crate::components::load_balancer::LoadBalancer;
use crate::components::registry::Registry;
use crate::components::{allow, assume_role_policy, attr_from_json, policy_document};
use crate::graph::ResourceGraph;
use crate::naming::Naming;

#[derive(Debug, Clone)]
pub struct ReleaseDeclaration {
    pub artifact_store: NodeHandle,
    pub role: NodeHandle,
    pub bundle_archive: NodeHandle,
    pub bundle_object: NodeHandle,
    pub application: NodeHandle,
    pub deployment_group: NodeHandle,
    pub policy: ReleasePolicy,
}

pub fn declare(
    graph: &mut ResourceGraph,
    naming: &Naming,
    policy: &ReleasePolicy,
    registry: &Registry,
    load_balancer: &LoadBalancer,
    compute: &ComputeCluster,
) -> Result<ReleaseDeclaration> {
    let artifact_store = graph
        .declare(ResourceKind::S3Bucket, "ecs-artifact-store")
        .attr("bucket", naming.name("artifact-store"))
        .attr("acl", "private")
        .attr("force_destroy", true)
        .attr("versioning", AttrValue::map([("enabled", true)]))
        .finish()?;

    let role = graph
        .declare(ResourceKind::IamRole, "ecs-codedeploy-iam-role")
        .attr("name", naming.name("codedeploy-role"))
        .attr("assume_role_policy", assume_role_policy("codedeploy.amazonaws.com"))
        .finish()?;

    graph
        .declare(ResourceKind::IamRolePolicy, "ecs-codedeploy-iam-policy")
        .attr("name", naming.name("codedeploy-policy"))
        .attr("role", role.id_ref())
        .attr(
            "policy",
            policy_document(vec![
                allow(
                    [
                        "ecs:DescribeServices",
                        "ecs:CreateTaskSet",
                        "ecs:UpdateServicePrimaryTaskSet",
                        "ecs:DeleteTaskSet",
                        "elasticloadbalancing:DescribeTargetGroups",
                        "elasticloadbalancing:DescribeListeners",
                        "elasticloadbalancing:ModifyListener",
                        "elasticloadbalancing:DescribeRules",
                        "elasticloadbalancing:ModifyRule",
                        "cloudwatch:DescribeAlarms",
                    ],
                    [AttrValue::from("*")],
                ),
                allow(["iam:PassRole"], [compute.execution_role.arn()]),
                allow(
                    ["s3:GetObject", "s3:GetObjectVersion"],
                    [AttrValue::concat([artifact_store.arn(), AttrValue::from("/*")])],
                ),
            ]),
        )
        .finish()?;

    let app_spec = app_spec(compute, &policy.platform_version)?;
    let bundle_archive = graph
        .declare(ResourceKind::ArchiveFile, "ecs-defs-zip")
        .attr("type", "zip")
        .attr("output_path", DeploymentBundle::ARCHIVE_KEY)
        .attr(
            "source",
            AttrValue::list([
                bundle_source(
                    DeploymentBundle::IMAGE_DEFINITIONS,
                    image_definitions(registry, compute),
                ),
                bundle_source(DeploymentBundle::TASK_SPEC, task_spec(compute)),
                bundle_source(DeploymentBundle::APP_SPEC, app_spec),
            ]),
        )
        .finish()?;

    let bundle_object = graph
        .declare(ResourceKind::S3BucketObject, "ecs-artifact-store-key")
        .attr("bucket", artifact_store.id_ref())
        .attr("key", DeploymentBundle::ARCHIVE_KEY)
        .attr("source", bundle_archive.reference("output_path"))
        .attr("etag", bundle_archive.reference("output_md5"))
        .finish()?;

    let application = graph
        .declare(ResourceKind::CodedeployApp, "ecs-codedeploy-app")
        .attr("name", naming.app())
        .attr("compute_platform", "ECS")
        .finish()?;

    // Target pairs list the pool serving traffic first.
    let pools = [
        load_balancer.pool(DeploymentColor::Green),
        load_balancer.pool(DeploymentColor::Blue),
    ];
    let deployment_group = graph
        .declare(ResourceKind::CodedeployDeploymentGroup, "ecs-codedeploy-group")
        .attr("app_name", application.name_ref())
        .attr("deployment_group_name", naming.name("deployment-group"))
        .attr("deployment_config_name", policy.deployment_config.as_str())
        .attr("service_role_arn", role.arn())
        .attr(
            "auto_rollback_configuration",
            AttrValue::map([
                ("enabled", AttrValue::from(true)),
                (
                    "events",
                    AttrValue::list(ReleasePolicy::AUTO_ROLLBACK_EVENTS.iter().copied()),
                ),
            ]),
        )
        .attr(
            "blue_green_deployment_config",
            AttrValue::map([
                (
                    "deployment_ready_option",
                    AttrValue::map([("action_on_timeout", ReleasePolicy::READINESS_ACTION)]),
                ),
                (
                    "terminate_blue_instances_on_deployment_success",
                    AttrValue::map([
                        ("action", AttrValue::from("TERMINATE")),
                        (
                            "termination_wait_time_in_minutes",
                            AttrValue::Int(policy.termination_wait_minutes() as i64),
                        ),
                    ]),
                ),
            ]),
        )
        .attr(
            "deployment_style",
            AttrValue::map([
                ("deployment_option", "WITH_TRAFFIC_CONTROL"),
                ("deployment_type", "BLUE_GREEN"),
            ]),
        )
        .attr(
            "ecs_service",
            AttrValue::map([
                ("cluster_name", compute.cluster.name_ref()),
                ("service_name", compute.service.name_ref()),
            ]),
        )
        .attr(
            "load_balancer_info",
            AttrValue::map([(
                "target_group_pair_info",
                AttrValue::map([
                    (
                        "prod_traffic_route",
                        AttrValue::map([(
                            "listener_arns",
                            AttrValue::list([load_balancer.listener.arn()]),
                        )]),
                    ),
                    (
                        "target_group",
                        AttrValue::List(
                            pools
                                .iter()
                                .map(|pool| AttrValue::map([("name", pool.name_ref())]))
                                .collect(),
                        ),
                    ),
                ]),
            )]),
        )
        .finish()?;

    Ok(ReleaseDeclaration {
        artifact_store,
        role,
        bundle_archive,
        bundle_object,
        application,
        deployment_group,
        policy: policy.clone(),
    })
}

fn bundle_source(filename: &str, content: AttrValue) -> AttrValue {
    AttrValue::map([
        ("filename", AttrValue::from(filename)),
        ("content", content),
    ])
}

fn image_definitions(registry: &Registry, compute: &ComputeCluster) -> AttrValue {
    AttrValue::json(AttrValue::list([AttrValue::map([
        ("name", compute.service.name_ref()),
        ("imageUri", registry.release_image()),
    ])]))
}

fn task_spec(compute: &ComputeCluster) -> AttrValue {
    let task = &compute.task_definition;
    AttrValue::json(AttrValue::map([
        ("taskDefinitionArn", task.arn()),
        ("family", task.reference("family")),
        ("revision", task.reference("revision")),
        ("taskRoleArn", compute.execution_role.arn()),
        ("executionRoleArn", compute.execution_role.arn()),
        ("networkMode", AttrValue::from("awsvpc")),
        ("containerDefinitions", compute.container_definitions.clone()),
        ("volumes", task.reference("volume")),
        ("requiresCompatibilities", AttrValue::list(["FARGATE"])),
        ("cpu", task.reference("cpu")),
        ("memory", task.reference("memory")),
    ]))
}

/// Placeholder for the task definition ARN, known only once the graph applies.
const TASK_DEFINITION_SLOT: &str = "task-definition-arn";

fn app_spec(compute: &ComputeCluster, platform_version: &str) -> Result<AttrValue> {
    let spec = AppSpec::ecs_service(
        TASK_DEFINITION_SLOT,
        &compute.container_name,
        compute.container_port,
        platform_version,
    );
    let value = serde_json::to_value(&spec).map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(AttrValue::yaml(fill_slot(
        &value,
        TASK_DEFINITION_SLOT,
        &compute.task_definition.arn(),
    )))
}

fn fill_slot(value: &Value, slot: &str, reference: &AttrValue) -> AttrValue {
    match value {
        Value::String(s) if s == slot => reference.clone(),
        Value::Array(items) => AttrValue::List(
            items
                .iter()
                .map(|item| fill_slot(item, slot, reference))
                .collect(),
        ),
        Value::Object(map) => AttrValue::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), fill_slot(v, slot, reference)))
                .collect(),
        ),
        other => attr_from_json(other),
    }
}
