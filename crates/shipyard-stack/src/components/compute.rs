//! Container cluster, task specification, service and autoscaling.

use shipyard_config::app::{AutoScalingConfig, ContainerConfig};
use shipyard_core::access::Protocol;
use shipyard_core::{AttrValue, NodeHandle, ResourceKind, Result, Toggle};
use tracing::debug;

use crate::binder::{GroupSpec, SecurityGroupBinder};
use crate::components::database::{Database, MYSQL_PORT};
use crate::components::filesystem::{NFS_PORT, SharedFilesystem};
use crate::components::load_balancer::LoadBalancer;
use crate::components::network::Network;
use crate::components::registry::Registry;
use crate::components::{allow, assume_role_policy, policy_document};
use crate::graph::ResourceGraph;
use crate::naming::Naming;

/// Volume name the container mounts the shared filesystem through.
pub const VOLUME_NAME: &str = "efs-vol";
pub const EXECUTION_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy";

/// A secret injected into the container from the secret store.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretRef {
    pub name: String,
    pub value_from: NodeHandle,
}

/// Everything [`declare`] needs from the rest of the stack.
pub struct ComputeInputs<'a> {
    pub region: &'a str,
    pub network: &'a Network,
    pub registry: &'a Registry,
    pub load_balancer: &'a LoadBalancer,
    pub filesystem: &'a SharedFilesystem,
    pub database: Toggle<&'a Database>,
    pub container: &'a ContainerConfig,
    pub auto_scaling: &'a AutoScalingConfig,
}

#[derive(Debug, Clone)]
pub struct ComputeCluster {
    pub security_group: NodeHandle,
    pub log_group: NodeHandle,
    pub execution_role: NodeHandle,
    pub cluster: NodeHandle,
    pub task_definition: NodeHandle,
    pub service: NodeHandle,
    pub autoscaling_target: NodeHandle,
    pub autoscaling_policy: NodeHandle,
    pub container_name: String,
    pub container_port: u16,
    /// Structured container definitions, before JSON embedding.
    pub container_definitions: AttrValue,
    /// Empty unless the database is enabled.
    pub secret_refs: Vec<SecretRef>,
    pub desired_count: u32,
}

pub fn declare(
    graph: &mut ResourceGraph,
    naming: &Naming,
    binder: &mut SecurityGroupBinder,
    inputs: ComputeInputs<'_>,
) -> Result<ComputeCluster> {
    let container_name = naming.app().to_string();

    let log_group = graph
        .declare(ResourceKind::CloudwatchLogGroup, "log-group")
        .attr("name", format!("/ecs/{}", naming.app()))
        .attr("retention_in_days", 30i64)
        .finish()?;

    let execution_role = graph
        .declare(ResourceKind::IamRole, "ecs-task-execution-role")
        .attr("name", naming.name("ecs-task-execution-role"))
        .attr("assume_role_policy", assume_role_policy("ecs-tasks.amazonaws.com"))
        .finish()?;

    let secret_refs: Vec<SecretRef> = match &inputs.database {
        Toggle::Enabled(database) => database
            .secrets
            .iter()
            .map(|secret| SecretRef {
                name: secret.env_name.to_string(),
                value_from: secret.parameter.clone(),
            })
            .collect(),
        Toggle::Disabled => Vec::new(),
    };

    let mut role_ready = Vec::new();
    if !secret_refs.is_empty() {
        let policy = graph
            .declare(ResourceKind::IamRolePolicy, "ecs-task-execution-role-policy")
            .attr("name", naming.name("ecs-task-execution-role-policy"))
            .attr("role", execution_role.id_ref())
            .attr(
                "policy",
                policy_document(vec![allow(
                    ["ssm:GetParameters", "ssm:GetParameter"],
                    secret_refs.iter().map(|s| s.value_from.arn()),
                )]),
            )
            .finish()?;
        role_ready.push(policy);
    }
    let attachment = graph
        .declare(
            ResourceKind::IamPolicyAttachment,
            "ecs-task-execution-policy-attachment",
        )
        .attr("name", naming.name("ecs-task-execution-policy-attachment"))
        .attr("roles", AttrValue::list([execution_role.name_ref()]))
        .attr("policy_arn", EXECUTION_POLICY_ARN)
        .finish()?;
    role_ready.push(attachment);

    let security_group = binder.declare_group(
        graph,
        GroupSpec::new(
            "ecs-sg",
            naming.name("ecs-sg"),
            "Container tasks",
            inputs.network.vpc_id(),
        ),
    )?;
    binder.admit(
        &security_group,
        &inputs.load_balancer.security_group,
        Protocol::All,
        0,
        0,
    )?;
    binder.admit(
        &inputs.filesystem.security_group,
        &security_group,
        Protocol::Tcp,
        NFS_PORT,
        NFS_PORT,
    )?;
    if let Toggle::Enabled(database) = &inputs.database {
        binder.admit(
            &database.security_group,
            &security_group,
            Protocol::Tcp,
            MYSQL_PORT,
            MYSQL_PORT,
        )?;
    }

    let cluster = graph
        .declare(ResourceKind::EcsCluster, "ecs-cluster")
        .attr("name", naming.name("cluster"))
        .attr("capacity_providers", AttrValue::list(["FARGATE_SPOT", "FARGATE"]))
        .attr(
            "default_capacity_provider_strategy",
            AttrValue::list([AttrValue::map([
                ("capacity_provider", AttrValue::from("FARGATE_SPOT")),
                ("weight", AttrValue::from(1i64)),
            ])]),
        )
        .attr(
            "setting",
            AttrValue::list([AttrValue::map([
                ("name", "containerInsights"),
                ("value", "disabled"),
            ])]),
        )
        .attr(
            "configuration",
            AttrValue::map([(
                "execute_command_configuration",
                AttrValue::map([
                    ("logging", AttrValue::from("OVERRIDE")),
                    (
                        "log_configuration",
                        AttrValue::map([(
                            "cloud_watch_log_group_name",
                            log_group.name_ref(),
                        )]),
                    ),
                ]),
            )]),
        )
        .finish()?;

    let container = inputs.container;
    let mut definition = vec![
        ("name", AttrValue::from(container_name.as_str())),
        ("image", inputs.registry.release_image()),
        ("essential", AttrValue::from(true)),
        ("cpu", AttrValue::from(container.cpu)),
        ("memory", AttrValue::from(container.memory)),
        (
            "portMappings",
            AttrValue::list([AttrValue::map([
                ("containerPort", AttrValue::from(container.port)),
                ("hostPort", AttrValue::from(container.port)),
                ("protocol", AttrValue::from("tcp")),
            ])]),
        ),
        (
            "environment",
            AttrValue::List(
                container
                    .environment
                    .iter()
                    .map(|var| {
                        AttrValue::map([
                            ("name", var.name.as_str()),
                            ("value", var.value.as_str()),
                        ])
                    })
                    .collect(),
            ),
        ),
        (
            "mountPoints",
            AttrValue::List(
                container
                    .mount_points
                    .iter()
                    .map(|mount| {
                        AttrValue::map([
                            ("sourceVolume", mount.source_volume.as_str()),
                            ("containerPath", mount.container_path.as_str()),
                        ])
                    })
                    .collect(),
            ),
        ),
        (
            "linuxParameters",
            AttrValue::map([("initProcessEnabled", true)]),
        ),
        (
            "logConfiguration",
            AttrValue::map([
                ("logDriver", AttrValue::from("awslogs")),
                (
                    "options",
                    AttrValue::map([
                        ("awslogs-group", log_group.name_ref()),
                        ("awslogs-region", AttrValue::from(inputs.region)),
                        ("awslogs-stream-prefix", AttrValue::from("container-stdout")),
                    ]),
                ),
            ]),
        ),
    ];
    if !secret_refs.is_empty() {
        definition.push((
            "secrets",
            AttrValue::List(
                secret_refs
                    .iter()
                    .map(|s| {
                        AttrValue::map([
                            ("name", AttrValue::from(s.name.as_str())),
                            ("valueFrom", s.value_from.arn()),
                        ])
                    })
                    .collect(),
            ),
        ));
    }
    let container_definitions = AttrValue::list([AttrValue::map(definition)]);

    let task_definition = graph
        .declare(ResourceKind::EcsTaskDefinition, "ecs-task")
        .attr("family", naming.app())
        .attr("requires_compatibilities", AttrValue::list(["FARGATE"]))
        .attr("network_mode", "awsvpc")
        .attr("cpu", container.cpu)
        .attr("memory", container.memory)
        .attr("execution_role_arn", execution_role.arn())
        .attr("task_role_arn", execution_role.arn())
        .attr("container_definitions", AttrValue::json(container_definitions.clone()))
        .attr(
            "volume",
            AttrValue::list([AttrValue::map([
                ("name", AttrValue::from(VOLUME_NAME)),
                (
                    "efs_volume_configuration",
                    AttrValue::map([
                        ("file_system_id", inputs.filesystem.file_system.id_ref()),
                        ("transit_encryption", AttrValue::from("ENABLED")),
                        (
                            "authorization_config",
                            AttrValue::map([
                                ("access_point_id", inputs.filesystem.access_point.id_ref()),
                                ("iam", AttrValue::from("DISABLED")),
                            ]),
                        ),
                    ]),
                ),
            ])]),
        )
        .depends_on_all(&role_ready)
        .finish()?;

    let desired_count = inputs.auto_scaling.min;
    let green_pool = &inputs.load_balancer.green_pool;
    let service = graph
        .declare(ResourceKind::EcsService, "ecs-service")
        .attr("name", naming.name("service"))
        .attr("cluster", cluster.id_ref())
        .attr("task_definition", task_definition.arn())
        .attr("desired_count", desired_count)
        .attr("platform_version", "LATEST")
        .attr("enable_execute_command", true)
        .attr("deployment_minimum_healthy_percent", 100i64)
        .attr(
            "capacity_provider_strategy",
            AttrValue::list([AttrValue::map([
                ("capacity_provider", AttrValue::from("FARGATE_SPOT")),
                ("weight", AttrValue::from(1i64)),
            ])]),
        )
        .attr(
            "deployment_controller",
            AttrValue::map([("type", "CODE_DEPLOY")]),
        )
        .attr(
            "network_configuration",
            AttrValue::map([
                ("subnets", inputs.network.subnet_ids()),
                ("security_groups", AttrValue::list([security_group.id_ref()])),
                ("assign_public_ip", AttrValue::from(true)),
            ]),
        )
        .attr(
            "load_balancer",
            AttrValue::list([AttrValue::map([
                ("target_group_arn", green_pool.arn()),
                ("container_name", AttrValue::from(container_name.as_str())),
                ("container_port", AttrValue::from(container.port)),
            ])]),
        )
        .attr(
            "lifecycle",
            AttrValue::map([("ignore_changes", AttrValue::list(["desired_count"]))]),
        )
        .depends_on(&inputs.load_balancer.listener)
        .finish()?;

    let scaling = inputs.auto_scaling;
    let autoscaling_target = graph
        .declare(ResourceKind::AppautoscalingTarget, "ecs-autoscaling-target")
        .attr("min_capacity", scaling.min)
        .attr("max_capacity", scaling.max)
        .attr(
            "resource_id",
            AttrValue::concat([
                AttrValue::from("service/"),
                cluster.name_ref(),
                AttrValue::from("/"),
                service.name_ref(),
            ]),
        )
        .attr("scalable_dimension", "ecs:service:DesiredCount")
        .attr("service_namespace", "ecs")
        .finish()?;

    let autoscaling_policy = graph
        .declare(ResourceKind::AppautoscalingPolicy, "ecs-autoscaling-policy")
        .attr("name", naming.name("cpu-autoscaling"))
        .attr("policy_type", "TargetTrackingScaling")
        .attr("resource_id", autoscaling_target.reference("resource_id"))
        .attr(
            "scalable_dimension",
            autoscaling_target.reference("scalable_dimension"),
        )
        .attr(
            "service_namespace",
            autoscaling_target.reference("service_namespace"),
        )
        .attr(
            "target_tracking_scaling_policy_configuration",
            AttrValue::map([
                (
                    "predefined_metric_specification",
                    AttrValue::map([(
                        "predefined_metric_type",
                        "ECSServiceAverageCPUUtilization",
                    )]),
                ),
                ("target_value", AttrValue::from(scaling.cpu_target)),
                ("scale_in_cooldown", AttrValue::from(scaling.scale_in_cooldown)),
                ("scale_out_cooldown", AttrValue::from(scaling.scale_out_cooldown)),
            ]),
        )
        .finish()?;

    debug!(
        secrets = secret_refs.len(),
        desired_count,
        "declared compute cluster"
    );

    Ok(ComputeCluster {
        security_group,
        log_group,
        execution_role,
        cluster,
        task_definition,
        service,
        autoscaling_target,
        autoscaling_policy,
        container_name,
        container_port: container.port,
        container_definitions,
        secret_refs,
        desired_count,
    })
}
