//! Staging bucket and the function that copies uploaded objects into the
//! shared filesystem.
//!
//! The copy logic itself is deployed from `functions/s3-to-efs`; only its
//! wiring is declared here.

use shipyard_core::access::Protocol;
use shipyard_core::{AttrValue, NodeHandle, ResourceKind, Result};

use crate::binder::{GroupSpec, SecurityGroupBinder};
use crate::components::filesystem::{NFS_PORT, SharedFilesystem};
use crate::components::network::Network;
use crate::components::{allow, assume_role_policy, policy_document};
use crate::graph::ResourceGraph;
use crate::naming::Naming;

pub const MOUNT_PATH: &str = "/mnt/efs";
pub const SOURCE_DIR: &str = "functions/s3-to-efs";

#[derive(Debug, Clone)]
pub struct BulkCopy {
    pub security_group: NodeHandle,
    pub bucket: NodeHandle,
    pub role: NodeHandle,
    pub function: NodeHandle,
    pub notification: NodeHandle,
}

pub fn declare(
    graph: &mut ResourceGraph,
    naming: &Naming,
    binder: &mut SecurityGroupBinder,
    network: &Network,
    filesystem: &SharedFilesystem,
) -> Result<BulkCopy> {
    let security_group = binder.declare_group(
        graph,
        GroupSpec::new(
            "s3-to-efs-lambda-sg",
            naming.name("s3-to-efs-lambda-sg"),
            "Bulk copy function",
            network.vpc_id(),
        ),
    )?;
    binder.admit(
        &filesystem.security_group,
        &security_group,
        Protocol::Tcp,
        NFS_PORT,
        NFS_PORT,
    )?;

    let bucket = graph
        .declare(ResourceKind::S3Bucket, "s3-to-efs-bucket")
        .attr("bucket", naming.name("efs-deploy"))
        .attr("acl", "private")
        .attr("force_destroy", true)
        .attr("versioning", AttrValue::map([("enabled", true)]))
        .attr(
            "lifecycle_rule",
            AttrValue::list([AttrValue::map([
                ("enabled", AttrValue::from(true)),
                (
                    "noncurrent_version_expiration",
                    AttrValue::map([("days", 30i64)]),
                ),
            ])]),
        )
        .attr(
            "server_side_encryption_configuration",
            AttrValue::map([(
                "rule",
                AttrValue::map([(
                    "apply_server_side_encryption_by_default",
                    AttrValue::map([("sse_algorithm", "AES256")]),
                )]),
            )]),
        )
        .finish()?;

    let role = graph
        .declare(ResourceKind::IamRole, "s3-to-efs-lambda-role")
        .attr("name", naming.name("s3-to-efs-lambda-role"))
        .attr("assume_role_policy", assume_role_policy("lambda.amazonaws.com"))
        .finish()?;

    graph
        .declare(ResourceKind::IamRolePolicy, "s3-to-efs-lambda-role-policy")
        .attr("name", naming.name("s3-to-efs-lambda-role-policy"))
        .attr("role", role.id_ref())
        .attr(
            "policy",
            policy_document(vec![
                allow(
                    ["s3:GetObject", "s3:ListBucket"],
                    [
                        bucket.arn(),
                        AttrValue::concat([bucket.arn(), AttrValue::from("/*")]),
                    ],
                ),
                allow(
                    [
                        "elasticfilesystem:ClientMount",
                        "elasticfilesystem:ClientWrite",
                    ],
                    [filesystem.file_system.arn()],
                ),
                allow(
                    [
                        "ec2:CreateNetworkInterface",
                        "ec2:DescribeNetworkInterfaces",
                        "ec2:DeleteNetworkInterface",
                        "logs:CreateLogGroup",
                        "logs:CreateLogStream",
                        "logs:PutLogEvents",
                    ],
                    [AttrValue::from("*")],
                ),
            ]),
        )
        .finish()?;

    let archive = graph
        .declare(ResourceKind::ArchiveFile, "s3-to-efs-lambda-archive")
        .attr("type", "zip")
        .attr("source_dir", SOURCE_DIR)
        .attr("output_path", "s3-to-efs.zip")
        .finish()?;

    let function = graph
        .declare(ResourceKind::LambdaFunction, "s3-to-efs-lambda")
        .attr("function_name", naming.name("s3-to-efs"))
        .attr("filename", archive.reference("output_path"))
        .attr("source_code_hash", archive.reference("output_base64sha256"))
        .attr("handler", "index.handler")
        .attr("runtime", "nodejs12.x")
        .attr("memory_size", 128i64)
        .attr("timeout", 300i64)
        .attr("role", role.arn())
        .attr(
            "vpc_config",
            AttrValue::map([
                ("subnet_ids", network.subnet_ids()),
                (
                    "security_group_ids",
                    AttrValue::list([security_group.id_ref()]),
                ),
            ]),
        )
        .attr(
            "file_system_config",
            AttrValue::map([
                ("arn", filesystem.access_point.arn()),
                ("local_mount_path", AttrValue::from(MOUNT_PATH)),
            ]),
        )
        .attr(
            "environment",
            AttrValue::map([(
                "variables",
                AttrValue::map([("EFS_MOUNT_PATH", MOUNT_PATH)]),
            )]),
        )
        .depends_on_all(&filesystem.mount_targets)
        .finish()?;

    let permission = graph
        .declare(ResourceKind::LambdaPermission, "s3-to-efs-bucket-permission")
        .attr("statement_id", "AllowExecutionFromS3Bucket")
        .attr("action", "lambda:InvokeFunction")
        .attr("function_name", function.arn())
        .attr("principal", "s3.amazonaws.com")
        .attr("source_arn", bucket.arn())
        .finish()?;

    let notification = graph
        .declare(ResourceKind::S3BucketNotification, "s3-to-efs-bucket-notification")
        .attr("bucket", bucket.id_ref())
        .attr(
            "lambda_function",
            AttrValue::list([AttrValue::map([
                ("lambda_function_arn", function.arn()),
                ("events", AttrValue::list(["s3:ObjectCreated:*"])),
            ])]),
        )
        .depends_on(&permission)
        .finish()?;

    Ok(BulkCopy {
        security_group,
        bucket,
        role,
        function,
        notification,
    })
}
