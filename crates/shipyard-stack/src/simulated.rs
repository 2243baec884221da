//! In-memory provisioner for dry runs and tests.
//!
//! Generates deterministic identifiers and the outputs other nodes read,
//! without talking to any cloud API.

use async_trait::async_trait;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use shipyard_core::provisioner::{ProvisionedNode, Provisioner};
use shipyard_core::{Error, NodeId, ResourceKind, ResourceNode, Result};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;
use tracing::debug;

pub const ACCOUNT_ID: &str = "123456789012";

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPatch {
    pub node: NodeId,
    pub attribute: String,
    pub value: Value,
}

pub struct SimulatedProvisioner {
    region: String,
    fail_on: BTreeSet<NodeId>,
    provisioned: Mutex<Vec<NodeId>>,
    patches: Mutex<Vec<RecordedPatch>>,
}

impl SimulatedProvisioner {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            fail_on: BTreeSet::new(),
            provisioned: Mutex::new(Vec::new()),
            patches: Mutex::new(Vec::new()),
        }
    }

    /// Make provisioning of one node fail.
    pub fn fail_on(mut self, id: impl Into<NodeId>) -> Self {
        self.fail_on.insert(id.into());
        self
    }

    pub async fn provisioned(&self) -> Vec<NodeId> {
        self.provisioned.lock().await.clone()
    }

    pub async fn patches(&self) -> Vec<RecordedPatch> {
        self.patches.lock().await.clone()
    }

    fn short_hash(id: &NodeId) -> String {
        let digest = Sha256::digest(id.as_str().as_bytes());
        hex::encode(&digest[..4])
    }

    fn identifier(&self, node: &ResourceNode) -> String {
        let hash = Self::short_hash(&node.id);
        let prefix = match node.kind {
            ResourceKind::AwsProvider | ResourceKind::ArchiveProvider => {
                return node.id.to_string();
            }
            ResourceKind::AvailabilityZones => return self.region.clone(),
            ResourceKind::DefaultVpc | ResourceKind::Vpc => "vpc",
            ResourceKind::DefaultSubnet | ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "igw",
            ResourceKind::RouteTable => "rtb",
            ResourceKind::RouteTableAssociation => "rtbassoc",
            ResourceKind::VpcEndpoint => "vpce",
            ResourceKind::SecurityGroup => "sg",
            ResourceKind::EfsFileSystem => "fs",
            ResourceKind::EfsMountTarget => "fsmt",
            ResourceKind::EfsAccessPoint => "fsap",
            _ => "res",
        };
        format!("{}-{}", prefix, hash)
    }

    fn service(kind: ResourceKind) -> &'static str {
        match kind {
            ResourceKind::Alb | ResourceKind::AlbTargetGroup | ResourceKind::AlbListener => {
                "elasticloadbalancing"
            }
            ResourceKind::EfsFileSystem | ResourceKind::EfsMountTarget | ResourceKind::EfsAccessPoint => {
                "elasticfilesystem"
            }
            ResourceKind::S3Bucket | ResourceKind::S3BucketObject | ResourceKind::S3BucketNotification => "s3",
            ResourceKind::IamRole | ResourceKind::IamRolePolicy | ResourceKind::IamPolicyAttachment => "iam",
            ResourceKind::LambdaFunction | ResourceKind::LambdaPermission => "lambda",
            ResourceKind::RdsCluster => "rds",
            ResourceKind::SsmParameter => "ssm",
            ResourceKind::CloudwatchLogGroup => "logs",
            ResourceKind::EcrRepository => "ecr",
            ResourceKind::EcsCluster | ResourceKind::EcsTaskDefinition | ResourceKind::EcsService => "ecs",
            ResourceKind::AppautoscalingTarget | ResourceKind::AppautoscalingPolicy => {
                "application-autoscaling"
            }
            ResourceKind::CodedeployApp | ResourceKind::CodedeployDeploymentGroup => "codedeploy",
            ResourceKind::Codepipeline => "codepipeline",
            ResourceKind::CloudwatchEventRule | ResourceKind::CloudwatchEventTarget => "events",
            ResourceKind::SnsTopic | ResourceKind::SnsTopicSubscription => "sns",
            ResourceKind::BackupVault | ResourceKind::BackupPlan | ResourceKind::BackupSelection => "backup",
            _ => "ec2",
        }
    }

    /// Outputs the engine would report for a node.
    ///
    /// Archives keep the engine's `output_base64sha256` and `output_md5`
    /// attribute names so `source_code_hash` and `etag` references resolve,
    /// but both carry hex digests of the archive inputs: the full SHA-256
    /// and its first 16 bytes respectively. Neither is base64 or MD5.
    fn outputs(
        &self,
        node: &ResourceNode,
        inputs: &BTreeMap<String, Value>,
        identifier: &str,
    ) -> BTreeMap<String, Value> {
        let name = ["name", "function_name", "bucket", "cluster_identifier", "family"]
            .iter()
            .find_map(|key| inputs.get(*key).and_then(Value::as_str))
            .unwrap_or(identifier)
            .to_string();
        let hash = Self::short_hash(&node.id);

        let mut outputs = BTreeMap::new();
        if !node.kind.is_provider() && !node.kind.is_data_source() {
            outputs.insert(
                "arn".to_string(),
                json!(format!(
                    "arn:aws:{}:{}:{}:{}/{}",
                    Self::service(node.kind),
                    self.region,
                    ACCOUNT_ID,
                    node.kind.type_name().trim_start_matches("aws_"),
                    name
                )),
            );
        }

        match node.kind {
            ResourceKind::AvailabilityZones => {
                let names: Vec<String> = ["a", "b", "c"]
                    .iter()
                    .map(|suffix| format!("{}{}", self.region, suffix))
                    .collect();
                outputs.insert("names".to_string(), json!(names));
            }
            ResourceKind::DefaultVpc | ResourceKind::Vpc => {
                outputs.insert(
                    "default_route_table_id".to_string(),
                    json!(format!("rtb-{}", hash)),
                );
            }
            ResourceKind::EcrRepository => {
                outputs.insert(
                    "repository_url".to_string(),
                    json!(format!(
                        "{}.dkr.ecr.{}.amazonaws.com/{}",
                        ACCOUNT_ID, self.region, name
                    )),
                );
            }
            ResourceKind::Alb => {
                outputs.insert(
                    "dns_name".to_string(),
                    json!(format!("{}-{}.{}.elb.amazonaws.com", name, hash, self.region)),
                );
            }
            ResourceKind::RdsCluster => {
                outputs.insert(
                    "endpoint".to_string(),
                    json!(format!(
                        "{}.cluster-{}.{}.rds.amazonaws.com",
                        name, hash, self.region
                    )),
                );
            }
            ResourceKind::EcsTaskDefinition => {
                outputs.insert("revision".to_string(), json!(1));
            }
            ResourceKind::ArchiveFile => {
                let digest = Sha256::digest(Value::Object(inputs.clone().into_iter().collect()).to_string());
                outputs.insert("output_base64sha256".to_string(), json!(hex::encode(digest)));
                outputs.insert("output_md5".to_string(), json!(hex::encode(&digest[..16])));
            }
            _ => {}
        }
        outputs
    }
}

#[async_trait]
impl Provisioner for SimulatedProvisioner {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn provision(
        &self,
        node: &ResourceNode,
        inputs: &BTreeMap<String, Value>,
    ) -> Result<ProvisionedNode> {
        if self.fail_on.contains(&node.id) {
            return Err(Error::Internal(format!(
                "simulated failure provisioning {}",
                node.id
            )));
        }

        let identifier = self.identifier(node);
        let outputs = self.outputs(node, inputs, &identifier);
        debug!(node = %node.id, identifier = %identifier, "simulated provision");
        self.provisioned.lock().await.push(node.id.clone());

        Ok(ProvisionedNode {
            identifier,
            outputs,
        })
    }

    async fn patch(&self, node: &ResourceNode, attribute: &str, value: &Value) -> Result<()> {
        if self.fail_on.contains(&node.id) {
            return Err(Error::Internal(format!("simulated failure patching {}", node.id)));
        }
        self.patches.lock().await.push(RecordedPatch {
            node: node.id.clone(),
            attribute: attribute.to_string(),
            value: value.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identifiers_are_deterministic() {
        let provisioner = SimulatedProvisioner::new("us-east-1");
        let node = ResourceNode::new(ResourceKind::SecurityGroup, "ecs-sg");
        let inputs = BTreeMap::from([("name".to_string(), json!("app-ecs-sg"))]);

        let first = provisioner.provision(&node, &inputs).await.unwrap();
        let second = provisioner.provision(&node, &inputs).await.unwrap();
        assert_eq!(first, second);
        assert!(first.identifier.starts_with("sg-"));
        assert_eq!(
            first.outputs["arn"],
            "arn:aws:ec2:us-east-1:123456789012:security_group/app-ecs-sg"
        );
        assert_eq!(provisioner.provisioned().await.len(), 2);
    }

    #[tokio::test]
    async fn test_archive_digests_are_hex_encoded() {
        let provisioner = SimulatedProvisioner::new("us-east-1");
        let node = ResourceNode::new(ResourceKind::ArchiveFile, "ecs-defs-zip");
        let inputs = BTreeMap::from([("output_path".to_string(), json!("ecs-defs.zip"))]);

        let provisioned = provisioner.provision(&node, &inputs).await.unwrap();
        let sha = provisioned.outputs["output_base64sha256"].as_str().unwrap();
        let md5 = provisioned.outputs["output_md5"].as_str().unwrap();
        assert_eq!(sha.len(), 64);
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(md5, &sha[..32]);
    }

    #[tokio::test]
    async fn test_configured_failure() {
        let provisioner = SimulatedProvisioner::new("us-east-1").fail_on("alb");
        let node = ResourceNode::new(ResourceKind::Alb, "alb");
        assert!(provisioner.provision(&node, &BTreeMap::new()).await.is_err());
        assert!(provisioner.provisioned().await.is_empty());
    }
}
