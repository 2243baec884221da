//! Resource nodes, attribute values and references.
//!
//! A [`ResourceNode`] is one declared piece of infrastructure. Its attributes
//! are [`AttrValue`]s which may contain [`Reference`]s to attributes of other
//! nodes. Every reference is a hard dependency: the referenced node must be
//! provisioned before its generated identifiers can be read.

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::id::NodeId;

/// Type tag of a resource node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    AwsProvider,
    ArchiveProvider,
    AvailabilityZones,
    DefaultVpc,
    Vpc,
    DefaultSubnet,
    Subnet,
    InternetGateway,
    RouteTable,
    RouteTableAssociation,
    VpcEndpoint,
    SecurityGroup,
    EcrRepository,
    Alb,
    AlbTargetGroup,
    AlbListener,
    EfsFileSystem,
    EfsMountTarget,
    EfsAccessPoint,
    S3Bucket,
    S3BucketObject,
    S3BucketNotification,
    IamRole,
    IamRolePolicy,
    IamPolicyAttachment,
    ArchiveFile,
    LambdaFunction,
    LambdaPermission,
    RdsCluster,
    SsmParameter,
    CloudwatchLogGroup,
    EcsCluster,
    EcsTaskDefinition,
    EcsService,
    AppautoscalingTarget,
    AppautoscalingPolicy,
    CodedeployApp,
    CodedeployDeploymentGroup,
    Codepipeline,
    CloudwatchEventRule,
    CloudwatchEventTarget,
    SnsTopic,
    SnsTopicSubscription,
    BackupVault,
    BackupPlan,
    BackupSelection,
}

impl ResourceKind {
    /// Provider type name of this kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceKind::AwsProvider => "aws",
            ResourceKind::ArchiveProvider => "archive",
            ResourceKind::AvailabilityZones => "aws_availability_zones",
            ResourceKind::DefaultVpc => "aws_default_vpc",
            ResourceKind::Vpc => "aws_vpc",
            ResourceKind::DefaultSubnet => "aws_default_subnet",
            ResourceKind::Subnet => "aws_subnet",
            ResourceKind::InternetGateway => "aws_internet_gateway",
            ResourceKind::RouteTable => "aws_route_table",
            ResourceKind::RouteTableAssociation => "aws_route_table_association",
            ResourceKind::VpcEndpoint => "aws_vpc_endpoint",
            ResourceKind::SecurityGroup => "aws_security_group",
            ResourceKind::EcrRepository => "aws_ecr_repository",
            ResourceKind::Alb => "aws_alb",
            ResourceKind::AlbTargetGroup => "aws_alb_target_group",
            ResourceKind::AlbListener => "aws_alb_listener",
            ResourceKind::EfsFileSystem => "aws_efs_file_system",
            ResourceKind::EfsMountTarget => "aws_efs_mount_target",
            ResourceKind::EfsAccessPoint => "aws_efs_access_point",
            ResourceKind::S3Bucket => "aws_s3_bucket",
            ResourceKind::S3BucketObject => "aws_s3_bucket_object",
            ResourceKind::S3BucketNotification => "aws_s3_bucket_notification",
            ResourceKind::IamRole => "aws_iam_role",
            ResourceKind::IamRolePolicy => "aws_iam_role_policy",
            ResourceKind::IamPolicyAttachment => "aws_iam_policy_attachment",
            ResourceKind::ArchiveFile => "archive_file",
            ResourceKind::LambdaFunction => "aws_lambda_function",
            ResourceKind::LambdaPermission => "aws_lambda_permission",
            ResourceKind::RdsCluster => "aws_rds_cluster",
            ResourceKind::SsmParameter => "aws_ssm_parameter",
            ResourceKind::CloudwatchLogGroup => "aws_cloudwatch_log_group",
            ResourceKind::EcsCluster => "aws_ecs_cluster",
            ResourceKind::EcsTaskDefinition => "aws_ecs_task_definition",
            ResourceKind::EcsService => "aws_ecs_service",
            ResourceKind::AppautoscalingTarget => "aws_appautoscaling_target",
            ResourceKind::AppautoscalingPolicy => "aws_appautoscaling_policy",
            ResourceKind::CodedeployApp => "aws_codedeploy_app",
            ResourceKind::CodedeployDeploymentGroup => "aws_codedeploy_deployment_group",
            ResourceKind::Codepipeline => "aws_codepipeline",
            ResourceKind::CloudwatchEventRule => "aws_cloudwatch_event_rule",
            ResourceKind::CloudwatchEventTarget => "aws_cloudwatch_event_target",
            ResourceKind::SnsTopic => "aws_sns_topic",
            ResourceKind::SnsTopicSubscription => "aws_sns_topic_subscription",
            ResourceKind::BackupVault => "aws_backup_vault",
            ResourceKind::BackupPlan => "aws_backup_plan",
            ResourceKind::BackupSelection => "aws_backup_selection",
        }
    }

    pub fn is_data_source(&self) -> bool {
        matches!(self, ResourceKind::AvailabilityZones | ResourceKind::ArchiveFile)
    }

    pub fn is_provider(&self) -> bool {
        matches!(self, ResourceKind::AwsProvider | ResourceKind::ArchiveProvider)
    }

    /// Address of a node of this kind, as used in reference tokens.
    pub fn address(&self, id: &NodeId) -> String {
        if self.is_provider() {
            format!("provider.{}.{}", self.type_name(), id)
        } else if self.is_data_source() {
            format!("data.{}.{}", self.type_name(), id)
        } else {
            format!("{}.{}", self.type_name(), id)
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

impl Serialize for ResourceKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.type_name())
    }
}

/// A reference to an attribute of another node.
///
/// The attribute may index into a list attribute, e.g. `names[0]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    pub node: NodeId,
    pub kind: ResourceKind,
    pub attribute: String,
}

impl Reference {
    /// Interpolation token, e.g. `${aws_security_group.alb-sg.id}`.
    pub fn token(&self) -> String {
        format!("${{{}.{}}}", self.kind.address(&self.node), self.attribute)
    }

    /// Split the attribute into its base name and optional list index.
    pub fn path(&self) -> (&str, Option<usize>) {
        if let Some(open) = self.attribute.find('[') {
            if let Some(index) = self
                .attribute
                .strip_suffix(']')
                .and_then(|s| s[open + 1..].parse::<usize>().ok())
            {
                return (&self.attribute[..open], Some(index));
            }
        }
        (&self.attribute, None)
    }
}

/// Value of a node attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A string that is masked when the graph is rendered.
    Sensitive(String),
    Ref(Reference),
    /// String concatenation of the rendered parts.
    Concat(Vec<AttrValue>),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
    /// A value embedded as a JSON document string (policies, container definitions).
    Json(Box<AttrValue>),
    /// A value embedded as a YAML document string (deployment specifications).
    Yaml(Box<AttrValue>),
}

impl AttrValue {
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<AttrValue>,
    {
        AttrValue::List(items.into_iter().map(Into::into).collect())
    }

    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttrValue>,
    {
        AttrValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn concat<I, V>(parts: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<AttrValue>,
    {
        AttrValue::Concat(parts.into_iter().map(Into::into).collect())
    }

    pub fn json(value: impl Into<AttrValue>) -> Self {
        AttrValue::Json(Box::new(value.into()))
    }

    pub fn yaml(value: impl Into<AttrValue>) -> Self {
        AttrValue::Yaml(Box::new(value.into()))
    }

    pub fn sensitive(value: impl Into<String>) -> Self {
        AttrValue::Sensitive(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            AttrValue::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Look up a key in a map value.
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        match self {
            AttrValue::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Collect the ids of every node referenced anywhere in this value.
    pub fn collect_references(&self, out: &mut BTreeSet<NodeId>) {
        match self {
            AttrValue::Ref(r) => {
                out.insert(r.node.clone());
            }
            AttrValue::Concat(items) | AttrValue::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            AttrValue::Map(m) => {
                for item in m.values() {
                    item.collect_references(out);
                }
            }
            AttrValue::Json(inner) | AttrValue::Yaml(inner) => inner.collect_references(out),
            _ => {}
        }
    }

    pub fn references(&self) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out);
        out
    }

    /// Render to JSON, with references as interpolation tokens and sensitive
    /// values masked.
    pub fn render(&self) -> Value {
        self.to_value(&mut |r| Some(Value::String(r.token())), true)
            .unwrap_or(Value::Null)
    }

    /// Resolve to concrete JSON using provisioned outputs. Returns the first
    /// reference that cannot be resolved.
    pub fn resolve<F>(&self, mut lookup: F) -> std::result::Result<Value, Reference>
    where
        F: FnMut(&Reference) -> Option<Value>,
    {
        let mut missing = None;
        let value = self.to_value(
            &mut |r| {
                let found = lookup(r);
                if found.is_none() && missing.is_none() {
                    missing = Some(r.clone());
                }
                found
            },
            false,
        );
        match (value, missing) {
            (Some(v), None) => Ok(v),
            (_, Some(r)) => Err(r),
            (None, None) => Ok(Value::Null),
        }
    }

    fn to_value(
        &self,
        lookup: &mut dyn FnMut(&Reference) -> Option<Value>,
        mask: bool,
    ) -> Option<Value> {
        Some(match self {
            AttrValue::Null => Value::Null,
            AttrValue::Bool(b) => Value::Bool(*b),
            AttrValue::Int(i) => Value::from(*i),
            AttrValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            AttrValue::Str(s) => Value::String(s.clone()),
            AttrValue::Sensitive(_) if mask => Value::String("(sensitive)".to_string()),
            AttrValue::Sensitive(s) => Value::String(s.clone()),
            AttrValue::Ref(r) => lookup(r)?,
            AttrValue::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part.to_value(lookup, mask)? {
                        Value::String(s) => out.push_str(&s),
                        other => out.push_str(&other.to_string()),
                    }
                }
                Value::String(out)
            }
            AttrValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(|i| i.to_value(lookup, mask))
                    .collect::<Option<Vec<_>>>()?,
            ),
            AttrValue::Map(m) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in m {
                    obj.insert(k.clone(), v.to_value(lookup, mask)?);
                }
                Value::Object(obj)
            }
            AttrValue::Json(inner) => Value::String(inner.to_value(lookup, mask)?.to_string()),
            AttrValue::Yaml(inner) => {
                Value::String(serde_yaml::to_string(&inner.to_value(lookup, mask)?).ok()?)
            }
        })
    }
}

impl Serialize for AttrValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.render().serialize(serializer)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<&String> for AttrValue {
    fn from(s: &String) -> Self {
        AttrValue::Str(s.clone())
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<i32> for AttrValue {
    fn from(i: i32) -> Self {
        AttrValue::Int(i64::from(i))
    }
}

impl From<u16> for AttrValue {
    fn from(i: u16) -> Self {
        AttrValue::Int(i64::from(i))
    }
}

impl From<u32> for AttrValue {
    fn from(i: u32) -> Self {
        AttrValue::Int(i64::from(i))
    }
}

impl From<f64> for AttrValue {
    fn from(f: f64) -> Self {
        AttrValue::Float(f)
    }
}

impl From<Reference> for AttrValue {
    fn from(r: Reference) -> Self {
        AttrValue::Ref(r)
    }
}

impl From<Vec<AttrValue>> for AttrValue {
    fn from(items: Vec<AttrValue>) -> Self {
        AttrValue::List(items)
    }
}

impl From<BTreeMap<String, AttrValue>> for AttrValue {
    fn from(m: BTreeMap<String, AttrValue>) -> Self {
        AttrValue::Map(m)
    }
}

/// Lifecycle phase of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Declared,
    Provisioned,
    Patched,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Declared => write!(f, "declared"),
            Phase::Provisioned => write!(f, "provisioned"),
            Phase::Patched => write!(f, "patched"),
        }
    }
}

/// A declared resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub attributes: BTreeMap<String, AttrValue>,
    /// Hard dependencies: every referenced node plus explicit ones.
    pub depends_on: BTreeSet<NodeId>,
    pub phase: Phase,
}

impl ResourceNode {
    pub fn new(kind: ResourceKind, id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            kind,
            attributes: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            phase: Phase::Declared,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle::new(self.kind, self.id.clone())
    }

    /// Ids of every node referenced by this node's attributes.
    pub fn referenced_nodes(&self) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::new();
        for value in self.attributes.values() {
            value.collect_references(&mut out);
        }
        out
    }

    pub fn mark_provisioned(&mut self) {
        self.phase = Phase::Provisioned;
    }

    /// Replace the patched attribute wholesale.
    pub fn apply_patch(&mut self, patch: &Patch) {
        self.attributes
            .insert(patch.attribute.clone(), patch.value.clone());
        self.phase = Phase::Patched;
    }
}

/// A deferred replace-all update of one attribute of one node.
///
/// Patch references are not hard dependencies; they are resolved after every
/// node has been provisioned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patch {
    pub target: NodeId,
    pub attribute: String,
    pub value: AttrValue,
}

impl Patch {
    pub fn references(&self) -> BTreeSet<NodeId> {
        self.value.references()
    }
}

/// Read-only handle to a node already in the graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeHandle {
    id: NodeId,
    kind: ResourceKind,
}

impl NodeHandle {
    pub fn new(kind: ResourceKind, id: NodeId) -> Self {
        Self { id, kind }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn reference(&self, attribute: impl Into<String>) -> AttrValue {
        AttrValue::Ref(Reference {
            node: self.id.clone(),
            kind: self.kind,
            attribute: attribute.into(),
        })
    }

    pub fn id_ref(&self) -> AttrValue {
        self.reference("id")
    }

    pub fn arn(&self) -> AttrValue {
        self.reference("arn")
    }

    pub fn name_ref(&self) -> AttrValue {
        self.reference("name")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sg(id: &str) -> NodeHandle {
        NodeHandle::new(ResourceKind::SecurityGroup, NodeId::from(id))
    }

    #[test]
    fn test_reference_tokens() {
        let alb = sg("alb-sg");
        let azs = NodeHandle::new(ResourceKind::AvailabilityZones, "defaultAZs".into());

        assert_eq!(
            alb.id_ref().render(),
            json!("${aws_security_group.alb-sg.id}")
        );
        assert_eq!(
            azs.reference("names[1]").render(),
            json!("${data.aws_availability_zones.defaultAZs.names[1]}")
        );
    }

    #[test]
    fn test_reference_path_with_index() {
        let azs = NodeHandle::new(ResourceKind::AvailabilityZones, "defaultAZs".into());
        let r = azs.reference("names[2]");
        assert_eq!(r.as_reference().unwrap().path(), ("names", Some(2)));

        let plain = sg("x").id_ref();
        assert_eq!(plain.as_reference().unwrap().path(), ("id", None));
    }

    #[test]
    fn test_collect_references_walks_nested_values() {
        let value = AttrValue::map([
            ("groups", AttrValue::list([sg("a").id_ref(), sg("b").id_ref()])),
            (
                "policy",
                AttrValue::json(AttrValue::map([("Resource", sg("c").arn())])),
            ),
            ("name", AttrValue::concat(["service/", "x"])),
        ]);

        let refs: Vec<_> = value.references().into_iter().collect();
        assert_eq!(refs, vec![NodeId::from("a"), "b".into(), "c".into()]);
    }

    #[test]
    fn test_render_masks_sensitive_and_embeds_json() {
        let value = AttrValue::map([
            ("password", AttrValue::sensitive("hunter2")),
            ("doc", AttrValue::json(AttrValue::map([("a", 1i64)]))),
        ]);

        assert_eq!(
            value.render(),
            json!({"password": "(sensitive)", "doc": "{\"a\":1}"})
        );
    }

    #[test]
    fn test_yaml_embeds_resolved_references() {
        let task = NodeHandle::new(ResourceKind::EcsTaskDefinition, "ecs-task".into());
        let value = AttrValue::yaml(AttrValue::map([("TaskDefinition", task.arn())]));

        assert_eq!(value.references().len(), 1);
        let rendered = value.render();
        let rendered = rendered.as_str().unwrap();
        assert!(rendered.starts_with("TaskDefinition: "));
        assert!(rendered.contains("${aws_ecs_task_definition.ecs-task.arn}"));

        let resolved = value.resolve(|_| Some(json!("arn-task-1"))).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(resolved.as_str().unwrap()).unwrap();
        assert_eq!(parsed["TaskDefinition"], serde_yaml::Value::from("arn-task-1"));
    }

    #[test]
    fn test_resolve_uses_lookup_and_reports_missing() {
        let cluster = NodeHandle::new(ResourceKind::EcsCluster, "ecs-cluster".into());
        let value = AttrValue::concat([
            AttrValue::from("service/"),
            cluster.name_ref(),
            AttrValue::from("/app"),
        ]);

        let resolved = value
            .resolve(|_| Some(json!("my-cluster")))
            .unwrap();
        assert_eq!(resolved, json!("service/my-cluster/app"));

        let missing = value.resolve(|_| None).unwrap_err();
        assert_eq!(missing.node, NodeId::from("ecs-cluster"));
    }

    #[test]
    fn test_resolve_keeps_sensitive_values() {
        let value = AttrValue::sensitive("hunter2");
        assert_eq!(value.resolve(|_| None).unwrap(), json!("hunter2"));
    }

    #[test]
    fn test_apply_patch_replaces_attribute() {
        let mut node = ResourceNode::new(ResourceKind::SecurityGroup, "efs-data-sg");
        node.attributes
            .insert("ingress".to_string(), AttrValue::list(["old"]));

        let patch = Patch {
            target: node.id.clone(),
            attribute: "ingress".to_string(),
            value: AttrValue::list(["new"]),
        };
        node.apply_patch(&patch);
        node.apply_patch(&patch);

        assert_eq!(node.phase, Phase::Patched);
        assert_eq!(
            node.attribute("ingress").unwrap(),
            &AttrValue::list(["new"])
        );
    }
}
