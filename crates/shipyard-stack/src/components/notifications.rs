//! Notification fan-out: topic, delivery function and one event rule per
//! configured pattern.

use shipyard_config::app::SlackConfig;
use shipyard_core::event::EventPattern;
use shipyard_core::{AttrValue, Error, NodeHandle, ResourceKind, Result};
use std::collections::BTreeMap;

use crate::components::{allow, assume_role_policy, attr_from_json, policy_document};
use crate::graph::ResourceGraph;
use crate::naming::Naming;

pub const SOURCE_DIR: &str = "functions/slack-notification";

/// Rule and target declared for one named pattern.
#[derive(Debug, Clone)]
pub struct NotificationRule {
    pub name: String,
    pub pattern: EventPattern,
    pub rule: NodeHandle,
    pub target: NodeHandle,
}

#[derive(Debug, Clone)]
pub struct Notifications {
    pub role: NodeHandle,
    pub function: NodeHandle,
    pub topic: NodeHandle,
    pub subscription: NodeHandle,
    /// Sorted by name.
    pub rules: Vec<NotificationRule>,
}

impl Notifications {
    pub fn patterns(&self) -> BTreeMap<String, EventPattern> {
        self.rules
            .iter()
            .map(|r| (r.name.clone(), r.pattern.clone()))
            .collect()
    }
}

pub fn declare(
    graph: &mut ResourceGraph,
    naming: &Naming,
    slack: &SlackConfig,
    events: &BTreeMap<String, EventPattern>,
) -> Result<Notifications> {
    let role = graph
        .declare(ResourceKind::IamRole, "slack-notifications-role")
        .attr("name", naming.name("slack-notifications-role"))
        .attr("assume_role_policy", assume_role_policy("lambda.amazonaws.com"))
        .finish()?;

    graph
        .declare(ResourceKind::IamRolePolicy, "slack-notifications-policy")
        .attr("name", naming.name("slack-notifications-policy"))
        .attr("role", role.id_ref())
        .attr(
            "policy",
            policy_document(vec![allow(
                [
                    "logs:CreateLogGroup",
                    "logs:CreateLogStream",
                    "logs:PutLogEvents",
                ],
                [AttrValue::from("arn:aws:logs:*:*:*")],
            )]),
        )
        .finish()?;

    let archive = graph
        .declare(ResourceKind::ArchiveFile, "slack-notification-lambda-file")
        .attr("type", "zip")
        .attr("source_dir", SOURCE_DIR)
        .attr("output_path", "slack-notification.zip")
        .finish()?;

    let function = graph
        .declare(ResourceKind::LambdaFunction, "slack-notification-lambda-function")
        .attr("function_name", naming.name("slack-notifications"))
        .attr("filename", archive.reference("output_path"))
        .attr("source_code_hash", archive.reference("output_base64sha256"))
        .attr("handler", "index.handler")
        .attr("runtime", "nodejs12.x")
        .attr("role", role.arn())
        .attr(
            "environment",
            AttrValue::map([(
                "variables",
                AttrValue::map([
                    ("SLACK_WEBHOOK_URL", AttrValue::sensitive(slack.webhook_url.as_str())),
                    ("CHANNEL", AttrValue::from(slack.channel.as_str())),
                    ("USERNAME", AttrValue::from(slack.username.as_str())),
                    ("ICON_EMOJI", AttrValue::from(slack.icon.as_str())),
                ]),
            )]),
        )
        .finish()?;

    let topic = graph
        .declare(ResourceKind::SnsTopic, "notifications-topic")
        .attr("name", naming.name("notifications"))
        .finish()?;

    let subscription = graph
        .declare(ResourceKind::SnsTopicSubscription, "sns-lambda-subscription")
        .attr("topic_arn", topic.arn())
        .attr("protocol", "lambda")
        .attr("endpoint", function.arn())
        .finish()?;

    graph
        .declare(ResourceKind::LambdaPermission, "notifications-lambda-permission")
        .attr("statement_id", "AllowExecutionFromSNS")
        .attr("action", "lambda:InvokeFunction")
        .attr("function_name", function.reference("function_name"))
        .attr("principal", "sns.amazonaws.com")
        .attr("source_arn", topic.arn())
        .finish()?;

    let mut rules = Vec::with_capacity(events.len());
    for (name, pattern) in events {
        let value =
            serde_json::to_value(pattern).map_err(|e| Error::Serialization(e.to_string()))?;
        let rule = graph
            .declare(ResourceKind::CloudwatchEventRule, format!("cw-sns-rule-{}", name))
            .attr("name", naming.name(name))
            .attr("description", format!("Forward {} events to notifications", name))
            .attr("event_pattern", AttrValue::json(attr_from_json(&value)))
            .finish()?;
        let target = graph
            .declare(ResourceKind::CloudwatchEventTarget, format!("cw-sns-target-{}", name))
            .attr("rule", rule.name_ref())
            .attr("arn", topic.arn())
            .finish()?;
        rules.push(NotificationRule {
            name: name.clone(),
            pattern: pattern.clone(),
            rule,
            target,
        });
    }

    Ok(Notifications {
        role,
        function,
        topic,
        subscription,
        rules,
    })
}
