//! Component declarations.
//!
//! Each component exposes a `declare` function that takes the graph, the
//! naming scheme and only the handles of the components it builds on, and
//! returns the handles of what it declared.

pub mod backup;
pub mod bulk_copy;
pub mod compute;
pub mod database;
pub mod filesystem;
pub mod load_balancer;
pub mod network;
pub mod notifications;
pub mod pipeline;
pub mod providers;
pub mod registry;
pub mod release;

use serde_json::Value;
use shipyard_core::AttrValue;

/// Trust policy letting one service principal assume a role.
pub(crate) fn assume_role_policy(service: &str) -> AttrValue {
    AttrValue::json(AttrValue::map([
        ("Version", AttrValue::from("2012-10-17")),
        (
            "Statement",
            AttrValue::list([AttrValue::map([
                ("Action", AttrValue::from("sts:AssumeRole")),
                ("Effect", AttrValue::from("Allow")),
                (
                    "Principal",
                    AttrValue::map([("Service", AttrValue::from(service))]),
                ),
            ])]),
        ),
    ]))
}

/// One `Allow` statement of a policy document.
pub(crate) fn allow<A, R>(actions: A, resources: R) -> AttrValue
where
    A: IntoIterator<Item = &'static str>,
    R: IntoIterator<Item = AttrValue>,
{
    AttrValue::map([
        ("Effect", AttrValue::from("Allow")),
        ("Action", AttrValue::list(actions)),
        ("Resource", AttrValue::list(resources)),
    ])
}

/// Policy document from its statements.
pub(crate) fn policy_document(statements: Vec<AttrValue>) -> AttrValue {
    AttrValue::json(AttrValue::map([
        ("Version", AttrValue::from("2012-10-17")),
        ("Statement", AttrValue::List(statements)),
    ]))
}

/// Literal attribute value from a JSON value.
pub(crate) fn attr_from_json(value: &Value) -> AttrValue {
    match value {
        Value::Null => AttrValue::Null,
        Value::Bool(b) => AttrValue::Bool(*b),
        Value::Number(n) => n
            .as_i64()
            .map(AttrValue::Int)
            .or_else(|| n.as_f64().map(AttrValue::Float))
            .unwrap_or(AttrValue::Null),
        Value::String(s) => AttrValue::Str(s.clone()),
        Value::Array(items) => AttrValue::List(items.iter().map(attr_from_json).collect()),
        Value::Object(map) => AttrValue::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), attr_from_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attr_from_json_round_trips_through_render() {
        let value = json!({"source": ["aws.ecr"], "detail": {"count": 2, "ok": true}});
        assert_eq!(attr_from_json(&value).render(), value);
    }

    #[test]
    fn test_assume_role_policy_names_the_service() {
        let rendered = assume_role_policy("ecs-tasks.amazonaws.com").render();
        let doc: Value = serde_json::from_str(rendered.as_str().unwrap()).unwrap();
        assert_eq!(
            doc["Statement"][0]["Principal"]["Service"],
            "ecs-tasks.amazonaws.com"
        );
    }
}
