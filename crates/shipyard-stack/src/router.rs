//! Lifecycle event routing to the external notification consumer.

use shipyard_core::event::{Event, EventPattern};
use shipyard_core::notify::NotificationSink;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to one routed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered { rule: String },
    Unmatched,
    /// The sink failed. The failure is logged and goes no further.
    Failed { rule: String, error: String },
}

pub struct NotificationRouter {
    patterns: BTreeMap<String, EventPattern>,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationRouter {
    pub fn new(patterns: BTreeMap<String, EventPattern>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { patterns, sink }
    }

    /// First rule, by name, whose pattern matches.
    pub fn matching_rule(&self, event: &Event) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, pattern)| pattern.matches(event))
            .map(|(name, _)| name.as_str())
    }

    /// Deliver the event once if any rule matches.
    pub async fn route(&self, event: &Event) -> RouteOutcome {
        let Some(rule) = self.matching_rule(event) else {
            debug!(source = %event.source, "no notification rule matches");
            return RouteOutcome::Unmatched;
        };
        let rule = rule.to_string();

        match self.sink.deliver(event).await {
            Ok(()) => {
                info!(rule = %rule, sink = self.sink.name(), "notification delivered");
                RouteOutcome::Delivered { rule }
            }
            Err(e) => {
                warn!(rule = %rule, sink = self.sink.name(), error = %e, "notification delivery failed");
                RouteOutcome::Failed {
                    rule,
                    error: e.to_string(),
                }
            }
        }
    }
}
