//! Notification sink trait.

use async_trait::async_trait;

use crate::Result;
use crate::event::Event;

/// An external consumer of lifecycle events (chat webhook, pager, ...).
///
/// Delivery failures are reported to the caller, which must never let them
/// affect infrastructure state.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, event: &Event) -> Result<()>;
}
