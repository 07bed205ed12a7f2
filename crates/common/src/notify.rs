use async_trait::async_trait;

use crate::{Alarm, Result};

/// A user-visible side effect performed for every fired alarm.
///
/// Sinks are invoked fire-and-forget by the engine's dispatcher. An `Err`
/// is logged and dropped; the alarm stays in history regardless.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Stable name used for logging and for replacing a sink in place.
    fn name(&self) -> &str;

    async fn notify_fired(&self, alarm: &Alarm) -> Result<()>;

    /// Deliver a test message so the user can verify the channel works.
    async fn send_test(&self) -> Result<()>;
}
