use async_trait::async_trait;
use notify_rust::Notification;
use tracing::debug;

use common::{Alarm, Error, NotificationSink, Result};

use crate::message::AlertMessage;

const APP_NAME: &str = "PriceWatch";

/// OS notification popup via the platform notification service.
#[derive(Debug, Default, Clone)]
pub struct DesktopNotifier;

impl DesktopNotifier {
    pub fn new() -> Self {
        Self
    }

    /// The platform call is blocking (D-Bus on Linux), so run it off the runtime.
    async fn show(&self, summary: String, body: String) -> Result<()> {
        tokio::task::spawn_blocking(move || {
            Notification::new()
                .appname(APP_NAME)
                .summary(&summary)
                .body(&body)
                .show()
                .map(|_| ())
                .map_err(|e| Error::Notify(format!("desktop notification failed: {e}")))
        })
        .await
        .map_err(|e| Error::Notify(format!("desktop notification task failed: {e}")))?
    }
}

#[async_trait]
impl NotificationSink for DesktopNotifier {
    fn name(&self) -> &str {
        "desktop"
    }

    async fn notify_fired(&self, alarm: &Alarm) -> Result<()> {
        let msg = AlertMessage::for_alarm(alarm);
        debug!(alarm_id = %alarm.id, "Showing desktop notification");
        self.show(msg.title, msg.body).await
    }

    async fn send_test(&self) -> Result<()> {
        self.show(
            format!("{APP_NAME} - Test Notification"),
            format!("This is a test desktop notification from {APP_NAME}."),
        )
        .await
    }
}
