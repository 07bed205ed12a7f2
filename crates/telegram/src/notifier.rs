use async_trait::async_trait;
use teloxide::prelude::*;

use common::{Alarm, Error, NotificationSink, Result};
use notify::AlertMessage;

use crate::commands::send_alert;

/// Pushes fired alarms to the configured Telegram chats.
pub struct TelegramNotifier {
    bot: Bot,
    chat_ids: Vec<ChatId>,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_ids: &[i64]) -> Self {
        Self {
            bot: Bot::new(token),
            chat_ids: chat_ids.iter().map(|&id| ChatId(id)).collect(),
        }
    }

    /// Fails only when no chat at all accepted the message.
    async fn broadcast(&self, text: &str) -> Result<()> {
        if self.chat_ids.is_empty() {
            return Ok(());
        }
        match send_alert(&self.bot, &self.chat_ids, text).await {
            0 => Err(Error::Notify("no Telegram chat accepted the alert".into())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify_fired(&self, alarm: &Alarm) -> Result<()> {
        let msg = AlertMessage::for_alarm(alarm);
        self.broadcast(&format!("🔔 {}\n{}", msg.title, msg.body)).await
    }

    async fn send_test(&self) -> Result<()> {
        self.broadcast("✅ PriceWatch test notification.").await
    }
}
