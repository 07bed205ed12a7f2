pub mod commands;
pub mod notifier;

pub use commands::{send_alert, start_bot, BotDeps, Command};
pub use notifier::TelegramNotifier;
