use std::sync::Arc;

use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tracing::{info, warn};

use common::Alarm;
use engine::{AlarmEngine, CycleReport};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub engine: Arc<AlarmEngine>,
    pub allowed_user_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the owner.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "PriceWatch commands:")]
pub enum Command {
    #[command(description = "List active alarms")]
    Alarms,
    #[command(description = "List fired alarms")]
    History,
    #[command(description = "Dismiss an active alarm: /dismiss <id>")]
    Dismiss(String),
    #[command(description = "Clear the alarm history")]
    ClearHistory,
    #[command(description = "Check prices now")]
    Check,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(token: String, deps: BotDeps) {
    let bot = Bot::new(token);
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Alarms].endpoint(handle_alarms))
        .branch(case![Command::History].endpoint(handle_history))
        .branch(case![Command::Dismiss(id)].endpoint(handle_dismiss))
        .branch(case![Command::ClearHistory].endpoint(handle_clear_history))
        .branch(case![Command::Check].endpoint(handle_check));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_alarms(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let set = deps.engine.alarms().await?;
    let text = if set.active.is_empty() {
        "No active alarms.".to_string()
    } else {
        list("Active alarms", &set.active)
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_history(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let set = deps.engine.alarms().await?;
    let text = if set.history.is_empty() {
        "No fired alarms.".to_string()
    } else {
        list("Fired alarms", &set.history)
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_dismiss(bot: Bot, msg: Message, id: String, deps: Arc<BotDeps>) -> HandlerResult {
    let id = id.trim();
    if id.is_empty() {
        bot.send_message(msg.chat.id, "Usage: /dismiss <id>").await?;
        return Ok(());
    }

    let before = deps.engine.alarms().await?.active.len();
    let after = deps.engine.dismiss_alarm(id).await?.active.len();
    let reply = if after < before {
        format!("Alarm {id} dismissed.")
    } else {
        format!("No active alarm with id {id}.")
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn handle_clear_history(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    deps.engine.clear_history().await?;
    bot.send_message(msg.chat.id, "Alarm history cleared.").await?;
    Ok(())
}

async fn handle_check(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let reply = match deps.engine.run_cycle().await {
        Ok(report) => describe(&report),
        Err(e) => format!("Price check failed: {e}. Will retry on the next tick."),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Send a proactive alert to all configured chat IDs.
/// Returns how many chats accepted the message.
pub async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) -> usize {
    let mut delivered = 0;
    for &chat_id in chat_ids {
        match bot.send_message(chat_id, message).await {
            Ok(_) => delivered += 1,
            Err(e) => warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert"),
        }
    }
    delivered
}

fn line(alarm: &Alarm) -> String {
    let currency = alarm.currency.to_uppercase();
    let arrow = match alarm.kind {
        common::AlarmKind::Up => "≥",
        common::AlarmKind::Down => "≤",
    };
    match alarm.triggered_price {
        Some(price) => format!(
            "{} {arrow} {currency} {:.2} (hit {currency} {price:.2})",
            alarm.coin_name, alarm.target_price
        ),
        None => format!(
            "{} {arrow} {currency} {:.2} [{}]",
            alarm.coin_name, alarm.target_price, alarm.id
        ),
    }
}

fn list(heading: &str, alarms: &[Alarm]) -> String {
    let mut out = format!("{heading} ({}):", alarms.len());
    for alarm in alarms {
        out.push_str("\n• ");
        out.push_str(&line(alarm));
    }
    out
}

fn describe(report: &CycleReport) -> String {
    match report {
        CycleReport::Skipped => "A price check is already running.".to_string(),
        CycleReport::Idle => "No active alarms to check.".to_string(),
        CycleReport::Quiet { checked } => format!("Checked {checked} alarm(s); none triggered."),
        CycleReport::Fired { alarms } => format!("{} alarm(s) triggered.", alarms.len()),
    }
}
