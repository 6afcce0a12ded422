use teloxide::prelude::*;
use tracing::{info, warn};

use crate::admin::AdminGate;
use crate::db::rules::TextField;
use crate::dispatcher::Dispatcher as ForwardDispatcher;
use crate::push::PushEndpoint;
use crate::state::{InteractionState, PendingInput, PendingKind};
use crate::summary::SummaryScheduler;
use crate::sync::{RuleMutation, SyncReport, Synchronizer};
use crate::telegram::bot_api::convert_message;

/// Everything the update handler needs, bundled so the dispatcher tree
/// stays flat.
#[derive(Clone)]
pub struct BotDeps {
    pub forwarder: ForwardDispatcher,
    pub state: InteractionState,
    pub sync: Synchronizer,
    pub scheduler: SummaryScheduler,
    pub admin: AdminGate,
}

pub async fn run_bot(bot: Bot, deps: BotDeps) {
    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

#[tracing::instrument(skip(bot, msg, deps), fields(chat_id = %msg.chat.id, user_id))]
async fn handle_message(bot: Bot, msg: Message, deps: BotDeps) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    let user_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(0);
    tracing::Span::current().record("user_id", user_id);

    // Operator answers to pending menus are consumed before anything else.
    if user_id != 0 && deps.admin.is_admin(user_id) {
        if let Some(text) = msg.text() {
            if text.trim() == "/cancel" {
                if deps.state.clear(user_id, chat_id).await {
                    let _ = bot.send_message(msg.chat.id, "Cancelled.").await;
                }
                return Ok(());
            }

            if let Some(pending) = deps.state.take(user_id, chat_id).await {
                let reply = apply_pending(&deps, &pending, text).await;
                let _ = bot.send_message(msg.chat.id, reply).await;
                return Ok(());
            }
        }
    }

    // Everything else is a candidate for the forwarding engine.
    let message = convert_message(&msg);
    let deps_clone = deps.clone();
    tokio::spawn(async move {
        deps_clone.forwarder.dispatch(message).await;
    });

    Ok(())
}

/// Applies a consumed free-text answer through the synchronized writer path
/// and re-arms the summary scheduler where the mutation calls for it.
async fn apply_pending(deps: &BotDeps, pending: &PendingInput, answer: &str) -> String {
    let answer = answer.trim();
    let mutation = match pending.kind {
        PendingKind::SetAiPrompt => {
            RuleMutation::SetText(TextField::AiPrompt, Some(answer.to_string()))
        }
        PendingKind::SetSummaryPrompt => {
            RuleMutation::SetText(TextField::SummaryPrompt, Some(answer.to_string()))
        }
        PendingKind::SetUserinfoTemplate => {
            RuleMutation::SetText(TextField::UserinfoTemplate, Some(answer.to_string()))
        }
        PendingKind::SetTimeTemplate => {
            RuleMutation::SetText(TextField::TimeTemplate, Some(answer.to_string()))
        }
        PendingKind::SetOriginalLinkTemplate => {
            RuleMutation::SetText(TextField::OriginalLinkTemplate, Some(answer.to_string()))
        }
        PendingKind::AddPushChannel => {
            if let Err(e) = PushEndpoint::parse(answer) {
                return format!("That doesn't look like a notifier URL: {e}");
            }
            RuleMutation::AddPushChannel(answer.to_string())
        }
    };

    match deps.sync.apply(pending.rule_id, mutation).await {
        Ok(report) => {
            reschedule_from(&deps.scheduler, &report).await;
            info!(rule_id = pending.rule_id, peers = report.peers_updated.len(), "setting applied");
            "Saved.".to_string()
        }
        Err(e) => {
            warn!(rule_id = pending.rule_id, error = %e, "failed to apply setting");
            format!("Failed to save: {e}")
        }
    }
}

pub async fn reschedule_from(scheduler: &SummaryScheduler, report: &SyncReport) {
    for rule_id in &report.reschedule {
        scheduler.reschedule(*rule_id).await;
    }
}

/// The operator `bind` flow: resolve both entities, upsert their chat rows,
/// create the forwarding rule with configured defaults.
pub async fn bind_rule(
    db: &crate::db::Db,
    client: &dyn crate::telegram::TelegramIO,
    config: &crate::config::Config,
    source: &str,
    target: &str,
) -> crate::error::Result<crate::models::Rule> {
    let source_entity = client.get_entity(source).await?;
    let target_entity = client.get_entity(target).await?;

    let mut tx = db.begin().await?;
    let source_chat = crate::db::chats::upsert(
        &mut tx,
        &source_entity.id.to_string(),
        &source_entity.display_name(),
    )
    .await?;
    let target_chat = crate::db::chats::upsert(
        &mut tx,
        &target_entity.id.to_string(),
        &target_entity.display_name(),
    )
    .await?;

    let rule = crate::db::rules::create(
        &mut tx,
        source_chat.id,
        target_chat.id,
        config.default_max_media_size,
        &config.default_summary_time,
    )
    .await?;
    crate::db::chats::set_current_edit_rule(&mut tx, target_chat.id, Some(rule.id)).await?;
    tx.commit().await.map_err(crate::error::Error::Database)?;

    info!(rule_id = rule.id, source = %source_entity.id, target = %target_entity.id, "rule bound");
    Ok(rule)
}

/// The operator `delete_rule` flow: row cascade plus the on-disk RSS wipe.
pub async fn delete_rule(
    db: &crate::db::Db,
    store: &crate::rss::RssStore,
    scheduler: &SummaryScheduler,
    rule_id: i64,
) -> crate::error::Result<()> {
    let mut tx = db.begin().await?;
    crate::db::rules::delete_cascade(&mut tx, rule_id).await?;
    tx.commit().await.map_err(crate::error::Error::Database)?;

    scheduler.cancel(rule_id).await;
    store.delete_rule(rule_id).await?;
    info!(rule_id, "rule deleted");
    Ok(())
}
