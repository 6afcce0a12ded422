mod admin;
mod ai;
mod bot;
mod chat_updater;
mod config;
mod db;
mod dispatcher;
mod error;
mod logging;
mod models;
mod pipeline;
mod push;
mod rss;
mod state;
mod summary;
mod sync;
mod telegram;
mod utils;

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info};

use crate::admin::AdminGate;
use crate::ai::AiRegistry;
use crate::bot::BotDeps;
use crate::config::Config;
use crate::db::Db;
use crate::dispatcher::Dispatcher;
use crate::pipeline::PipelineEnv;
use crate::push::PushSender;
use crate::rss::RssStore;
use crate::state::InteractionState;
use crate::summary::SummaryScheduler;
use crate::sync::Synchronizer;
use crate::telegram::{bot_api::BotApi, TelegramClients};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();

    let config = Arc::new(Config::from_env());
    tokio::fs::create_dir_all(config.base_dir.join("db")).await?;
    tokio::fs::create_dir_all(config.temp_dir()).await?;
    utils::clear_temp_dir(&config.temp_dir()).await;

    let db = Db::new(&config.database_url).await?;
    let tg_bot = Bot::new(&config.bot_token);

    // The user-session client is an external collaborator; when none is
    // wired in, user-only operations degrade gracefully.
    let clients = TelegramClients {
        bot: Arc::new(BotApi::new(tg_bot.clone())),
        user: None,
    };

    let ai = AiRegistry::new(&config);
    let store = Arc::new(RssStore::new(
        config.rss_data_path.clone(),
        config.rss_media_path.clone(),
    ));

    let env = PipelineEnv {
        db: db.clone(),
        clients: clients.clone(),
        ai: ai.clone(),
        push: PushSender::new(),
        rss: store.clone(),
        config: config.clone(),
    };

    let scheduler = SummaryScheduler::new(db.clone(), clients.clone(), ai.clone(), config.clone());
    scheduler.start_all().await?;

    let deps = BotDeps {
        forwarder: Dispatcher::new(env),
        state: InteractionState::new(),
        sync: Synchronizer::new(db.clone()),
        scheduler,
        admin: AdminGate::new(config.admins.clone()),
    };

    let bot_task = bot::run_bot(tg_bot, deps);

    let refresher = tokio::spawn(chat_updater::run(
        config.clone(),
        db.clone(),
        clients.clone(),
    ));

    if config.rss_enabled {
        let rss_task = rss::server::run_server(config.clone(), db, store);
        info!("starting bot, RSS service and chat refresher");
        tokio::select! {
            _ = bot_task => error!("bot task finished unexpectedly"),
            _ = rss_task => error!("RSS task finished unexpectedly"),
            _ = refresher => error!("refresher task finished unexpectedly"),
        }
    } else {
        info!("starting bot and chat refresher (RSS disabled)");
        tokio::select! {
            _ = bot_task => error!("bot task finished unexpectedly"),
            _ = refresher => error!("refresher task finished unexpectedly"),
        }
    }

    Ok(())
}
