use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::{self, Db};
use crate::summary::next_fire;
use crate::telegram::TelegramClients;

/// Daily background task that refreshes cached chat display names at
/// `CHAT_UPDATE_TIME`.
pub async fn run(config: Arc<Config>, db: Db, clients: TelegramClients) {
    loop {
        let now = Utc::now();
        let Some(next) = next_fire(&config.chat_update_time, config.timezone, now) else {
            warn!(time = %config.chat_update_time, "invalid CHAT_UPDATE_TIME, refresher disabled");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        debug!(at = %next, "next chat-name refresh");
        tokio::time::sleep(wait).await;

        if let Err(e) = refresh_all(&db, &clients).await {
            warn!(error = %e, "chat name refresh failed");
        }
    }
}

async fn refresh_all(db: &Db, clients: &TelegramClients) -> anyhow::Result<()> {
    let chats = {
        let mut conn = db.pool.acquire().await?;
        db::chats::all(&mut conn).await?
    };

    let client = clients.user_or_bot();
    let mut updated = 0usize;

    for chat in chats {
        let entity = match client.get_entity(&chat.telegram_id).await {
            Ok(entity) => entity,
            Err(e) => {
                debug!(telegram_id = %chat.telegram_id, error = %e, "skipping chat refresh");
                continue;
            }
        };

        let name = entity.display_name();
        if name != chat.display_name && !name.is_empty() {
            let mut conn = db.pool.acquire().await?;
            db::chats::set_display_name(&mut conn, chat.id, &name).await?;
            updated += 1;
        }
    }

    info!(updated, "chat names refreshed");
    Ok(())
}
