pub mod chats;
pub mod keywords;
pub mod media;
pub mod push;
pub mod replace_rules;
pub mod rss_configs;
pub mod rules;
pub mod sync_edges;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use std::str::FromStr;

/// Handle to the relational store. Cheap to clone; all mutations that must
/// fan out to sync peers run inside one transaction obtained from here.
#[derive(Clone)]
pub struct Db {
    pub pool: Pool<Sqlite>,
}

impl Db {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // A pooled `:memory:` database would open one blank database per
        // connection; pin it to a single connection instead.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                telegram_id TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL DEFAULT '',
                current_edit_rule_id INTEGER
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_chat_id INTEGER NOT NULL,
                target_chat_id INTEGER NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                use_bot_account INTEGER NOT NULL DEFAULT 1,
                handle_mode TEXT NOT NULL DEFAULT 'forward',
                only_rss INTEGER NOT NULL DEFAULT 0,
                add_mode TEXT NOT NULL DEFAULT 'whitelist',
                forward_mode TEXT NOT NULL DEFAULT 'blacklist',
                reverse_blacklist INTEGER NOT NULL DEFAULT 0,
                reverse_whitelist INTEGER NOT NULL DEFAULT 0,
                is_filter_user_info INTEGER NOT NULL DEFAULT 0,
                is_keyword_after_ai INTEGER NOT NULL DEFAULT 0,
                replace_enabled INTEGER NOT NULL DEFAULT 0,
                message_mode TEXT NOT NULL DEFAULT 'markdown',
                preview_mode TEXT NOT NULL DEFAULT 'off',
                include_original_link INTEGER NOT NULL DEFAULT 0,
                original_link_template TEXT,
                include_sender INTEGER NOT NULL DEFAULT 0,
                userinfo_template TEXT,
                include_time INTEGER NOT NULL DEFAULT 0,
                time_template TEXT,
                delete_original INTEGER NOT NULL DEFAULT 0,
                delay_enabled INTEGER NOT NULL DEFAULT 0,
                delay_seconds INTEGER NOT NULL DEFAULT 0,
                media_type_filter_enabled INTEGER NOT NULL DEFAULT 0,
                media_size_filter_enabled INTEGER NOT NULL DEFAULT 0,
                max_media_size_mb REAL NOT NULL DEFAULT 10,
                notify_on_oversize INTEGER NOT NULL DEFAULT 0,
                extension_filter_enabled INTEGER NOT NULL DEFAULT 0,
                extension_filter_mode TEXT NOT NULL DEFAULT 'blacklist',
                media_allow_text INTEGER NOT NULL DEFAULT 1,
                ai_enabled INTEGER NOT NULL DEFAULT 0,
                ai_model TEXT,
                ai_prompt TEXT,
                ai_upload_image INTEGER NOT NULL DEFAULT 0,
                summary_enabled INTEGER NOT NULL DEFAULT 0,
                summary_time TEXT NOT NULL DEFAULT '07:00',
                summary_prompt TEXT,
                pin_summary INTEGER NOT NULL DEFAULT 0,
                comment_button_enabled INTEGER NOT NULL DEFAULT 0,
                sync_enabled INTEGER NOT NULL DEFAULT 0,
                push_enabled INTEGER NOT NULL DEFAULT 0,
                only_push INTEGER NOT NULL DEFAULT 0,
                UNIQUE(source_chat_id, target_chat_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS keywords (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                is_regex INTEGER NOT NULL DEFAULT 0,
                is_blacklist INTEGER NOT NULL DEFAULT 0,
                UNIQUE(rule_id, text, is_regex, is_blacklist)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS replace_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id INTEGER NOT NULL,
                pattern TEXT NOT NULL,
                replacement TEXT NOT NULL,
                UNIQUE(rule_id, pattern, replacement)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS media_type_flags (
                rule_id INTEGER PRIMARY KEY,
                photo INTEGER NOT NULL DEFAULT 0,
                document INTEGER NOT NULL DEFAULT 0,
                video INTEGER NOT NULL DEFAULT 0,
                audio INTEGER NOT NULL DEFAULT 0,
                voice INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS media_extensions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id INTEGER NOT NULL,
                extension TEXT NOT NULL,
                UNIQUE(rule_id, extension)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS push_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id INTEGER NOT NULL,
                channel_url TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                media_send_mode TEXT NOT NULL DEFAULT 'single',
                UNIQUE(rule_id, channel_url)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rule_syncs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id INTEGER NOT NULL,
                peer_rule_id INTEGER NOT NULL,
                UNIQUE(rule_id, peer_rule_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rss_configs (
                rule_id INTEGER PRIMARY KEY,
                enabled INTEGER NOT NULL DEFAULT 0,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                language TEXT NOT NULL DEFAULT 'en',
                max_items INTEGER NOT NULL DEFAULT 50
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn test_db() -> Db {
    Db::new("sqlite::memory:").await.expect("in-memory db")
}
