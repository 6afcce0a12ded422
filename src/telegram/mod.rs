pub mod bot_api;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::MessageMode;

/// Minimal entity shape the core needs from either client.
#[derive(Debug, Clone, Default)]
pub struct EntityInfo {
    pub id: i64,
    pub title: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub broadcast: bool,
}

impl EntityInfo {
    pub fn display_name(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        let name = match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => format!("{f} {l}"),
            (Some(f), None) => f.clone(),
            (None, Some(l)) => l.clone(),
            (None, None) => String::new(),
        };
        if !name.is_empty() {
            return name;
        }
        self.username
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Document,
    Video,
    Audio,
    Voice,
}

#[derive(Debug, Clone)]
pub struct TgMedia {
    pub kind: MediaKind,
    pub size_bytes: i64,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub file_id: Option<String>,
    /// The message's only "media" is a generated link preview; treated as
    /// plain text by the media stage.
    pub is_link_preview: bool,
}

#[derive(Debug, Clone)]
pub struct TgSender {
    pub id: i64,
    pub name: String,
}

/// Concrete message record with the fields the pipeline needs; adapters
/// translate transport messages into this shape.
#[derive(Debug, Clone)]
pub struct TgMessage {
    pub id: i32,
    pub chat_id: i64,
    pub grouped_id: Option<String>,
    pub date: DateTime<Utc>,
    pub text: String,
    pub media: Option<TgMedia>,
    pub sender: Option<TgSender>,
    pub buttons: Vec<UrlButton>,
    pub chat_username: Option<String>,
    pub is_channel_post: bool,
}

impl TgMessage {
    pub fn has_media(&self) -> bool {
        self.media
            .as_ref()
            .map(|m| !m.is_link_preview)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlButton {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub parse_mode: Option<MessageMode>,
    pub link_preview: bool,
    pub buttons: Vec<UrlButton>,
    pub reply_to: Option<i32>,
}

/// Paging options for history reads. One call returns one page; callers
/// drive the loop (`max_id` walks backwards).
#[derive(Debug, Clone, Default)]
pub struct IterOptions {
    pub limit: usize,
    pub min_id: Option<i32>,
    pub max_id: Option<i32>,
    pub offset_date: Option<DateTime<Utc>>,
    pub reverse: bool,
}

/// Transport capability consumed by the core. A user-session client backs
/// history iteration, linked-channel lookup, and source-side edits/deletes;
/// a bot client backs ordinary sending. Either side may decline an
/// operation with `Error::Unsupported`.
#[async_trait]
pub trait TelegramIO: Send + Sync {
    async fn get_message(&self, chat_id: i64, message_id: i32) -> Result<TgMessage>;

    async fn iter_messages(&self, chat_id: i64, opts: IterOptions) -> Result<Vec<TgMessage>>;

    async fn get_entity(&self, id_or_link: &str) -> Result<EntityInfo>;

    /// Linked discussion-group id of a broadcast channel, if any.
    async fn get_linked_chat(&self, entity_id: i64) -> Result<Option<i64>>;

    async fn send_message(&self, chat_id: i64, text: &str, opts: &SendOptions)
        -> Result<TgMessage>;

    /// Sends one file or an album. The caption lands on the first item.
    async fn send_file(
        &self,
        chat_id: i64,
        paths: &[PathBuf],
        caption: &str,
        opts: &SendOptions,
    ) -> Result<Vec<TgMessage>>;

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        opts: &SendOptions,
    ) -> Result<()>;

    async fn delete_messages(&self, chat_id: i64, message_ids: &[i32]) -> Result<()>;

    async fn pin_message(&self, chat_id: i64, message_id: i32) -> Result<()>;

    async fn download_media(&self, message: &TgMessage, dir: &Path) -> Result<PathBuf>;
}

/// The pair of clients the core runs against. The user side is optional;
/// when absent, the bot client stands in and user-only operations surface
/// `Error::Unsupported`, which callers treat as a skip.
#[derive(Clone)]
pub struct TelegramClients {
    pub bot: Arc<dyn TelegramIO>,
    pub user: Option<Arc<dyn TelegramIO>>,
}

impl TelegramClients {
    pub fn for_rule(&self, use_bot_account: bool) -> Arc<dyn TelegramIO> {
        if use_bot_account {
            self.bot.clone()
        } else {
            self.user_or_bot()
        }
    }

    pub fn user_or_bot(&self) -> Arc<dyn TelegramIO> {
        self.user.clone().unwrap_or_else(|| self.bot.clone())
    }
}

/// Telegram id spellings to try when a stored chat id has drifted between
/// formats (`id`, `-100<abs>`, `-<abs>`).
pub fn chat_id_candidates(id: i64) -> Vec<String> {
    let mut out = vec![id.to_string()];
    let abs = id.abs();
    for candidate in [format!("-100{abs}"), format!("-{abs}")] {
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_cover_storage_format_drift() {
        let candidates = chat_id_candidates(12345);
        assert_eq!(candidates, vec!["12345", "-10012345", "-12345"]);
    }

    #[test]
    fn candidates_deduplicate_for_negative_ids() {
        let candidates = chat_id_candidates(-100987);
        assert_eq!(candidates, vec!["-100987", "-100100987"]);
    }

    #[test]
    fn display_name_prefers_title_then_names() {
        let entity = EntityInfo {
            id: 5,
            title: Some("News".to_string()),
            ..Default::default()
        };
        assert_eq!(entity.display_name(), "News");

        let entity = EntityInfo {
            id: 5,
            first_name: Some("Ada".to_string()),
            last_name: Some("L".to_string()),
            ..Default::default()
        };
        assert_eq!(entity.display_name(), "Ada L");

        let entity = EntityInfo {
            id: 5,
            ..Default::default()
        };
        assert_eq!(entity.display_name(), "5");
    }
}
