use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Which list newly added keywords enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
pub enum AddMode {
    Whitelist,
    Blacklist,
}

/// How the whitelist and blacklist combine when deciding to forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
pub enum ForwardMode {
    Blacklist,
    Whitelist,
    BlacklistThenWhitelist,
    WhitelistThenBlacklist,
}

/// `Forward` posts to the target; `Edit` rewrites the source message in
/// place (channel sources only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
pub enum HandleMode {
    Forward,
    Edit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
pub enum MessageMode {
    Markdown,
    Html,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
pub enum PreviewMode {
    On,
    Off,
    Follow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
pub enum ExtensionFilterMode {
    Whitelist,
    Blacklist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
pub enum MediaSendMode {
    Single,
    Multiple,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Chat {
    pub id: i64,
    pub telegram_id: String,
    pub display_name: String,
    /// UI aid: which source the operator is currently configuring from this
    /// target chat.
    pub current_edit_rule_id: Option<i64>,
}

/// One forwarding relationship from a source chat to a target chat.
/// Unique on `(source_chat_id, target_chat_id)`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Rule {
    pub id: i64,

    // Routing
    pub source_chat_id: i64,
    pub target_chat_id: i64,
    pub enabled: bool,
    pub use_bot_account: bool,
    pub handle_mode: HandleMode,
    pub only_rss: bool,

    // Keyword semantics
    pub add_mode: AddMode,
    pub forward_mode: ForwardMode,
    pub reverse_blacklist: bool,
    pub reverse_whitelist: bool,
    pub is_filter_user_info: bool,
    pub is_keyword_after_ai: bool,

    // Rewriting
    pub replace_enabled: bool,
    pub message_mode: MessageMode,
    pub preview_mode: PreviewMode,

    // Decoration
    pub include_original_link: bool,
    pub original_link_template: Option<String>,
    pub include_sender: bool,
    pub userinfo_template: Option<String>,
    pub include_time: bool,
    pub time_template: Option<String>,

    // Lifecycle
    pub delete_original: bool,
    pub delay_enabled: bool,
    pub delay_seconds: i64,

    // Media
    pub media_type_filter_enabled: bool,
    pub media_size_filter_enabled: bool,
    pub max_media_size_mb: f64,
    pub notify_on_oversize: bool,
    pub extension_filter_enabled: bool,
    pub extension_filter_mode: ExtensionFilterMode,
    pub media_allow_text: bool,

    // AI
    pub ai_enabled: bool,
    pub ai_model: Option<String>,
    pub ai_prompt: Option<String>,
    pub ai_upload_image: bool,
    pub summary_enabled: bool,
    pub summary_time: String,
    pub summary_prompt: Option<String>,
    pub pin_summary: bool,

    // Comment-area button
    pub comment_button_enabled: bool,

    // Sync
    pub sync_enabled: bool,

    // Push
    pub push_enabled: bool,
    pub only_push: bool,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Keyword {
    pub id: i64,
    pub rule_id: i64,
    pub text: String,
    pub is_regex: bool,
    pub is_blacklist: bool,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReplaceRule {
    pub id: i64,
    pub rule_id: i64,
    /// `".*"` means full-text replace; anything else is a regex substitution.
    pub pattern: String,
    pub replacement: String,
}

/// Per-rule media-type toggles. Each flag, when TRUE, blocks that type.
#[derive(Debug, Clone, Copy, Default, FromRow, Serialize)]
pub struct MediaTypeFlags {
    pub rule_id: i64,
    pub photo: bool,
    pub document: bool,
    pub video: bool,
    pub audio: bool,
    pub voice: bool,
}

/// Sentinel extension for files without one.
pub const NO_EXTENSION: &str = "no-extension";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MediaExtension {
    pub id: i64,
    pub rule_id: i64,
    pub extension: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PushConfig {
    pub id: i64,
    pub rule_id: i64,
    /// Notifier-library style string, e.g. `ntfy://host/topic`.
    pub channel_url: String,
    pub enabled: bool,
    pub media_send_mode: MediaSendMode,
}

/// Directed sync edge: mutations on `rule_id` replay onto `peer_rule_id`.
#[derive(Debug, Clone, Copy, FromRow, Serialize)]
pub struct RuleSync {
    pub id: i64,
    pub rule_id: i64,
    pub peer_rule_id: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RssConfig {
    pub rule_id: i64,
    pub enabled: bool,
    pub title: String,
    pub description: String,
    pub language: String,
    /// Retention cap for the rule's entry store.
    pub max_items: i64,
}

/// `HH:MM`, both fields range-checked.
pub fn is_valid_summary_time(s: &str) -> bool {
    let Some((h, m)) = s.split_once(':') else {
        return false;
    };
    if h.len() != 2 || m.len() != 2 {
        return false;
    }
    matches!(
        (h.parse::<u32>(), m.parse::<u32>()),
        (Ok(h), Ok(m)) if h < 24 && m < 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_time_accepts_hh_mm() {
        assert!(is_valid_summary_time("07:00"));
        assert!(is_valid_summary_time("23:59"));
        assert!(is_valid_summary_time("00:00"));
    }

    #[test]
    fn summary_time_rejects_malformed_values() {
        assert!(!is_valid_summary_time("24:00"));
        assert!(!is_valid_summary_time("7:00"));
        assert!(!is_valid_summary_time("07:60"));
        assert!(!is_valid_summary_time("0700"));
        assert!(!is_valid_summary_time(""));
    }
}
