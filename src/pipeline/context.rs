use std::path::PathBuf;

use crate::telegram::{TgMessage, UrlButton};

/// Media that failed the size check but is still reported in the caption
/// when `notify_on_oversize` is set.
#[derive(Debug, Clone)]
pub struct SkippedMedia {
    pub message_id: i32,
    pub size_mb: f64,
    pub filename: String,
}

/// Per-message, per-rule mutable state threaded through the stage chain.
#[derive(Debug, Clone)]
pub struct Context {
    pub source_chat_id: i64,
    pub message: TgMessage,
    pub original_text: String,
    pub text: String,
    /// Text the keyword stage matches against; may carry prepended sender
    /// info when `is_filter_user_info` is set.
    pub check_text: String,
    pub is_media_group: bool,
    pub media_group_id: Option<String>,
    pub media_group_messages: Vec<TgMessage>,
    pub downloaded_media_paths: Vec<PathBuf>,
    pub skipped_media: Vec<SkippedMedia>,
    pub buttons: Vec<UrlButton>,
    pub sender_info: String,
    pub time_info: String,
    pub original_link: String,
    pub should_forward: bool,
    pub comment_link: Option<String>,
    pub forwarded_messages: Vec<TgMessage>,
    pub errors: Vec<String>,
}

impl Context {
    pub fn new(message: TgMessage) -> Self {
        let text = message.text.clone();
        Self {
            source_chat_id: message.chat_id,
            original_text: text.clone(),
            check_text: text.clone(),
            text,
            is_media_group: message.grouped_id.is_some(),
            media_group_id: message.grouped_id.clone(),
            media_group_messages: Vec::new(),
            downloaded_media_paths: Vec::new(),
            skipped_media: Vec::new(),
            buttons: message.buttons.clone(),
            sender_info: String::new(),
            time_info: String::new(),
            original_link: String::new(),
            should_forward: true,
            comment_link: None,
            forwarded_messages: Vec::new(),
            errors: Vec::new(),
            message,
        }
    }

    pub fn record_error(&mut self, stage: &str, detail: impl std::fmt::Display) {
        self.errors.push(format!("{stage}: {detail}"));
    }

    /// Caption shared by delivery and push: decoration + text + oversize
    /// notice lines.
    pub fn composed_caption(&self) -> String {
        let mut caption = String::new();
        if !self.sender_info.is_empty() {
            caption.push_str(&self.sender_info);
        }
        caption.push_str(&self.text);
        if !self.time_info.is_empty() {
            caption.push_str(&self.time_info);
        }
        if !self.original_link.is_empty() {
            caption.push_str(&self.original_link);
        }
        for skipped in &self.skipped_media {
            caption.push_str(&format!(
                "\n\n⚠️ media file {} ({:.2}MB) exceeds size limit",
                skipped.filename, skipped.size_mb
            ));
        }
        caption
    }
}
