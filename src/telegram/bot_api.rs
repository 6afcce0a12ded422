use std::path::{Path, PathBuf};

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    FileId, InlineKeyboardButton, InlineKeyboardButtonKind, InlineKeyboardMarkup, InputFile,
    InputMedia, InputMediaAudio, InputMediaDocument, InputMediaPhoto, InputMediaVideo,
    LinkPreviewOptions, MessageId, ParseMode, Recipient, ReplyParameters,
};
use teloxide::RequestError;

use crate::error::{Error, Result};
use crate::models::MessageMode;
use crate::utils::sanitize_filename;

use super::{
    EntityInfo, IterOptions, MediaKind, SendOptions, TelegramIO, TgMedia, TgMessage, TgSender,
    UrlButton,
};

/// Bot-account side of the `TelegramIO` capability, backed by the Bot API.
/// History iteration and linked-channel lookup need a user session and are
/// declined here.
#[derive(Clone)]
pub struct BotApi {
    bot: Bot,
}

impl BotApi {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn map_send_err(err: RequestError) -> Error {
    match err {
        RequestError::RetryAfter(secs) => Error::FloodWait {
            seconds: secs.seconds() as u64,
        },
        other => Error::TargetSend(other.to_string()),
    }
}

fn parse_mode_of(mode: MessageMode) -> ParseMode {
    match mode {
        MessageMode::Markdown => ParseMode::Markdown,
        MessageMode::Html => ParseMode::Html,
    }
}

fn link_preview(enabled: bool) -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: !enabled,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

fn keyboard_of(buttons: &[UrlButton]) -> Option<InlineKeyboardMarkup> {
    if buttons.is_empty() {
        return None;
    }
    let rows: Vec<Vec<InlineKeyboardButton>> = buttons
        .iter()
        .filter_map(|b| {
            b.url
                .parse()
                .ok()
                .map(|url| vec![InlineKeyboardButton::url(b.text.clone(), url)])
        })
        .collect();
    if rows.is_empty() {
        None
    } else {
        Some(InlineKeyboardMarkup::new(rows))
    }
}

/// Translates a transport message into the concrete record the pipeline
/// consumes.
pub fn convert_message(msg: &Message) -> TgMessage {
    let text = msg
        .text()
        .or_else(|| msg.caption())
        .unwrap_or_default()
        .to_string();

    let media = if let Some(sizes) = msg.photo() {
        sizes.last().map(|ps| TgMedia {
            kind: MediaKind::Photo,
            size_bytes: ps.file.size as i64,
            filename: None,
            mime_type: Some("image/jpeg".to_string()),
            file_id: Some(ps.file.id.0.clone()),
            is_link_preview: false,
        })
    } else if let Some(doc) = msg.document() {
        Some(TgMedia {
            kind: MediaKind::Document,
            size_bytes: doc.file.size as i64,
            filename: doc.file_name.clone(),
            mime_type: doc.mime_type.as_ref().map(|m| m.to_string()),
            file_id: Some(doc.file.id.0.clone()),
            is_link_preview: false,
        })
    } else if let Some(video) = msg.video() {
        Some(TgMedia {
            kind: MediaKind::Video,
            size_bytes: video.file.size as i64,
            filename: video.file_name.clone(),
            mime_type: video.mime_type.as_ref().map(|m| m.to_string()),
            file_id: Some(video.file.id.0.clone()),
            is_link_preview: false,
        })
    } else if let Some(audio) = msg.audio() {
        Some(TgMedia {
            kind: MediaKind::Audio,
            size_bytes: audio.file.size as i64,
            filename: audio.file_name.clone(),
            mime_type: audio.mime_type.as_ref().map(|m| m.to_string()),
            file_id: Some(audio.file.id.0.clone()),
            is_link_preview: false,
        })
    } else if let Some(voice) = msg.voice() {
        Some(TgMedia {
            kind: MediaKind::Voice,
            size_bytes: voice.file.size as i64,
            filename: None,
            mime_type: voice.mime_type.as_ref().map(|m| m.to_string()),
            file_id: Some(voice.file.id.0.clone()),
            is_link_preview: false,
        })
    } else {
        None
    };

    let sender = msg
        .from
        .as_ref()
        .map(|user| TgSender {
            id: user.id.0 as i64,
            name: user.full_name(),
        })
        .or_else(|| {
            msg.chat.is_channel().then(|| TgSender {
                id: msg.chat.id.0,
                name: msg.chat.title().unwrap_or_default().to_string(),
            })
        });

    let buttons = msg
        .reply_markup()
        .map(|markup| {
            markup
                .inline_keyboard
                .iter()
                .flatten()
                .filter_map(|b| match &b.kind {
                    InlineKeyboardButtonKind::Url(url) => Some(UrlButton {
                        text: b.text.clone(),
                        url: url.to_string(),
                    }),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    TgMessage {
        id: msg.id.0,
        chat_id: msg.chat.id.0,
        grouped_id: msg.media_group_id().map(|g| g.0.clone()),
        date: msg.date,
        text,
        media,
        sender,
        buttons,
        chat_username: msg.chat.username().map(|u| u.to_string()),
        is_channel_post: msg.chat.is_channel(),
    }
}

fn input_media_for(path: &Path, caption: Option<&str>, mode: Option<ParseMode>) -> InputMedia {
    let file = InputFile::file(path.to_path_buf());
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "webp" => {
            let mut media = InputMediaPhoto::new(file);
            if let Some(c) = caption {
                media = media.caption(c);
            }
            if let Some(m) = mode {
                media = media.parse_mode(m);
            }
            InputMedia::Photo(media)
        }
        "mp4" | "mov" | "mkv" => {
            let mut media = InputMediaVideo::new(file);
            if let Some(c) = caption {
                media = media.caption(c);
            }
            if let Some(m) = mode {
                media = media.parse_mode(m);
            }
            InputMedia::Video(media)
        }
        "mp3" | "m4a" | "ogg" | "flac" => {
            let mut media = InputMediaAudio::new(file);
            if let Some(c) = caption {
                media = media.caption(c);
            }
            if let Some(m) = mode {
                media = media.parse_mode(m);
            }
            InputMedia::Audio(media)
        }
        _ => {
            let mut media = InputMediaDocument::new(file);
            if let Some(c) = caption {
                media = media.caption(c);
            }
            if let Some(m) = mode {
                media = media.parse_mode(m);
            }
            InputMedia::Document(media)
        }
    }
}

#[async_trait]
impl TelegramIO for BotApi {
    async fn get_message(&self, _chat_id: i64, _message_id: i32) -> Result<TgMessage> {
        Err(Error::Unsupported("get_message requires a user session"))
    }

    async fn iter_messages(&self, _chat_id: i64, _opts: IterOptions) -> Result<Vec<TgMessage>> {
        Err(Error::Unsupported("iter_messages requires a user session"))
    }

    async fn get_entity(&self, id_or_link: &str) -> Result<EntityInfo> {
        let recipient = match id_or_link.parse::<i64>() {
            Ok(id) => Recipient::Id(ChatId(id)),
            Err(_) => {
                let username = id_or_link
                    .trim_start_matches("https://t.me/")
                    .trim_start_matches('@');
                Recipient::ChannelUsername(format!("@{username}"))
            }
        };

        let chat = self
            .bot
            .get_chat(recipient)
            .await
            .map_err(|e| Error::SourceFetch(e.to_string()))?;

        Ok(EntityInfo {
            id: chat.id.0,
            title: chat.title().map(|s| s.to_string()),
            username: chat.username().map(|s| s.to_string()),
            first_name: chat.first_name().map(|s| s.to_string()),
            last_name: chat.last_name().map(|s| s.to_string()),
            broadcast: chat.is_channel(),
        })
    }

    async fn get_linked_chat(&self, _entity_id: i64) -> Result<Option<i64>> {
        Err(Error::Unsupported(
            "linked chat lookup requires a user session",
        ))
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        opts: &SendOptions,
    ) -> Result<TgMessage> {
        let mut request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .link_preview_options(link_preview(opts.link_preview));

        if let Some(mode) = opts.parse_mode {
            request = request.parse_mode(parse_mode_of(mode));
        }
        if let Some(markup) = keyboard_of(&opts.buttons) {
            request = request.reply_markup(markup);
        }
        if let Some(reply_to) = opts.reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(reply_to)));
        }

        let sent = request.await.map_err(map_send_err)?;
        Ok(convert_message(&sent))
    }

    async fn send_file(
        &self,
        chat_id: i64,
        paths: &[PathBuf],
        caption: &str,
        opts: &SendOptions,
    ) -> Result<Vec<TgMessage>> {
        let mode = opts.parse_mode.map(parse_mode_of);

        if paths.len() == 1 {
            let media = input_media_for(&paths[0], Some(caption), mode);
            // Single files go out via the typed endpoints so buttons attach.
            let sent = match media {
                InputMedia::Photo(_) => {
                    let mut request = self
                        .bot
                        .send_photo(ChatId(chat_id), InputFile::file(paths[0].clone()))
                        .caption(caption);
                    if let Some(m) = mode {
                        request = request.parse_mode(m);
                    }
                    if let Some(markup) = keyboard_of(&opts.buttons) {
                        request = request.reply_markup(markup);
                    }
                    request.await.map_err(map_send_err)?
                }
                InputMedia::Video(_) => {
                    let mut request = self
                        .bot
                        .send_video(ChatId(chat_id), InputFile::file(paths[0].clone()))
                        .caption(caption);
                    if let Some(m) = mode {
                        request = request.parse_mode(m);
                    }
                    if let Some(markup) = keyboard_of(&opts.buttons) {
                        request = request.reply_markup(markup);
                    }
                    request.await.map_err(map_send_err)?
                }
                _ => {
                    let mut request = self
                        .bot
                        .send_document(ChatId(chat_id), InputFile::file(paths[0].clone()))
                        .caption(caption);
                    if let Some(m) = mode {
                        request = request.parse_mode(m);
                    }
                    if let Some(markup) = keyboard_of(&opts.buttons) {
                        request = request.reply_markup(markup);
                    }
                    request.await.map_err(map_send_err)?
                }
            };
            return Ok(vec![convert_message(&sent)]);
        }

        let album: Vec<InputMedia> = paths
            .iter()
            .enumerate()
            .map(|(i, path)| {
                let cap = (i == 0 && !caption.is_empty()).then_some(caption);
                input_media_for(path, cap, mode)
            })
            .collect();

        let sent = self
            .bot
            .send_media_group(ChatId(chat_id), album)
            .await
            .map_err(map_send_err)?;
        Ok(sent.iter().map(convert_message).collect())
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        opts: &SendOptions,
    ) -> Result<()> {
        let mut request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text)
            .link_preview_options(link_preview(opts.link_preview));
        if let Some(mode) = opts.parse_mode {
            request = request.parse_mode(parse_mode_of(mode));
        }
        request.await.map_err(map_send_err)?;
        Ok(())
    }

    async fn delete_messages(&self, chat_id: i64, message_ids: &[i32]) -> Result<()> {
        for &id in message_ids {
            self.bot
                .delete_message(ChatId(chat_id), MessageId(id))
                .await
                .map_err(map_send_err)?;
        }
        Ok(())
    }

    async fn pin_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
        self.bot
            .pin_chat_message(ChatId(chat_id), MessageId(message_id))
            .await
            .map_err(map_send_err)?;
        Ok(())
    }

    async fn download_media(&self, message: &TgMessage, dir: &Path) -> Result<PathBuf> {
        let media = message
            .media
            .as_ref()
            .ok_or(Error::Unsupported("message has no media"))?;
        let file_id = media
            .file_id
            .as_ref()
            .ok_or(Error::Unsupported("media has no file id"))?;

        let file = self
            .bot
            .get_file(FileId(file_id.clone()))
            .await
            .map_err(|e| Error::SourceFetch(e.to_string()))?;

        let name = media
            .filename
            .clone()
            .unwrap_or_else(|| format!("{}_{}", message.chat_id.abs(), message.id));
        let path = dir.join(sanitize_filename(&name));

        tokio::fs::create_dir_all(dir).await?;
        let mut dst = tokio::fs::File::create(&path).await?;
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .map_err(|e| Error::SourceFetch(e.to_string()))?;

        Ok(path)
    }
}
