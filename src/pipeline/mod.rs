pub mod comment;
pub mod context;
pub mod info;
pub mod keyword;
pub mod media;
pub mod replace;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info as log_info, warn};

use crate::ai::{render_prompt, AiRegistry, AiRequest};
use crate::config::Config;
use crate::db::{self, Db};
use crate::error::Error;
use crate::models::{HandleMode, PreviewMode, Rule};
use crate::push::PushSender;
use crate::rss::{Entry, EntryMedia, RssStore};
use crate::telegram::{chat_id_candidates, SendOptions, TelegramClients, TgMessage, UrlButton};
use crate::utils::extension_of;

pub use context::{Context, SkippedMedia};

use self::media::MediaVerdict;

/// What a stage tells the runner: keep going, short-circuit cleanly, or
/// fail with a typed error whose recoverability decides the rest.
pub enum StageOutcome {
    Continue,
    Stop,
    Fail(Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageKind {
    Init,
    Delay,
    Keyword,
    Replace,
    Media,
    Ai,
    Info,
    CommentButton,
    Rss,
    Edit,
    Sender,
    Reply,
    Push,
    DeleteOriginal,
}

impl StageKind {
    fn name(self) -> &'static str {
        match self {
            StageKind::Init => "init",
            StageKind::Delay => "delay",
            StageKind::Keyword => "keyword",
            StageKind::Replace => "replace",
            StageKind::Media => "media",
            StageKind::Ai => "ai",
            StageKind::Info => "info",
            StageKind::CommentButton => "comment_button",
            StageKind::Rss => "rss",
            StageKind::Edit => "edit",
            StageKind::Sender => "sender",
            StageKind::Reply => "reply",
            StageKind::Push => "push",
            StageKind::DeleteOriginal => "delete_original",
        }
    }
}

/// Fixed stage order; a Stop from any stage skips the rest.
const STAGE_ORDER: [StageKind; 14] = [
    StageKind::Init,
    StageKind::Delay,
    StageKind::Keyword,
    StageKind::Replace,
    StageKind::Media,
    StageKind::Ai,
    StageKind::Info,
    StageKind::CommentButton,
    StageKind::Rss,
    StageKind::Edit,
    StageKind::Sender,
    StageKind::Reply,
    StageKind::Push,
    StageKind::DeleteOriginal,
];

/// Shared services a pipeline run borrows.
#[derive(Clone)]
pub struct PipelineEnv {
    pub db: Db,
    pub clients: TelegramClients,
    pub ai: AiRegistry,
    pub push: PushSender,
    pub rss: Arc<RssStore>,
    pub config: Arc<Config>,
}

pub struct Pipeline<'a> {
    env: &'a PipelineEnv,
    rule: Rule,
}

impl<'a> Pipeline<'a> {
    pub fn new(env: &'a PipelineEnv, rule: Rule) -> Self {
        Self { env, rule }
    }

    pub async fn run(&self, message: TgMessage) -> Context {
        let mut ctx = Context::new(message);
        debug!(rule_id = self.rule.id, message_id = ctx.message.id, "pipeline start");

        for stage in STAGE_ORDER {
            let outcome = self.run_stage(stage, &mut ctx).await;
            match outcome {
                StageOutcome::Continue => {}
                StageOutcome::Stop => {
                    debug!(rule_id = self.rule.id, stage = stage.name(), "pipeline stopped");
                    break;
                }
                StageOutcome::Fail(err) => {
                    if err.is_recoverable() {
                        warn!(rule_id = self.rule.id, stage = stage.name(), error = %err,
                            "stage failed, continuing");
                        ctx.record_error(stage.name(), err);
                    } else {
                        warn!(rule_id = self.rule.id, stage = stage.name(), error = %err,
                            "stage failed, aborting");
                        ctx.record_error(stage.name(), err);
                        ctx.should_forward = false;
                        break;
                    }
                }
            }
        }

        self.cleanup_temp(&ctx).await;
        ctx
    }

    async fn run_stage(&self, stage: StageKind, ctx: &mut Context) -> StageOutcome {
        match stage {
            StageKind::Init => self.stage_init(ctx).await,
            StageKind::Delay => self.stage_delay(ctx).await,
            StageKind::Keyword => self.stage_keyword(ctx).await,
            StageKind::Replace => self.stage_replace(ctx).await,
            StageKind::Media => self.stage_media(ctx).await,
            StageKind::Ai => self.stage_ai(ctx).await,
            StageKind::Info => self.stage_info(ctx).await,
            StageKind::CommentButton => self.stage_comment_button(ctx).await,
            StageKind::Rss => self.stage_rss(ctx).await,
            StageKind::Edit => self.stage_edit(ctx).await,
            StageKind::Sender => self.stage_sender(ctx).await,
            StageKind::Reply => self.stage_reply(ctx).await,
            StageKind::Push => self.stage_push(ctx).await,
            StageKind::DeleteOriginal => self.stage_delete_original(ctx).await,
        }
    }

    /// Collects media-group siblings by probing ids around the trigger
    /// message and adopts the first member's text and buttons.
    async fn stage_init(&self, ctx: &mut Context) -> StageOutcome {
        let Some(grouped_id) = ctx.media_group_id.clone() else {
            return StageOutcome::Continue;
        };

        let client = self.env.clients.for_rule(self.rule.use_bot_account);
        let mut members = vec![ctx.message.clone()];

        for id in (ctx.message.id - 10)..=(ctx.message.id + 10) {
            if id == ctx.message.id || id < 1 {
                continue;
            }
            match client.get_message(ctx.source_chat_id, id).await {
                Ok(msg) if msg.grouped_id.as_deref() == Some(grouped_id.as_str()) => {
                    members.push(msg);
                }
                Ok(_) => {}
                Err(Error::Unsupported(_)) => break,
                Err(_) => {}
            }
        }

        members.sort_by_key(|m| m.id);
        if let Some(first) = members.iter().find(|m| !m.text.is_empty()) {
            ctx.text = first.text.clone();
            ctx.original_text = first.text.clone();
            ctx.check_text = first.text.clone();
            if !first.buttons.is_empty() {
                ctx.buttons = first.buttons.clone();
            }
        }
        ctx.media_group_messages = members;
        StageOutcome::Continue
    }

    /// Waits out the configured delay, then re-reads the message so edits
    /// made by the source channel's own bots are picked up.
    async fn stage_delay(&self, ctx: &mut Context) -> StageOutcome {
        if !self.rule.delay_enabled || self.rule.delay_seconds <= 0 {
            return StageOutcome::Continue;
        }

        tokio::time::sleep(Duration::from_secs(self.rule.delay_seconds as u64)).await;

        let client = self.env.clients.for_rule(self.rule.use_bot_account);
        match client.get_message(ctx.source_chat_id, ctx.message.id).await {
            Ok(refreshed) => {
                ctx.text = refreshed.text.clone();
                ctx.original_text = refreshed.text.clone();
                ctx.check_text = refreshed.text.clone();
                ctx.buttons = refreshed.buttons.clone();
                ctx.message = refreshed;
            }
            // Refresh is best effort; the original stands.
            Err(_) => {}
        }
        StageOutcome::Continue
    }

    async fn stage_keyword(&self, ctx: &mut Context) -> StageOutcome {
        let keywords = {
            let mut conn = match self.env.db.pool.acquire().await {
                Ok(conn) => conn,
                Err(e) => return StageOutcome::Fail(Error::Database(e)),
            };
            match db::keywords::list(&mut conn, self.rule.id).await {
                Ok(list) => list,
                Err(e) => return StageOutcome::Fail(e),
            }
        };

        if self.rule.is_filter_user_info {
            ctx.check_text = format!(
                "{}{}",
                info::sender_check_prefix(&ctx.message),
                ctx.check_text
            );
        }

        if keyword::should_forward(&self.rule, &keywords, &ctx.check_text) {
            StageOutcome::Continue
        } else {
            ctx.should_forward = false;
            StageOutcome::Stop
        }
    }

    async fn stage_replace(&self, ctx: &mut Context) -> StageOutcome {
        if !self.rule.replace_enabled {
            return StageOutcome::Continue;
        }

        let mut conn = match self.env.db.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => return StageOutcome::Fail(Error::Database(e)),
        };
        let rules = match db::replace_rules::list(&mut conn, self.rule.id).await {
            Ok(list) => list,
            Err(e) => return StageOutcome::Fail(e),
        };

        let (text, errors) = replace::apply(&rules, &ctx.text);
        ctx.text = text;
        for error in errors {
            ctx.record_error("replace", Error::Regex(error));
        }
        StageOutcome::Continue
    }

    async fn stage_media(&self, ctx: &mut Context) -> StageOutcome {
        let mut conn = match self.env.db.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => return StageOutcome::Fail(Error::Database(e)),
        };
        let flags = match db::media::get_flags(&mut conn, self.rule.id).await {
            Ok(flags) => flags,
            Err(e) => return StageOutcome::Fail(e),
        };
        let extensions: Vec<String> = match db::media::list_extensions(&mut conn, self.rule.id).await
        {
            Ok(list) => list.into_iter().map(|e| e.extension).collect(),
            Err(e) => return StageOutcome::Fail(e),
        };
        drop(conn);

        if ctx.is_media_group {
            return self.media_group_pass(ctx, &flags, &extensions).await;
        }

        let Some(item) = ctx.message.media.clone() else {
            return StageOutcome::Continue;
        };
        if item.is_link_preview {
            // A bare link preview is text as far as filters are concerned.
            return StageOutcome::Continue;
        }

        match media::evaluate(&self.rule, &flags, &extensions, &item) {
            MediaVerdict::Pass => {
                match self.download(&ctx.message).await {
                    Ok(path) => ctx.downloaded_media_paths.push(path),
                    Err(Error::Unsupported(_)) => {}
                    Err(e) => ctx.record_error("media", e),
                }
                StageOutcome::Continue
            }
            MediaVerdict::RejectedType | MediaVerdict::RejectedExtension => {
                if self.rule.media_allow_text && !ctx.text.is_empty() {
                    StageOutcome::Continue
                } else {
                    ctx.should_forward = false;
                    StageOutcome::Stop
                }
            }
            MediaVerdict::Oversize { filename, size_mb } => {
                if self.rule.notify_on_oversize {
                    ctx.skipped_media.push(SkippedMedia {
                        message_id: ctx.message.id,
                        size_mb,
                        filename,
                    });
                    StageOutcome::Continue
                } else {
                    ctx.record_error("media", Error::MediaOversize { filename, size_mb });
                    ctx.should_forward = false;
                    StageOutcome::Stop
                }
            }
        }
    }

    async fn media_group_pass(
        &self,
        ctx: &mut Context,
        flags: &crate::models::MediaTypeFlags,
        extensions: &[String],
    ) -> StageOutcome {
        let members = std::mem::take(&mut ctx.media_group_messages);
        let mut kept = Vec::new();

        for member in members {
            let Some(item) = member.media.clone() else {
                kept.push(member);
                continue;
            };
            if item.is_link_preview {
                kept.push(member);
                continue;
            }

            match media::evaluate(&self.rule, flags, extensions, &item) {
                MediaVerdict::Pass => {
                    match self.download(&member).await {
                        Ok(path) => ctx.downloaded_media_paths.push(path),
                        Err(Error::Unsupported(_)) => {}
                        Err(e) => ctx.record_error("media", e),
                    }
                    kept.push(member);
                }
                MediaVerdict::Oversize { filename, size_mb } => {
                    ctx.skipped_media.push(SkippedMedia {
                        message_id: member.id,
                        size_mb,
                        filename,
                    });
                }
                MediaVerdict::RejectedType | MediaVerdict::RejectedExtension => {}
            }
        }

        let all_failed = kept.iter().all(|m| !m.has_media());
        ctx.media_group_messages = kept;

        if all_failed && !self.rule.notify_on_oversize {
            if self.rule.media_allow_text && !ctx.text.is_empty() {
                return StageOutcome::Continue;
            }
            ctx.should_forward = false;
            return StageOutcome::Stop;
        }
        StageOutcome::Continue
    }

    async fn download(&self, message: &TgMessage) -> Result<PathBuf, Error> {
        let client = self.env.clients.for_rule(self.rule.use_bot_account);
        let dir = self.env.config.temp_dir();
        client.download_media(message, &dir).await
    }

    async fn stage_ai(&self, ctx: &mut Context) -> StageOutcome {
        if !self.rule.ai_enabled || ctx.text.is_empty() {
            return StageOutcome::Continue;
        }

        let template = self
            .rule
            .ai_prompt
            .as_deref()
            .unwrap_or(&self.env.config.default_ai_prompt);
        let request = AiRequest {
            prompt: render_prompt(template, &ctx.text),
            image_paths: if self.rule.ai_upload_image {
                ctx.downloaded_media_paths
                    .iter()
                    .filter(|p| {
                        matches!(
                            extension_of(p.file_name().and_then(|n| n.to_str())).as_str(),
                            "jpg" | "jpeg" | "png" | "webp" | "gif"
                        )
                    })
                    .cloned()
                    .collect()
            } else {
                Vec::new()
            },
        };

        match self
            .env
            .ai
            .process(self.rule.ai_model.as_deref(), &request)
            .await
        {
            Ok(output) => {
                ctx.text = output;
                if self.rule.is_keyword_after_ai {
                    let mut conn = match self.env.db.pool.acquire().await {
                        Ok(conn) => conn,
                        Err(e) => return StageOutcome::Fail(Error::Database(e)),
                    };
                    let keywords = match db::keywords::list(&mut conn, self.rule.id).await {
                        Ok(list) => list,
                        Err(e) => return StageOutcome::Fail(e),
                    };

                    let mut check_text = ctx.text.clone();
                    if self.rule.is_filter_user_info {
                        check_text = format!(
                            "{}{}",
                            info::sender_check_prefix(&ctx.message),
                            check_text
                        );
                    }
                    ctx.check_text = check_text;

                    if !keyword::should_forward(&self.rule, &keywords, &ctx.check_text) {
                        ctx.should_forward = false;
                        return StageOutcome::Stop;
                    }
                }
                StageOutcome::Continue
            }
            Err(e) => {
                // Text stands unchanged on provider trouble.
                ctx.record_error("ai", e);
                StageOutcome::Continue
            }
        }
    }

    async fn stage_info(&self, ctx: &mut Context) -> StageOutcome {
        let (sender_info, time_info, original_link) =
            info::compose(&self.rule, &ctx.message, self.env.config.timezone);
        ctx.sender_info = sender_info;
        ctx.time_info = time_info;
        ctx.original_link = original_link;
        StageOutcome::Continue
    }

    async fn stage_comment_button(&self, ctx: &mut Context) -> StageOutcome {
        if !self.rule.comment_button_enabled || !ctx.message.is_channel_post {
            return StageOutcome::Continue;
        }

        let user_client = self.env.clients.user_or_bot();
        let linked = match user_client.get_linked_chat(ctx.message.chat_id).await {
            Ok(Some(id)) => id,
            Ok(None) => return StageOutcome::Continue,
            Err(Error::Unsupported(_)) => return StageOutcome::Continue,
            Err(e) => {
                ctx.record_error("comment_button", e);
                return StageOutcome::Continue;
            }
        };

        // Give the linked-group echo a moment to appear.
        tokio::time::sleep(Duration::from_secs(2)).await;

        let group_message_id = match user_client
            .iter_messages(
                linked,
                crate::telegram::IterOptions {
                    limit: comment::SEARCH_WINDOW,
                    ..Default::default()
                },
            )
            .await
        {
            Ok(candidates) => comment::find_echo(&ctx.original_text, ctx.message.date, &candidates)
                .map(|m| m.id)
                .unwrap_or(1),
            Err(_) => 1,
        };

        let url = comment::comment_link(
            ctx.message.chat_username.as_deref(),
            ctx.message.chat_id,
            group_message_id,
        );
        ctx.comment_link = Some(url.clone());
        ctx.buttons.insert(
            0,
            UrlButton {
                text: "💬 Comments".to_string(),
                url,
            },
        );
        StageOutcome::Continue
    }

    async fn stage_rss(&self, ctx: &mut Context) -> StageOutcome {
        let mut conn = match self.env.db.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => return StageOutcome::Fail(Error::Database(e)),
        };
        let rss_config = match db::rss_configs::get(&mut conn, self.rule.id).await {
            Ok(config) => config,
            Err(e) => return StageOutcome::Fail(e),
        };
        drop(conn);

        let enabled = rss_config.as_ref().map(|c| c.enabled).unwrap_or(false);
        if enabled {
            let config = rss_config.expect("checked above");
            let mut media = Vec::new();
            let downloaded_media_paths = ctx.downloaded_media_paths.clone();
            for path in &downloaded_media_paths {
                match self.env.rss.import_media(self.rule.id, path).await {
                    Ok(filename) => {
                        let ext = extension_of(Some(&filename));
                        let size = tokio::fs::metadata(path)
                            .await
                            .map(|m| m.len() as i64)
                            .unwrap_or(0);
                        media.push(EntryMedia {
                            url: format!("/media/{}/{}", self.rule.id, filename),
                            mime_type: crate::rss::render::mime_for_extension(&ext).to_string(),
                            size,
                            filename,
                            original_name: path
                                .file_name()
                                .and_then(|n| n.to_str())
                                .map(|s| s.to_string()),
                        });
                    }
                    Err(e) => ctx.record_error("rss", e),
                }
            }

            let title: String = ctx.text.chars().take(80).collect();
            let entry = Entry {
                id: String::new(),
                rule_id: self.rule.id,
                message_id: ctx.message.id as i64,
                title,
                content: ctx.text.clone(),
                published: ctx.message.date.to_rfc3339(),
                author: ctx
                    .message
                    .sender
                    .as_ref()
                    .map(|s| s.name.clone())
                    .unwrap_or_default(),
                link: info::message_link(&ctx.message),
                media,
                original_link: info::message_link(&ctx.message),
                sender_info: ctx.sender_info.clone(),
                created_at: String::new(),
            };

            if let Err(e) = self
                .env
                .rss
                .add(self.rule.id, entry, config.max_items.max(1) as usize)
                .await
            {
                ctx.record_error("rss", e);
            }
        }

        // Edit mode still rewrites the source before an RSS-only rule
        // short-circuits delivery.
        if self.rule.only_rss && self.rule.handle_mode != HandleMode::Edit {
            return StageOutcome::Stop;
        }
        StageOutcome::Continue
    }

    async fn stage_edit(&self, ctx: &mut Context) -> StageOutcome {
        if self.rule.handle_mode != HandleMode::Edit || !ctx.message.is_channel_post {
            return StageOutcome::Continue;
        }

        let text = ctx.composed_caption();
        let opts = SendOptions {
            parse_mode: Some(self.rule.message_mode),
            link_preview: false,
            ..Default::default()
        };
        let client = self.env.clients.user_or_bot();
        if let Err(e) = client
            .edit_message(ctx.message.chat_id, ctx.message.id, &text, &opts)
            .await
        {
            ctx.record_error("edit", e);
        }
        // Edit mode never also sends.
        StageOutcome::Stop
    }

    async fn resolve_target(&self) -> Result<i64, Error> {
        let mut conn = self.env.db.pool.acquire().await.map_err(Error::Database)?;
        let chat = db::chats::find(&mut conn, self.rule.target_chat_id)
            .await?
            .ok_or_else(|| {
                Error::RuleValidation(format!(
                    "target chat {} not found",
                    self.rule.target_chat_id
                ))
            })?;
        drop(conn);

        let stored: i64 = chat.telegram_id.parse().map_err(|_| {
            Error::RuleValidation(format!("unparsable telegram id {:?}", chat.telegram_id))
        })?;

        let client = self.env.clients.for_rule(self.rule.use_bot_account);
        for candidate in chat_id_candidates(stored) {
            if let Ok(entity) = client.get_entity(&candidate).await {
                return Ok(entity.id);
            }
        }
        Ok(stored)
    }

    async fn stage_sender(&self, ctx: &mut Context) -> StageOutcome {
        if self.rule.only_push {
            return StageOutcome::Continue;
        }

        let target = match self.resolve_target().await {
            Ok(id) => id,
            Err(e) => return StageOutcome::Fail(e),
        };

        let client = self.env.clients.for_rule(self.rule.use_bot_account);
        let caption = ctx.composed_caption();
        let opts = SendOptions {
            parse_mode: Some(self.rule.message_mode),
            link_preview: match self.rule.preview_mode {
                PreviewMode::On => true,
                PreviewMode::Off => false,
                PreviewMode::Follow => ctx.message.media.is_some(),
            },
            buttons: ctx.buttons.clone(),
            reply_to: None,
        };

        let result = if !ctx.downloaded_media_paths.is_empty() {
            client
                .send_file(target, &ctx.downloaded_media_paths, &caption, &opts)
                .await
        } else {
            client
                .send_message(target, &caption, &opts)
                .await
                .map(|m| vec![m])
        };

        match result {
            Ok(sent) => {
                log_info!(rule_id = self.rule.id, target, count = sent.len(), "forwarded");
                ctx.forwarded_messages = sent;
                StageOutcome::Continue
            }
            Err(e @ Error::FloodWait { .. }) => StageOutcome::Fail(e),
            Err(e) => {
                ctx.record_error("sender", e);
                // Later stages that depend on a delivered copy check for it.
                StageOutcome::Continue
            }
        }
    }

    /// Media groups cannot carry inline buttons, so the comment button is
    /// attached as a reply to the first album message.
    async fn stage_reply(&self, ctx: &mut Context) -> StageOutcome {
        if !ctx.is_media_group || ctx.comment_link.is_none() {
            return StageOutcome::Continue;
        }
        let Some(first) = ctx.forwarded_messages.first() else {
            return StageOutcome::Continue;
        };

        let client = self.env.clients.for_rule(self.rule.use_bot_account);
        let opts = SendOptions {
            parse_mode: None,
            link_preview: false,
            buttons: ctx.buttons.clone(),
            reply_to: Some(first.id),
        };
        if let Err(e) = client.send_message(first.chat_id, "💬", &opts).await {
            ctx.record_error("reply", e);
        }
        StageOutcome::Continue
    }

    async fn stage_push(&self, ctx: &mut Context) -> StageOutcome {
        if !self.rule.push_enabled {
            return StageOutcome::Continue;
        }

        let mut conn = match self.env.db.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => return StageOutcome::Fail(Error::Database(e)),
        };
        let configs = match db::push::list_enabled(&mut conn, self.rule.id).await {
            Ok(list) => list,
            Err(e) => return StageOutcome::Fail(e),
        };
        drop(conn);

        let body = ctx.composed_caption();
        for config in configs {
            if let Err(e) = self
                .env
                .push
                .send(&config, &body, &ctx.downloaded_media_paths)
                .await
            {
                // One failing channel never blocks the others.
                warn!(rule_id = self.rule.id, channel = %config.channel_url, error = %e,
                    "push delivery failed");
                ctx.record_error("push", e);
            }
        }
        StageOutcome::Continue
    }

    async fn stage_delete_original(&self, ctx: &mut Context) -> StageOutcome {
        if !self.rule.delete_original {
            return StageOutcome::Continue;
        }
        // Deleting the source only makes sense once a copy exists somewhere.
        let delivered = !ctx.forwarded_messages.is_empty()
            || self.rule.only_push
            || self.rule.only_rss;
        if !delivered {
            return StageOutcome::Continue;
        }

        let mut ids: Vec<i32> = ctx.media_group_messages.iter().map(|m| m.id).collect();
        if ids.is_empty() {
            ids.push(ctx.message.id);
        }

        let client = self.env.clients.user_or_bot();
        match client.delete_messages(ctx.source_chat_id, &ids).await {
            Ok(()) => StageOutcome::Continue,
            Err(Error::Unsupported(_)) => StageOutcome::Continue,
            Err(e) => {
                ctx.record_error("delete_original", e);
                StageOutcome::Continue
            }
        }
    }

    async fn cleanup_temp(&self, ctx: &Context) {
        for path in &ctx.downloaded_media_paths {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}
