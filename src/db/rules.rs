use sqlx::SqliteConnection;

use crate::error::{Error, Result};
use crate::models::{
    is_valid_summary_time, AddMode, ExtensionFilterMode, ForwardMode, HandleMode, MessageMode,
    PreviewMode, Rule,
};

/// Boolean rule attributes addressable by name. Used by the settings
/// surface and replayed verbatim by the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolField {
    Enabled,
    UseBotAccount,
    OnlyRss,
    ReverseBlacklist,
    ReverseWhitelist,
    IsFilterUserInfo,
    IsKeywordAfterAi,
    ReplaceEnabled,
    IncludeOriginalLink,
    IncludeSender,
    IncludeTime,
    DeleteOriginal,
    DelayEnabled,
    MediaTypeFilterEnabled,
    MediaSizeFilterEnabled,
    NotifyOnOversize,
    ExtensionFilterEnabled,
    MediaAllowText,
    AiEnabled,
    AiUploadImage,
    SummaryEnabled,
    PinSummary,
    CommentButtonEnabled,
    SyncEnabled,
    PushEnabled,
    OnlyPush,
}

impl BoolField {
    pub fn column(self) -> &'static str {
        match self {
            BoolField::Enabled => "enabled",
            BoolField::UseBotAccount => "use_bot_account",
            BoolField::OnlyRss => "only_rss",
            BoolField::ReverseBlacklist => "reverse_blacklist",
            BoolField::ReverseWhitelist => "reverse_whitelist",
            BoolField::IsFilterUserInfo => "is_filter_user_info",
            BoolField::IsKeywordAfterAi => "is_keyword_after_ai",
            BoolField::ReplaceEnabled => "replace_enabled",
            BoolField::IncludeOriginalLink => "include_original_link",
            BoolField::IncludeSender => "include_sender",
            BoolField::IncludeTime => "include_time",
            BoolField::DeleteOriginal => "delete_original",
            BoolField::DelayEnabled => "delay_enabled",
            BoolField::MediaTypeFilterEnabled => "media_type_filter_enabled",
            BoolField::MediaSizeFilterEnabled => "media_size_filter_enabled",
            BoolField::NotifyOnOversize => "notify_on_oversize",
            BoolField::ExtensionFilterEnabled => "extension_filter_enabled",
            BoolField::MediaAllowText => "media_allow_text",
            BoolField::AiEnabled => "ai_enabled",
            BoolField::AiUploadImage => "ai_upload_image",
            BoolField::SummaryEnabled => "summary_enabled",
            BoolField::PinSummary => "pin_summary",
            BoolField::CommentButtonEnabled => "comment_button_enabled",
            BoolField::SyncEnabled => "sync_enabled",
            BoolField::PushEnabled => "push_enabled",
            BoolField::OnlyPush => "only_push",
        }
    }
}

/// Optional text attributes (prompts, templates, model name).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    AiModel,
    AiPrompt,
    SummaryPrompt,
    UserinfoTemplate,
    TimeTemplate,
    OriginalLinkTemplate,
}

impl TextField {
    pub fn column(self) -> &'static str {
        match self {
            TextField::AiModel => "ai_model",
            TextField::AiPrompt => "ai_prompt",
            TextField::SummaryPrompt => "summary_prompt",
            TextField::UserinfoTemplate => "userinfo_template",
            TextField::TimeTemplate => "time_template",
            TextField::OriginalLinkTemplate => "original_link_template",
        }
    }
}

pub async fn create(
    conn: &mut SqliteConnection,
    source_chat_id: i64,
    target_chat_id: i64,
    default_max_media_size: f64,
    default_summary_time: &str,
) -> Result<Rule> {
    let rule = sqlx::query_as::<_, Rule>(
        "INSERT INTO rules (source_chat_id, target_chat_id, max_media_size_mb, summary_time)
         VALUES (?, ?, ?, ?) RETURNING *",
    )
    .bind(source_chat_id)
    .bind(target_chat_id)
    .bind(default_max_media_size)
    .bind(default_summary_time)
    .fetch_one(conn)
    .await?;
    Ok(rule)
}

pub async fn get(conn: &mut SqliteConnection, id: i64) -> Result<Option<Rule>> {
    let rule = sqlx::query_as::<_, Rule>("SELECT * FROM rules WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(rule)
}

pub async fn get_by_pair(
    conn: &mut SqliteConnection,
    source_chat_id: i64,
    target_chat_id: i64,
) -> Result<Option<Rule>> {
    let rule = sqlx::query_as::<_, Rule>(
        "SELECT * FROM rules WHERE source_chat_id = ? AND target_chat_id = ?",
    )
    .bind(source_chat_id)
    .bind(target_chat_id)
    .fetch_optional(conn)
    .await?;
    Ok(rule)
}

pub async fn all(conn: &mut SqliteConnection) -> Result<Vec<Rule>> {
    let rules = sqlx::query_as::<_, Rule>("SELECT * FROM rules ORDER BY id")
        .fetch_all(conn)
        .await?;
    Ok(rules)
}

/// Enabled rules whose source chat stores any of the given telegram id
/// spellings (`id`, `-100<abs>`, `-<abs>` drift is handled by the caller
/// passing every candidate).
pub async fn enabled_for_source(
    conn: &mut SqliteConnection,
    telegram_id_candidates: &[String],
) -> Result<Vec<Rule>> {
    let mut out = Vec::new();
    for candidate in telegram_id_candidates {
        let mut rules = sqlx::query_as::<_, Rule>(
            "SELECT r.* FROM rules r
             JOIN chats c ON c.id = r.source_chat_id
             WHERE c.telegram_id = ? AND r.enabled = 1
             ORDER BY r.id",
        )
        .bind(candidate)
        .fetch_all(&mut *conn)
        .await?;
        out.append(&mut rules);
    }
    out.sort_by_key(|r| r.id);
    out.dedup_by_key(|r| r.id);
    Ok(out)
}

pub async fn with_summary_enabled(conn: &mut SqliteConnection) -> Result<Vec<Rule>> {
    let rules =
        sqlx::query_as::<_, Rule>("SELECT * FROM rules WHERE summary_enabled = 1 ORDER BY id")
            .fetch_all(conn)
            .await?;
    Ok(rules)
}

pub async fn set_bool(
    conn: &mut SqliteConnection,
    rule_id: i64,
    field: BoolField,
    value: bool,
) -> Result<()> {
    let sql = format!("UPDATE rules SET {} = ? WHERE id = ?", field.column());
    sqlx::query(&sql).bind(value).bind(rule_id).execute(conn).await?;
    Ok(())
}

pub async fn set_text(
    conn: &mut SqliteConnection,
    rule_id: i64,
    field: TextField,
    value: Option<&str>,
) -> Result<()> {
    let sql = format!("UPDATE rules SET {} = ? WHERE id = ?", field.column());
    sqlx::query(&sql).bind(value).bind(rule_id).execute(conn).await?;
    Ok(())
}

pub async fn set_summary_time(
    conn: &mut SqliteConnection,
    rule_id: i64,
    summary_time: &str,
) -> Result<()> {
    if !is_valid_summary_time(summary_time) {
        return Err(Error::RuleValidation(format!(
            "summary time must be HH:MM, got {summary_time:?}"
        )));
    }
    sqlx::query("UPDATE rules SET summary_time = ? WHERE id = ?")
        .bind(summary_time)
        .bind(rule_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_delay_seconds(
    conn: &mut SqliteConnection,
    rule_id: i64,
    seconds: i64,
) -> Result<()> {
    if seconds < 0 {
        return Err(Error::RuleValidation(format!(
            "delay seconds must be >= 0, got {seconds}"
        )));
    }
    sqlx::query("UPDATE rules SET delay_seconds = ? WHERE id = ?")
        .bind(seconds)
        .bind(rule_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_max_media_size(
    conn: &mut SqliteConnection,
    rule_id: i64,
    size_mb: f64,
) -> Result<()> {
    if size_mb <= 0.0 {
        return Err(Error::RuleValidation(format!(
            "max media size must be > 0, got {size_mb}"
        )));
    }
    sqlx::query("UPDATE rules SET max_media_size_mb = ? WHERE id = ?")
        .bind(size_mb)
        .bind(rule_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_handle_mode(
    conn: &mut SqliteConnection,
    rule_id: i64,
    mode: HandleMode,
) -> Result<()> {
    sqlx::query("UPDATE rules SET handle_mode = ? WHERE id = ?")
        .bind(mode)
        .bind(rule_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_add_mode(conn: &mut SqliteConnection, rule_id: i64, mode: AddMode) -> Result<()> {
    sqlx::query("UPDATE rules SET add_mode = ? WHERE id = ?")
        .bind(mode)
        .bind(rule_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_forward_mode(
    conn: &mut SqliteConnection,
    rule_id: i64,
    mode: ForwardMode,
) -> Result<()> {
    sqlx::query("UPDATE rules SET forward_mode = ? WHERE id = ?")
        .bind(mode)
        .bind(rule_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_message_mode(
    conn: &mut SqliteConnection,
    rule_id: i64,
    mode: MessageMode,
) -> Result<()> {
    sqlx::query("UPDATE rules SET message_mode = ? WHERE id = ?")
        .bind(mode)
        .bind(rule_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_preview_mode(
    conn: &mut SqliteConnection,
    rule_id: i64,
    mode: PreviewMode,
) -> Result<()> {
    sqlx::query("UPDATE rules SET preview_mode = ? WHERE id = ?")
        .bind(mode)
        .bind(rule_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_extension_filter_mode(
    conn: &mut SqliteConnection,
    rule_id: i64,
    mode: ExtensionFilterMode,
) -> Result<()> {
    sqlx::query("UPDATE rules SET extension_filter_mode = ? WHERE id = ?")
        .bind(mode)
        .bind(rule_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_ai_model(
    conn: &mut SqliteConnection,
    rule_id: i64,
    model: Option<&str>,
) -> Result<()> {
    set_text(conn, rule_id, TextField::AiModel, model).await
}

/// Deletes the rule and every dependent rowset, then runs the orphan-chat
/// scan. The rule's on-disk RSS data is the caller's responsibility.
pub async fn delete_cascade(conn: &mut SqliteConnection, rule_id: i64) -> Result<()> {
    for sql in [
        "DELETE FROM keywords WHERE rule_id = ?",
        "DELETE FROM replace_rules WHERE rule_id = ?",
        "DELETE FROM media_type_flags WHERE rule_id = ?",
        "DELETE FROM media_extensions WHERE rule_id = ?",
        "DELETE FROM push_configs WHERE rule_id = ?",
        "DELETE FROM rule_syncs WHERE rule_id = ? OR peer_rule_id = ?",
        "DELETE FROM rss_configs WHERE rule_id = ?",
        "DELETE FROM rules WHERE id = ?",
    ] {
        let mut query = sqlx::query(sql).bind(rule_id);
        if sql.contains("peer_rule_id") {
            query = query.bind(rule_id);
        }
        query.execute(&mut *conn).await?;
    }

    super::chats::cleanup_orphans(conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::keywords::NewKeyword;
    use crate::db::media::MediaFlag;
    use crate::db::{chats, keywords, media, push, replace_rules, rss_configs, sync_edges, test_db};
    use crate::models::RssConfig;

    #[tokio::test]
    async fn pair_uniqueness_is_enforced() {
        let db = test_db().await;
        let mut conn = db.pool.acquire().await.unwrap();
        let src = chats::upsert(&mut conn, "-1001", "src").await.unwrap();
        let dst = chats::upsert(&mut conn, "-1002", "dst").await.unwrap();

        create(&mut conn, src.id, dst.id, 10.0, "07:00").await.unwrap();
        assert!(create(&mut conn, src.id, dst.id, 10.0, "07:00").await.is_err());
    }

    #[tokio::test]
    async fn validation_rejects_bad_scalars() {
        let db = test_db().await;
        let mut conn = db.pool.acquire().await.unwrap();
        let src = chats::upsert(&mut conn, "-1001", "src").await.unwrap();
        let dst = chats::upsert(&mut conn, "-1002", "dst").await.unwrap();
        let rule = create(&mut conn, src.id, dst.id, 10.0, "07:00").await.unwrap();

        assert!(set_max_media_size(&mut conn, rule.id, 0.0).await.is_err());
        assert!(set_delay_seconds(&mut conn, rule.id, -1).await.is_err());
        assert!(set_summary_time(&mut conn, rule.id, "25:00").await.is_err());
        assert!(set_summary_time(&mut conn, rule.id, "23:45").await.is_ok());
    }

    #[tokio::test]
    async fn delete_cascade_removes_every_dependent_rowset() {
        let db = test_db().await;
        let mut conn = db.pool.acquire().await.unwrap();

        let src = chats::upsert(&mut conn, "-1001", "src").await.unwrap();
        let dst = chats::upsert(&mut conn, "-1002", "dst").await.unwrap();
        let other = chats::upsert(&mut conn, "-1003", "other").await.unwrap();

        let rule = create(&mut conn, src.id, dst.id, 10.0, "07:00").await.unwrap();
        let peer = create(&mut conn, src.id, other.id, 10.0, "07:00").await.unwrap();

        keywords::add(
            &mut conn,
            rule.id,
            &[NewKeyword {
                text: "kw".to_string(),
                is_regex: false,
                is_blacklist: false,
            }],
        )
        .await
        .unwrap();
        replace_rules::add(&mut conn, rule.id, &[("a".to_string(), "b".to_string())])
            .await
            .unwrap();
        media::toggle_flag(&mut conn, rule.id, MediaFlag::Photo).await.unwrap();
        media::add_extensions(&mut conn, rule.id, &["exe".to_string()]).await.unwrap();
        push::add(&mut conn, rule.id, "ntfy://h/t").await.unwrap();
        sync_edges::add(&mut conn, rule.id, peer.id).await.unwrap();
        sync_edges::add(&mut conn, peer.id, rule.id).await.unwrap();
        rss_configs::upsert(
            &mut conn,
            &RssConfig {
                rule_id: rule.id,
                enabled: true,
                title: "t".to_string(),
                description: String::new(),
                language: "en".to_string(),
                max_items: 5,
            },
        )
        .await
        .unwrap();
        chats::set_current_edit_rule(&mut conn, dst.id, Some(rule.id)).await.unwrap();

        delete_cascade(&mut conn, rule.id).await.unwrap();

        assert!(get(&mut conn, rule.id).await.unwrap().is_none());
        assert!(keywords::list(&mut conn, rule.id).await.unwrap().is_empty());
        assert!(replace_rules::list(&mut conn, rule.id).await.unwrap().is_empty());
        assert!(media::list_extensions(&mut conn, rule.id).await.unwrap().is_empty());
        assert!(push::list(&mut conn, rule.id).await.unwrap().is_empty());
        assert!(sync_edges::peers_of(&mut conn, rule.id).await.unwrap().is_empty());
        assert!(sync_edges::peers_of(&mut conn, peer.id).await.unwrap().is_empty());
        assert!(rss_configs::get(&mut conn, rule.id).await.unwrap().is_none());

        // The flags row is gone too (reads back as the all-false default).
        let flags = media::get_flags(&mut conn, rule.id).await.unwrap();
        assert!(!flags.photo);

        // dst chat lost its only rule and was cleaned up; src survives
        // through the peer rule.
        assert!(chats::find(&mut conn, dst.id).await.unwrap().is_none());
        assert!(chats::find(&mut conn, src.id).await.unwrap().is_some());
        assert!(chats::find(&mut conn, other.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn orphan_cleanup_clears_dangling_edit_pointers() {
        let db = test_db().await;
        let mut conn = db.pool.acquire().await.unwrap();

        let src = chats::upsert(&mut conn, "-1001", "src").await.unwrap();
        let dst = chats::upsert(&mut conn, "-1002", "dst").await.unwrap();
        let keep_src = chats::upsert(&mut conn, "-1003", "keep-src").await.unwrap();

        let doomed = create(&mut conn, src.id, dst.id, 10.0, "07:00").await.unwrap();
        create(&mut conn, keep_src.id, dst.id, 10.0, "07:00").await.unwrap();

        chats::set_current_edit_rule(&mut conn, dst.id, Some(doomed.id)).await.unwrap();

        delete_cascade(&mut conn, doomed.id).await.unwrap();

        // dst still has a rule, so it stays, but its pointer at the deleted
        // rule is cleared.
        let dst = chats::find(&mut conn, dst.id).await.unwrap().unwrap();
        assert_eq!(dst.current_edit_rule_id, None);
        assert!(chats::find(&mut conn, src.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enabled_for_source_matches_stored_id_spellings() {
        let db = test_db().await;
        let mut conn = db.pool.acquire().await.unwrap();

        let src = chats::upsert(&mut conn, "-1001234", "src").await.unwrap();
        let dst = chats::upsert(&mut conn, "-1002", "dst").await.unwrap();
        let rule = create(&mut conn, src.id, dst.id, 10.0, "07:00").await.unwrap();

        let found = enabled_for_source(
            &mut conn,
            &["-1001234".to_string(), "-1001001234".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, rule.id);

        set_bool(&mut conn, rule.id, BoolField::Enabled, false).await.unwrap();
        let found = enabled_for_source(&mut conn, &["-1001234".to_string()]).await.unwrap();
        assert!(found.is_empty());
    }
}
