use tracing::{debug, warn};

use crate::db::keywords::NewKeyword;
use crate::db::media::MediaFlag;
use crate::db::rules::{BoolField, TextField};
use crate::db::{self, Db};
use crate::error::Result;
use crate::models::{
    AddMode, ExtensionFilterMode, ForwardMode, HandleMode, MediaSendMode, MessageMode, PreviewMode,
};

/// One logical change to a rule, replayable verbatim onto sync peers.
#[derive(Debug, Clone)]
pub enum RuleMutation {
    SetBool(BoolField, bool),
    SetHandleMode(HandleMode),
    SetAddMode(AddMode),
    SetForwardMode(ForwardMode),
    SetMessageMode(MessageMode),
    SetPreviewMode(PreviewMode),
    SetExtensionFilterMode(ExtensionFilterMode),
    SetText(TextField, Option<String>),
    SetSummaryTime(String),
    SetDelaySeconds(i64),
    SetMaxMediaSize(f64),
    AddKeywords(Vec<NewKeyword>),
    DeleteKeywordsByValue(Vec<NewKeyword>),
    AddReplaceRules(Vec<(String, String)>),
    DeleteReplaceRulesByValue(Vec<(String, String)>),
    AddExtensions(Vec<String>),
    DeleteExtensionsByValue(Vec<String>),
    /// The peer's flag is forced to the primary's new value, not toggled.
    SetMediaFlag(MediaFlag, bool),
    AddPushChannel(String),
    DeletePushChannel(String),
    SetPushChannelEnabled(String, bool),
    SetPushChannelMode(String, MediaSendMode),
}

impl RuleMutation {
    /// `enabled` and `sync_enabled` are per-rule knobs and never mirror.
    fn propagates(&self) -> bool {
        !matches!(
            self,
            RuleMutation::SetBool(BoolField::Enabled, _)
                | RuleMutation::SetBool(BoolField::SyncEnabled, _)
        )
    }

    /// Whether the summary scheduler must re-examine affected rules.
    fn touches_schedule(&self) -> bool {
        matches!(
            self,
            RuleMutation::SetSummaryTime(_)
                | RuleMutation::SetBool(BoolField::SummaryEnabled, _)
        )
    }
}

/// What a synchronized apply touched; the caller feeds `reschedule` into
/// the summary scheduler.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub peers_updated: Vec<i64>,
    pub reschedule: Vec<i64>,
}

/// Applies mutations through the single writer path: the primary rule and
/// its outgoing sync peers change within one transaction.
#[derive(Clone)]
pub struct Synchronizer {
    db: Db,
}

impl Synchronizer {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn apply(&self, rule_id: i64, mutation: RuleMutation) -> Result<SyncReport> {
        let mut tx = self.db.begin().await?;
        let mut report = SyncReport::default();

        apply_one(&mut tx, rule_id, &mutation).await?;

        let rule = db::rules::get(&mut tx, rule_id)
            .await?
            .ok_or_else(|| crate::error::Error::RuleValidation(format!("rule {rule_id} missing")))?;

        if mutation.touches_schedule() && rule.summary_enabled {
            report.reschedule.push(rule_id);
        }

        if rule.sync_enabled && mutation.propagates() {
            // Single-level fan-out: outgoing edges only, never transitive.
            let peers = db::sync_edges::peers_of(&mut tx, rule_id).await?;
            for peer_id in peers {
                let Some(peer) = db::rules::get(&mut tx, peer_id).await? else {
                    warn!(rule_id, peer_id, "sync peer missing, skipping");
                    continue;
                };

                apply_one(&mut tx, peer_id, &mutation).await?;
                report.peers_updated.push(peer_id);
                debug!(rule_id, peer_id, "mutation mirrored to peer");

                if mutation.touches_schedule() && peer.summary_enabled {
                    report.reschedule.push(peer_id);
                }
            }
        }

        tx.commit().await?;
        Ok(report)
    }
}

async fn apply_one(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    rule_id: i64,
    mutation: &RuleMutation,
) -> Result<()> {
    match mutation {
        RuleMutation::SetBool(field, value) => {
            db::rules::set_bool(&mut *tx, rule_id, *field, *value).await
        }
        RuleMutation::SetHandleMode(mode) => {
            db::rules::set_handle_mode(&mut *tx, rule_id, *mode).await
        }
        RuleMutation::SetAddMode(mode) => db::rules::set_add_mode(&mut *tx, rule_id, *mode).await,
        RuleMutation::SetForwardMode(mode) => {
            db::rules::set_forward_mode(&mut *tx, rule_id, *mode).await
        }
        RuleMutation::SetMessageMode(mode) => {
            db::rules::set_message_mode(&mut *tx, rule_id, *mode).await
        }
        RuleMutation::SetPreviewMode(mode) => {
            db::rules::set_preview_mode(&mut *tx, rule_id, *mode).await
        }
        RuleMutation::SetExtensionFilterMode(mode) => {
            db::rules::set_extension_filter_mode(&mut *tx, rule_id, *mode).await
        }
        RuleMutation::SetText(field, value) => {
            db::rules::set_text(&mut *tx, rule_id, *field, value.as_deref()).await
        }
        RuleMutation::SetSummaryTime(time) => {
            db::rules::set_summary_time(&mut *tx, rule_id, time).await
        }
        RuleMutation::SetDelaySeconds(seconds) => {
            db::rules::set_delay_seconds(&mut *tx, rule_id, *seconds).await
        }
        RuleMutation::SetMaxMediaSize(size) => {
            db::rules::set_max_media_size(&mut *tx, rule_id, *size).await
        }
        RuleMutation::AddKeywords(items) => db::keywords::add(&mut *tx, rule_id, items)
            .await
            .map(|_| ()),
        RuleMutation::DeleteKeywordsByValue(items) => {
            for item in items {
                db::keywords::delete_by_value(&mut *tx, rule_id, item).await?;
            }
            Ok(())
        }
        RuleMutation::AddReplaceRules(items) => db::replace_rules::add(&mut *tx, rule_id, items)
            .await
            .map(|_| ()),
        RuleMutation::DeleteReplaceRulesByValue(items) => {
            for (pattern, replacement) in items {
                db::replace_rules::delete_by_value(&mut *tx, rule_id, pattern, replacement).await?;
            }
            Ok(())
        }
        RuleMutation::AddExtensions(extensions) => {
            db::media::add_extensions(&mut *tx, rule_id, extensions)
                .await
                .map(|_| ())
        }
        RuleMutation::DeleteExtensionsByValue(extensions) => {
            for extension in extensions {
                db::media::delete_extension_by_value(&mut *tx, rule_id, extension).await?;
            }
            Ok(())
        }
        RuleMutation::SetMediaFlag(flag, value) => {
            db::media::set_flag(&mut *tx, rule_id, *flag, *value).await
        }
        RuleMutation::AddPushChannel(url) => {
            db::push::add(&mut *tx, rule_id, url).await.map(|_| ())
        }
        RuleMutation::DeletePushChannel(url) => db::push::delete_by_url(&mut *tx, rule_id, url)
            .await
            .map(|_| ()),
        RuleMutation::SetPushChannelEnabled(url, enabled) => {
            db::push::set_enabled_by_url(&mut *tx, rule_id, url, *enabled)
                .await
                .map(|_| ())
        }
        RuleMutation::SetPushChannelMode(url, mode) => {
            db::push::set_media_send_mode_by_url(&mut *tx, rule_id, url, *mode)
                .await
                .map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    async fn setup_chain(db: &Db) -> (i64, i64, i64) {
        let mut conn = db.pool.acquire().await.unwrap();
        let src = db::chats::upsert(&mut conn, "-1001", "src").await.unwrap();
        let t1 = db::chats::upsert(&mut conn, "-1002", "t1").await.unwrap();
        let t2 = db::chats::upsert(&mut conn, "-1003", "t2").await.unwrap();
        let t3 = db::chats::upsert(&mut conn, "-1004", "t3").await.unwrap();

        let a = db::rules::create(&mut conn, src.id, t1.id, 10.0, "07:00")
            .await
            .unwrap();
        let b = db::rules::create(&mut conn, src.id, t2.id, 10.0, "07:00")
            .await
            .unwrap();
        let c = db::rules::create(&mut conn, src.id, t3.id, 10.0, "07:00")
            .await
            .unwrap();

        db::rules::set_bool(&mut conn, a.id, BoolField::SyncEnabled, true)
            .await
            .unwrap();
        db::rules::set_bool(&mut conn, b.id, BoolField::SyncEnabled, true)
            .await
            .unwrap();
        db::sync_edges::add(&mut conn, a.id, b.id).await.unwrap();
        db::sync_edges::add(&mut conn, b.id, c.id).await.unwrap();

        (a.id, b.id, c.id)
    }

    #[tokio::test]
    async fn settings_toggle_mirrors_to_peer() {
        let db = test_db().await;
        let (a, b, _) = setup_chain(&db).await;
        let sync = Synchronizer::new(db.clone());

        let report = sync
            .apply(a, RuleMutation::SetBool(BoolField::AiEnabled, true))
            .await
            .unwrap();
        assert_eq!(report.peers_updated, vec![b]);

        let mut conn = db.pool.acquire().await.unwrap();
        assert!(db::rules::get(&mut conn, a).await.unwrap().unwrap().ai_enabled);
        assert!(db::rules::get(&mut conn, b).await.unwrap().unwrap().ai_enabled);
    }

    #[tokio::test]
    async fn fan_out_is_not_transitive() {
        let db = test_db().await;
        let (a, b, c) = setup_chain(&db).await;
        let sync = Synchronizer::new(db.clone());

        sync.apply(a, RuleMutation::SetDelaySeconds(30)).await.unwrap();

        let mut conn = db.pool.acquire().await.unwrap();
        assert_eq!(db::rules::get(&mut conn, a).await.unwrap().unwrap().delay_seconds, 30);
        assert_eq!(db::rules::get(&mut conn, b).await.unwrap().unwrap().delay_seconds, 30);
        // b -> c is a separate edge; a's mutation must not ride through it.
        assert_eq!(db::rules::get(&mut conn, c).await.unwrap().unwrap().delay_seconds, 0);
    }

    #[tokio::test]
    async fn sync_disabled_rules_do_not_fan_out() {
        let db = test_db().await;
        let (a, b, _) = setup_chain(&db).await;
        {
            let mut conn = db.pool.acquire().await.unwrap();
            db::rules::set_bool(&mut conn, a, BoolField::SyncEnabled, false)
                .await
                .unwrap();
        }
        let sync = Synchronizer::new(db.clone());

        let report = sync
            .apply(a, RuleMutation::SetMaxMediaSize(25.0))
            .await
            .unwrap();
        assert!(report.peers_updated.is_empty());

        let mut conn = db.pool.acquire().await.unwrap();
        assert_eq!(
            db::rules::get(&mut conn, b).await.unwrap().unwrap().max_media_size_mb,
            10.0
        );
    }

    #[tokio::test]
    async fn enabled_itself_never_propagates() {
        let db = test_db().await;
        let (a, b, _) = setup_chain(&db).await;
        let sync = Synchronizer::new(db.clone());

        sync.apply(a, RuleMutation::SetBool(BoolField::Enabled, false))
            .await
            .unwrap();

        let mut conn = db.pool.acquire().await.unwrap();
        assert!(!db::rules::get(&mut conn, a).await.unwrap().unwrap().enabled);
        assert!(db::rules::get(&mut conn, b).await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn keyword_add_and_delete_mirror_by_value() {
        let db = test_db().await;
        let (a, b, _) = setup_chain(&db).await;
        let sync = Synchronizer::new(db.clone());

        let kw = NewKeyword {
            text: "alpha".to_string(),
            is_regex: false,
            is_blacklist: false,
        };
        sync.apply(a, RuleMutation::AddKeywords(vec![kw.clone()]))
            .await
            .unwrap();

        let mut conn = db.pool.acquire().await.unwrap();
        assert_eq!(db::keywords::list(&mut conn, b).await.unwrap().len(), 1);
        drop(conn);

        sync.apply(a, RuleMutation::DeleteKeywordsByValue(vec![kw]))
            .await
            .unwrap();

        let mut conn = db.pool.acquire().await.unwrap();
        assert!(db::keywords::list(&mut conn, a).await.unwrap().is_empty());
        assert!(db::keywords::list(&mut conn, b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn media_flag_is_forced_to_value_not_toggled() {
        let db = test_db().await;
        let (a, b, _) = setup_chain(&db).await;

        // Peer already has the flag on; mirroring "on" must leave it on.
        {
            let mut conn = db.pool.acquire().await.unwrap();
            db::media::set_flag(&mut conn, b, MediaFlag::Video, true)
                .await
                .unwrap();
        }

        let sync = Synchronizer::new(db.clone());
        sync.apply(a, RuleMutation::SetMediaFlag(MediaFlag::Video, true))
            .await
            .unwrap();

        let mut conn = db.pool.acquire().await.unwrap();
        assert!(db::media::get_flags(&mut conn, a).await.unwrap().video);
        assert!(db::media::get_flags(&mut conn, b).await.unwrap().video);
    }

    #[tokio::test]
    async fn push_mutations_match_by_channel_url() {
        let db = test_db().await;
        let (a, b, _) = setup_chain(&db).await;
        let sync = Synchronizer::new(db.clone());

        sync.apply(
            a,
            RuleMutation::AddPushChannel("ntfy://host/topic".to_string()),
        )
        .await
        .unwrap();

        let mut conn = db.pool.acquire().await.unwrap();
        assert_eq!(db::push::list(&mut conn, b).await.unwrap().len(), 1);
        drop(conn);

        // Deleting a URL absent on the peer is a silent skip.
        {
            let mut conn = db.pool.acquire().await.unwrap();
            db::push::delete_by_url(&mut conn, b, "ntfy://host/topic")
                .await
                .unwrap();
        }
        sync.apply(
            a,
            RuleMutation::DeletePushChannel("ntfy://host/topic".to_string()),
        )
        .await
        .unwrap();

        let mut conn = db.pool.acquire().await.unwrap();
        assert!(db::push::list(&mut conn, a).await.unwrap().is_empty());
        assert!(db::push::list(&mut conn, b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn summary_time_copy_requests_reschedule_of_summary_peers() {
        let db = test_db().await;
        let (a, b, _) = setup_chain(&db).await;
        {
            let mut conn = db.pool.acquire().await.unwrap();
            db::rules::set_bool(&mut conn, b, BoolField::SummaryEnabled, true)
                .await
                .unwrap();
        }

        let sync = Synchronizer::new(db.clone());
        let report = sync
            .apply(a, RuleMutation::SetSummaryTime("09:30".to_string()))
            .await
            .unwrap();

        // Primary has summaries off, so only the peer needs rescheduling.
        assert_eq!(report.reschedule, vec![b]);

        let mut conn = db.pool.acquire().await.unwrap();
        assert_eq!(
            db::rules::get(&mut conn, b).await.unwrap().unwrap().summary_time,
            "09:30"
        );
    }
}
