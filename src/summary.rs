use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ai::{render_prompt, AiRegistry, AiRequest};
use crate::config::Config;
use crate::db::{self, Db};
use crate::error::Error;
use crate::models::Rule;
use crate::telegram::{IterOptions, SendOptions, TelegramClients, TgMessage};
use crate::utils::split_text;

/// Telegram caps messages at 4096 characters; parts stay under that with
/// headroom for the header.
const PART_LIMIT: usize = 3796;
/// At most this many summaries run at once so digests cannot starve the
/// forward path.
const MAX_CONCURRENT_SUMMARIES: usize = 2;

struct JobHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Per-rule daily digest tasks: one recurring task per rule with
/// `summary_enabled`, firing at its `summary_time` in the configured
/// timezone.
#[derive(Clone)]
pub struct SummaryScheduler {
    db: Db,
    clients: TelegramClients,
    ai: AiRegistry,
    config: Arc<Config>,
    jobs: Arc<Mutex<HashMap<i64, JobHandle>>>,
    semaphore: Arc<Semaphore>,
}

impl SummaryScheduler {
    pub fn new(db: Db, clients: TelegramClients, ai: AiRegistry, config: Arc<Config>) -> Self {
        Self {
            db,
            clients,
            ai,
            config,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_SUMMARIES)),
        }
    }

    /// Loads every summary-enabled rule and schedules it.
    pub async fn start_all(&self) -> anyhow::Result<usize> {
        let mut conn = self.db.pool.acquire().await?;
        let rules = db::rules::with_summary_enabled(&mut conn).await?;
        drop(conn);

        let count = rules.len();
        for rule in rules {
            self.schedule(rule).await;
        }
        info!(count, "summary scheduler started");
        Ok(count)
    }

    pub async fn schedule(&self, rule: Rule) {
        self.cancel(rule.id).await;
        if !rule.summary_enabled {
            return;
        }

        let cancel = CancellationToken::new();
        let scheduler = self.clone();
        let token = cancel.clone();
        let rule_id = rule.id;

        let handle = tokio::spawn(async move {
            scheduler.job_loop(rule, token).await;
        });

        let mut jobs = self.jobs.lock().await;
        jobs.insert(rule_id, JobHandle { cancel, handle });
        debug!(rule_id, "summary job scheduled");
    }

    /// Re-reads the rule and replaces its task; used after `summary_time`
    /// or `summary_enabled` changes (including synchronized ones).
    pub async fn reschedule(&self, rule_id: i64) {
        let rule = {
            let Ok(mut conn) = self.db.pool.acquire().await else {
                return;
            };
            match db::rules::get(&mut conn, rule_id).await {
                Ok(Some(rule)) => rule,
                _ => {
                    self.cancel(rule_id).await;
                    return;
                }
            }
        };
        self.schedule(rule).await;
    }

    pub async fn cancel(&self, rule_id: i64) {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.remove(&rule_id) {
            job.cancel.cancel();
            job.handle.abort();
            debug!(rule_id, "summary job cancelled");
        }
    }

    /// One-off run outside the schedule (the operator's "summarize now"
    /// button); the recurring task is untouched.
    pub async fn run_now(&self, rule_id: i64) {
        let rule = {
            let Ok(mut conn) = self.db.pool.acquire().await else {
                return;
            };
            match db::rules::get(&mut conn, rule_id).await {
                Ok(Some(rule)) => rule,
                _ => return,
            }
        };

        let scheduler = self.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.run_summary(&rule).await {
                error!(rule_id = rule.id, error = %e, "manual summary failed");
            }
        });
    }

    async fn job_loop(&self, rule: Rule, cancel: CancellationToken) {
        loop {
            let now = Utc::now();
            let Some(next) = next_fire(&rule.summary_time, self.config.timezone, now) else {
                warn!(rule_id = rule.id, time = %rule.summary_time, "unschedulable summary time");
                return;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(rule_id = rule.id, at = %next, "next summary fire");

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.run_summary(&rule).await {
                        error!(rule_id = rule.id, error = %e, "summary run failed");
                    }
                }
            }
        }
    }

    async fn run_summary(&self, rule: &Rule) -> anyhow::Result<()> {
        let _permit = self.semaphore.acquire().await?;

        let mut conn = self.db.pool.acquire().await?;
        let source = db::chats::find(&mut conn, rule.source_chat_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("source chat missing for rule {}", rule.id))?;
        let target = db::chats::find(&mut conn, rule.target_chat_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("target chat missing for rule {}", rule.id))?;
        drop(conn);

        let source_id: i64 = source.telegram_id.parse()?;
        let target_id: i64 = target.telegram_id.parse()?;

        let end = Utc::now();
        let start = window_start(&rule.summary_time, self.config.timezone, end);

        let messages = self.collect_messages(source_id, start, end).await?;
        if messages.is_empty() {
            info!(rule_id = rule.id, "nothing to summarize");
            return Ok(());
        }

        let joined = messages
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let template = rule
            .summary_prompt
            .as_deref()
            .unwrap_or(&self.config.default_summary_prompt);
        let digest = self
            .ai
            .process(
                rule.ai_model.as_deref(),
                &AiRequest {
                    prompt: render_prompt(template, &joined),
                    image_paths: Vec::new(),
                },
            )
            .await?;

        let tz = self.config.timezone;
        let header = build_header(
            &source.display_name,
            start.with_timezone(&tz),
            end.with_timezone(&tz),
            messages.len(),
        );

        let full = format!("{header}{digest}");
        let parts = split_text(&full, PART_LIMIT);

        let client = self.clients.for_rule(rule.use_bot_account);
        let mut first_message: Option<TgMessage> = None;

        for part in &parts {
            let sent = self.send_part(&*client, target_id, part, rule).await?;
            if first_message.is_none() {
                first_message = Some(sent);
            }
        }

        if rule.pin_summary {
            if let Some(first) = &first_message {
                if let Err(e) = client.pin_message(target_id, first.id).await {
                    warn!(rule_id = rule.id, error = %e, "failed to pin summary");
                }
            }
        }

        info!(rule_id = rule.id, parts = parts.len(), "summary delivered");
        Ok(())
    }

    /// Pages the source history backwards, keeping non-empty texts inside
    /// the window, stopping at the first message older than its start.
    async fn collect_messages(
        &self,
        source_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<TgMessage>> {
        let client = self.clients.user_or_bot();
        let mut kept = Vec::new();
        let mut max_id: Option<i32> = None;

        loop {
            let page = match client
                .iter_messages(
                    source_id,
                    IterOptions {
                        limit: self.config.summary_batch_size,
                        max_id,
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(page) => page,
                Err(Error::Unsupported(reason)) => {
                    warn!(reason, "history iteration unavailable");
                    return Ok(kept);
                }
                Err(e) => return Err(e.into()),
            };

            if page.is_empty() {
                break;
            }

            let (in_window, reached_older) = filter_window(&page, start, end);
            kept.extend(in_window.into_iter().cloned());
            if reached_older {
                break;
            }

            max_id = page.iter().map(|m| m.id).min();
            tokio::time::sleep(Duration::from_secs(self.config.summary_batch_delay)).await;
        }

        kept.reverse();
        Ok(kept)
    }

    /// Sends one digest part: Markdown first, plain-text retry on a parse
    /// failure, one flood-wait honor; two attempts total.
    async fn send_part(
        &self,
        client: &dyn crate::telegram::TelegramIO,
        target_id: i64,
        part: &str,
        rule: &Rule,
    ) -> anyhow::Result<TgMessage> {
        let opts = SendOptions {
            parse_mode: Some(rule.message_mode),
            link_preview: false,
            ..Default::default()
        };

        match client.send_message(target_id, part, &opts).await {
            Ok(sent) => Ok(sent),
            Err(Error::FloodWait { seconds }) => {
                tokio::time::sleep(Duration::from_secs(seconds)).await;
                Ok(client.send_message(target_id, part, &opts).await?)
            }
            Err(_) => {
                // Markdown breakage falls back to plain text once.
                let plain = SendOptions {
                    parse_mode: None,
                    link_preview: false,
                    ..Default::default()
                };
                Ok(client.send_message(target_id, part, &plain).await?)
            }
        }
    }
}

/// The digest header: chat name, window span, message count.
pub fn build_header(
    chat_name: &str,
    start: DateTime<Tz>,
    end: DateTime<Tz>,
    count: usize,
) -> String {
    let hours = ((end - start).num_minutes() as f64 / 60.0).round() as i64;
    format!(
        "{chat_name} — {hours}h summary\n{} — {}\n{count} messages\n\n",
        start.format("%Y-%m-%d %H:%M"),
        end.format("%Y-%m-%d %H:%M"),
    )
}

/// Messages from one page that fall inside `[start, end]` with non-empty
/// text, plus whether the page reached past the window start.
pub fn filter_window<'a>(
    page: &'a [TgMessage],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> (Vec<&'a TgMessage>, bool) {
    let mut kept = Vec::new();
    let mut reached_older = false;

    for message in page {
        if message.date < start {
            reached_older = true;
            break;
        }
        if message.date <= end && !message.text.trim().is_empty() {
            kept.push(message);
        }
    }
    (kept, reached_older)
}

/// Next occurrence of `HH:MM` in `tz`, strictly after `now`.
pub fn next_fire(summary_time: &str, tz: Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(summary_time, "%H:%M").ok()?;
    let local_now = now.with_timezone(&tz);

    let today = local_now.date_naive().and_time(time);
    let candidate = tz.from_local_datetime(&today).earliest()?;
    let candidate = if candidate > local_now {
        candidate
    } else {
        let tomorrow = (local_now.date_naive() + ChronoDuration::days(1)).and_time(time);
        tz.from_local_datetime(&tomorrow).earliest()?
    };
    Some(candidate.with_timezone(&Utc))
}

/// Start of the 24 h collection window ending at the fire time.
pub fn window_start(summary_time: &str, tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(time) = NaiveTime::parse_from_str(summary_time, "%H:%M").ok() else {
        return now - ChronoDuration::hours(24);
    };
    let local_now = now.with_timezone(&tz);
    let today = local_now.date_naive().and_time(time);
    match tz.from_local_datetime(&today).earliest() {
        Some(fire_today) => (fire_today - ChronoDuration::hours(24)).with_timezone(&Utc),
        None => now - ChronoDuration::hours(24),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn shanghai() -> Tz {
        "Asia/Shanghai".parse().unwrap()
    }

    fn message(id: i32, text: &str, date: DateTime<Utc>) -> TgMessage {
        TgMessage {
            id,
            chat_id: -100,
            grouped_id: None,
            date,
            text: text.to_string(),
            media: None,
            sender: None,
            buttons: Vec::new(),
            chat_username: None,
            is_channel_post: true,
        }
    }

    #[test]
    fn next_fire_is_today_when_still_ahead() {
        // 2024-05-01 06:00 +08 is 2024-04-30 22:00 UTC.
        let now = Utc.with_ymd_and_hms(2024, 4, 30, 22, 0, 0).unwrap();
        let next = next_fire("07:00", shanghai(), now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 4, 30, 23, 0, 0).unwrap());
    }

    #[test]
    fn next_fire_rolls_to_tomorrow_when_passed() {
        // 08:30 +08 on 2024-05-01.
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 30, 0).unwrap();
        let next = next_fire("07:00", shanghai(), now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 23, 0, 0).unwrap());
    }

    #[test]
    fn next_fire_rejects_garbage() {
        let now = Utc::now();
        assert!(next_fire("7am", shanghai(), now).is_none());
    }

    #[test]
    fn window_start_is_24h_before_todays_fire_time() {
        // Fired at 07:00 +08 on 2024-05-01 (23:00 UTC on 04-30).
        let now = Utc.with_ymd_and_hms(2024, 4, 30, 23, 0, 5).unwrap();
        let start = window_start("07:00", shanghai(), now);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 4, 29, 23, 0, 0).unwrap());
    }

    #[test]
    fn filter_window_keeps_texts_in_range_and_flags_older() {
        let start = Utc.with_ymd_and_hms(2024, 4, 30, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

        let page = vec![
            message(5, "newest", Utc.with_ymd_and_hms(2024, 4, 30, 20, 0, 0).unwrap()),
            message(4, "", Utc.with_ymd_and_hms(2024, 4, 30, 12, 0, 0).unwrap()),
            message(3, "kept", Utc.with_ymd_and_hms(2024, 4, 30, 6, 0, 0).unwrap()),
            message(2, "too old", Utc.with_ymd_and_hms(2024, 4, 29, 23, 0, 0).unwrap()),
            message(1, "ignored", Utc.with_ymd_and_hms(2024, 4, 29, 22, 0, 0).unwrap()),
        ];

        let (kept, reached_older) = filter_window(&page, start, end);
        let ids: Vec<i32> = kept.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![5, 3]);
        assert!(reached_older);
    }

    #[test]
    fn header_shape_matches_the_digest_format() {
        let tz = shanghai();
        let start = tz.with_ymd_and_hms(2024, 4, 30, 7, 0, 0).unwrap();
        let end = tz.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap();
        let header = build_header("Dev News", start, end, 42);
        assert_eq!(
            header,
            "Dev News — 24h summary\n2024-04-30 07:00 — 2024-05-01 07:00\n42 messages\n\n"
        );
    }
}
