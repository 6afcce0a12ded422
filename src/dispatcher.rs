use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db;
use crate::pipeline::{Pipeline, PipelineEnv};
use crate::telegram::{chat_id_candidates, TgMessage};

/// A media group's trigger is whichever sibling arrives first; the rest are
/// ignored for this long.
const GROUP_DEDUP_WINDOW: Duration = Duration::from_secs(300);

/// Resolves the rules for each incoming message and runs one pipeline per
/// rule. Flood-waits surface as pipeline errors and are never retried here.
#[derive(Clone)]
pub struct Dispatcher {
    env: PipelineEnv,
    seen_groups: Arc<Mutex<HashMap<(i64, String), Instant>>>,
}

impl Dispatcher {
    pub fn new(env: PipelineEnv) -> Self {
        Self {
            env,
            seen_groups: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn env(&self) -> &PipelineEnv {
        &self.env
    }

    /// Returns the number of rules that processed the message.
    #[tracing::instrument(skip(self, message), fields(chat_id = message.chat_id, message_id = message.id))]
    pub async fn dispatch(&self, message: TgMessage) -> usize {
        if let Some(grouped_id) = &message.grouped_id {
            if !self.claim_group(message.chat_id, grouped_id).await {
                debug!(grouped_id, "sibling of an already-claimed media group");
                return 0;
            }
        }

        let candidates = chat_id_candidates(message.chat_id);
        let rules = {
            let mut conn = match self.env.db.pool.acquire().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "failed to acquire connection for dispatch");
                    return 0;
                }
            };
            match db::rules::enabled_for_source(&mut conn, &candidates).await {
                Ok(rules) => rules,
                Err(e) => {
                    warn!(error = %e, "failed to resolve rules");
                    return 0;
                }
            }
        };

        if rules.is_empty() {
            return 0;
        }

        let count = rules.len();
        for rule in rules {
            let rule_id = rule.id;
            let ctx = Pipeline::new(&self.env, rule).run(message.clone()).await;
            if ctx.errors.is_empty() {
                info!(rule_id, forwarded = ctx.should_forward, "pipeline finished");
            } else {
                warn!(rule_id, forwarded = ctx.should_forward, errors = ?ctx.errors,
                    "pipeline finished with errors");
            }
        }
        count
    }

    /// First sibling of a media group wins; the claim expires so a
    /// re-posted group id works again later.
    async fn claim_group(&self, chat_id: i64, grouped_id: &str) -> bool {
        let mut seen = self.seen_groups.lock().await;
        let now = Instant::now();
        seen.retain(|_, claimed| now.duration_since(*claimed) < GROUP_DEDUP_WINDOW);

        let key = (chat_id, grouped_id.to_string());
        if seen.contains_key(&key) {
            return false;
        }
        seen.insert(key, now);
        true
    }
}
