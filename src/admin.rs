use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

const MEMBERSHIP_TTL: Duration = Duration::from_secs(30 * 60);

/// Operator allowlist plus a per-chat membership cache.
#[derive(Clone)]
pub struct AdminGate {
    admins: Arc<Vec<i64>>,
    cache: Arc<Mutex<HashMap<i64, CacheEntry>>>,
}

struct CacheEntry {
    member_ids: Vec<i64>,
    expires_at: Instant,
}

impl AdminGate {
    pub fn new(admins: Vec<i64>) -> Self {
        Self {
            admins: Arc::new(admins),
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.contains(&user_id)
    }

    /// Cached membership for a chat, refreshed through `fetch` after the
    /// 30-minute TTL lapses.
    pub async fn chat_members<F, Fut>(&self, chat_id: i64, fetch: F) -> Vec<i64>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Option<Vec<i64>>>,
    {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&chat_id) {
                if entry.expires_at > Instant::now() {
                    return entry.member_ids.clone();
                }
            }
        }

        let Some(member_ids) = fetch().await else {
            return Vec::new();
        };

        let mut cache = self.cache.lock().await;
        cache.insert(
            chat_id,
            CacheEntry {
                member_ids: member_ids.clone(),
                expires_at: Instant::now() + MEMBERSHIP_TTL,
            },
        );
        member_ids
    }

    pub async fn invalidate(&self, chat_id: i64) {
        self.cache.lock().await.remove(&chat_id);
    }
}
