use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const STATE_TTL: Duration = Duration::from_secs(300);

/// What the next free-text message from this (user, chat) will be consumed
/// as. Every variant carries the rule being configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    SetAiPrompt,
    SetSummaryPrompt,
    SetUserinfoTemplate,
    SetTimeTemplate,
    SetOriginalLinkTemplate,
    AddPushChannel,
}

#[derive(Debug, Clone)]
pub struct PendingInput {
    pub kind: PendingKind,
    pub rule_id: i64,
    /// Menu message the answer re-renders, when known.
    pub anchor_message_id: Option<i32>,
}

struct Slot {
    pending: PendingInput,
    expiry: CancellationToken,
    generation: u64,
}

/// Short-lived per-(user, chat) state for multi-turn settings. Entries are
/// cleared on answer, on `/cancel`, or after the 5-minute TTL.
#[derive(Clone, Default)]
pub struct InteractionState {
    slots: Arc<Mutex<HashMap<(i64, i64), Slot>>>,
    generations: Arc<AtomicU64>,
}

impl InteractionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, user_id: i64, chat_id: i64, pending: PendingInput) {
        self.set_with_ttl(user_id, chat_id, pending, STATE_TTL).await;
    }

    pub async fn set_with_ttl(
        &self,
        user_id: i64,
        chat_id: i64,
        pending: PendingInput,
        ttl: Duration,
    ) {
        let expiry = CancellationToken::new();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        {
            let mut slots = self.slots.lock().await;
            if let Some(previous) = slots.insert(
                (user_id, chat_id),
                Slot {
                    pending,
                    expiry: expiry.clone(),
                    generation,
                },
            ) {
                previous.expiry.cancel();
            }
        }

        let slots = self.slots.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = expiry.cancelled() => {}
                _ = tokio::time::sleep(ttl) => {
                    let mut slots = slots.lock().await;
                    // Only evict the entry this timer was armed for; a
                    // replacement carries a newer generation.
                    let stale = slots
                        .get(&(user_id, chat_id))
                        .map(|slot| slot.generation == generation)
                        .unwrap_or(false);
                    if stale {
                        slots.remove(&(user_id, chat_id));
                        debug!(user_id, chat_id, "interaction state expired");
                    }
                }
            }
        });
    }

    /// Consumes the state for this (user, chat), if any.
    pub async fn take(&self, user_id: i64, chat_id: i64) -> Option<PendingInput> {
        let mut slots = self.slots.lock().await;
        slots.remove(&(user_id, chat_id)).map(|slot| {
            slot.expiry.cancel();
            slot.pending
        })
    }

    /// Clears without consuming (the `/cancel` path).
    pub async fn clear(&self, user_id: i64, chat_id: i64) -> bool {
        self.take(user_id, chat_id).await.is_some()
    }

    pub async fn peek(&self, user_id: i64, chat_id: i64) -> Option<PendingInput> {
        let slots = self.slots.lock().await;
        slots.get(&(user_id, chat_id)).map(|s| s.pending.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(kind: PendingKind) -> PendingInput {
        PendingInput {
            kind,
            rule_id: 1,
            anchor_message_id: None,
        }
    }

    #[tokio::test]
    async fn take_consumes_state_once() {
        let state = InteractionState::new();
        state.set(10, 20, pending(PendingKind::SetAiPrompt)).await;

        let taken = state.take(10, 20).await.unwrap();
        assert_eq!(taken.kind, PendingKind::SetAiPrompt);
        assert!(state.take(10, 20).await.is_none());
    }

    #[tokio::test]
    async fn unrelated_keys_are_not_consumed() {
        let state = InteractionState::new();
        state.set(10, 20, pending(PendingKind::AddPushChannel)).await;
        assert!(state.take(11, 20).await.is_none());
        assert!(state.take(10, 21).await.is_none());
        assert!(state.take(10, 20).await.is_some());
    }

    #[tokio::test]
    async fn ttl_expires_the_state() {
        let state = InteractionState::new();
        state
            .set_with_ttl(
                1,
                2,
                pending(PendingKind::SetTimeTemplate),
                Duration::from_millis(20),
            )
            .await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(state.take(1, 2).await.is_none());
    }

    #[tokio::test]
    async fn replacing_a_state_cancels_the_old_timer() {
        let state = InteractionState::new();
        state
            .set_with_ttl(
                1,
                2,
                pending(PendingKind::SetAiPrompt),
                Duration::from_millis(20),
            )
            .await;
        state.set(1, 2, pending(PendingKind::SetSummaryPrompt)).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        let current = state.peek(1, 2).await.unwrap();
        assert_eq!(current.kind, PendingKind::SetSummaryPrompt);
    }
}
