use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// One item in a rule's feed. Unknown JSON fields are ignored on intake;
/// missing id/published are filled in by the store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Entry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub rule_id: i64,
    #[serde(default)]
    pub message_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub published: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub media: Vec<EntryMedia>,
    #[serde(default)]
    pub original_link: String,
    #[serde(default)]
    pub sender_info: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EntryMedia {
    /// Path of shape `/media/{rule_id}/{filename}` served by the feed
    /// server.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub original_name: Option<String>,
}

fn published_key(entry: &Entry) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&entry.published)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Per-rule bounded FIFO of entries on disk. Entries live in
/// `data/<rule>/entries.json` (whole-file rewrites), media under
/// `media/<rule>/`.
pub struct RssStore {
    data_dir: PathBuf,
    media_dir: PathBuf,
    locks: Mutex<HashMap<i64, Arc<RwLock<()>>>>,
}

impl RssStore {
    pub fn new(data_dir: PathBuf, media_dir: PathBuf) -> Self {
        Self {
            data_dir,
            media_dir,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, rule_id: i64) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(rule_id)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    fn entries_path(&self, rule_id: i64) -> PathBuf {
        self.data_dir.join(rule_id.to_string()).join("entries.json")
    }

    pub fn media_dir_for(&self, rule_id: i64) -> PathBuf {
        self.media_dir.join(rule_id.to_string())
    }

    pub fn media_path(&self, rule_id: i64, filename: &str) -> PathBuf {
        self.media_dir_for(rule_id)
            .join(crate::utils::sanitize_filename(filename))
    }

    async fn read_entries(&self, rule_id: i64) -> Result<Vec<Entry>> {
        let path = self.entries_path(rule_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let entries: Vec<Entry> = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::EntryStoreIo(std::io::Error::other(e)))?;
                Ok(entries)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::EntryStoreIo(e)),
        }
    }

    async fn write_entries(&self, rule_id: i64, entries: &[Entry]) -> Result<()> {
        let path = self.entries_path(rule_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| Error::EntryStoreIo(std::io::Error::other(e)))?;
        tokio::fs::write(&path, json).await?;
        Ok(())
    }

    pub async fn list(&self, rule_id: i64) -> Result<Vec<Entry>> {
        let lock = self.lock_for(rule_id).await;
        let _guard = lock.read().await;
        self.read_entries(rule_id).await
    }

    /// Appends an entry, filling in id/published/created_at when absent,
    /// then evicts oldest-by-published until the set fits `max_items`.
    pub async fn add(&self, rule_id: i64, mut entry: Entry, max_items: usize) -> Result<Entry> {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        if entry.published.is_empty() {
            entry.published = Utc::now().to_rfc3339();
        }
        if entry.created_at.is_empty() {
            entry.created_at = Utc::now().to_rfc3339();
        }
        entry.rule_id = rule_id;

        let lock = self.lock_for(rule_id).await;
        let _guard = lock.write().await;

        let mut entries = self.read_entries(rule_id).await?;
        entries.push(entry.clone());

        while entries.len() > max_items.max(1) {
            let oldest_index = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| published_key(e))
                .map(|(i, _)| i)
                .unwrap_or(0);
            let evicted = entries.remove(oldest_index);
            debug!(rule_id, entry_id = %evicted.id, "evicting oldest entry");
            self.remove_entry_media(rule_id, &evicted).await;
        }

        self.write_entries(rule_id, &entries).await?;
        Ok(entry)
    }

    pub async fn delete(&self, rule_id: i64, entry_id: &str) -> Result<bool> {
        let lock = self.lock_for(rule_id).await;
        let _guard = lock.write().await;

        let mut entries = self.read_entries(rule_id).await?;
        let before = entries.len();
        let removed: Vec<Entry> = entries
            .iter()
            .filter(|e| e.id == entry_id)
            .cloned()
            .collect();
        entries.retain(|e| e.id != entry_id);

        if entries.len() == before {
            return Ok(false);
        }

        for entry in &removed {
            self.remove_entry_media(rule_id, entry).await;
        }
        self.write_entries(rule_id, &entries).await?;
        Ok(true)
    }

    /// Wipes the rule's data and media trees.
    pub async fn delete_rule(&self, rule_id: i64) -> Result<()> {
        let lock = self.lock_for(rule_id).await;
        let _guard = lock.write().await;

        for dir in [
            self.data_dir.join(rule_id.to_string()),
            self.media_dir_for(rule_id),
        ] {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::EntryStoreIo(e)),
            }
        }
        Ok(())
    }

    async fn remove_entry_media(&self, rule_id: i64, entry: &Entry) {
        for media in &entry.media {
            if media.filename.is_empty() {
                continue;
            }
            let path = self.media_path(rule_id, &media.filename);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove entry media");
                }
            }
        }
    }

    /// Copies a downloaded file into the rule's media directory, returning
    /// the stored filename.
    pub async fn import_media(&self, rule_id: i64, source: &Path) -> Result<String> {
        let filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .map(crate::utils::sanitize_filename)
            .unwrap_or_else(|| "file".to_string());

        let dir = self.media_dir_for(rule_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::copy(source, dir.join(&filename)).await?;
        Ok(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> RssStore {
        RssStore::new(tmp.path().join("data"), tmp.path().join("media"))
    }

    fn entry(id: &str, published: &str) -> Entry {
        Entry {
            id: id.to_string(),
            title: format!("entry {id}"),
            published: published.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn add_fills_missing_id_and_published() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let added = store.add(1, Entry::default(), 10).await.unwrap();
        assert!(!added.id.is_empty());
        assert!(!added.published.is_empty());

        let listed = store.list(1).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, added.id);
    }

    #[tokio::test]
    async fn retention_keeps_newest_by_published() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        for (id, published) in [
            ("e1", "2024-05-01T00:00:00+00:00"),
            ("e2", "2024-05-02T00:00:00+00:00"),
            ("e3", "2024-05-03T00:00:00+00:00"),
            ("e4", "2024-05-04T00:00:00+00:00"),
        ] {
            store.add(1, entry(id, published), 3).await.unwrap();
        }

        let mut ids: Vec<String> = store
            .list(1)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["e2", "e3", "e4"]);
    }

    #[tokio::test]
    async fn eviction_removes_the_entrys_media_files() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let media_dir = store.media_dir_for(1);
        tokio::fs::create_dir_all(&media_dir).await.unwrap();
        tokio::fs::write(media_dir.join("old.jpg"), b"jpg").await.unwrap();

        let mut first = entry("e1", "2024-05-01T00:00:00+00:00");
        first.media.push(EntryMedia {
            url: "/media/1/old.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            size: 3,
            filename: "old.jpg".to_string(),
            original_name: None,
        });
        store.add(1, first, 1).await.unwrap();
        store
            .add(1, entry("e2", "2024-05-02T00:00:00+00:00"), 1)
            .await
            .unwrap();

        assert!(!media_dir.join("old.jpg").exists());
        let listed = store.list(1).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "e2");
    }

    #[tokio::test]
    async fn delete_removes_entry_and_reports_missing() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store
            .add(1, entry("e1", "2024-05-01T00:00:00+00:00"), 10)
            .await
            .unwrap();
        assert!(store.delete(1, "e1").await.unwrap());
        assert!(!store.delete(1, "e1").await.unwrap());
        assert!(store.list(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_rule_wipes_both_trees() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store
            .add(1, entry("e1", "2024-05-01T00:00:00+00:00"), 10)
            .await
            .unwrap();
        let media_dir = store.media_dir_for(1);
        tokio::fs::create_dir_all(&media_dir).await.unwrap();
        tokio::fs::write(media_dir.join("f.bin"), b"x").await.unwrap();

        store.delete_rule(1).await.unwrap();
        assert!(store.list(1).await.unwrap().is_empty());
        assert!(!media_dir.exists());
    }
}
