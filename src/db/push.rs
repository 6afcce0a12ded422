use sqlx::SqliteConnection;

use crate::error::Result;
use crate::models::{MediaSendMode, PushConfig};

pub async fn list(conn: &mut SqliteConnection, rule_id: i64) -> Result<Vec<PushConfig>> {
    let configs =
        sqlx::query_as::<_, PushConfig>("SELECT * FROM push_configs WHERE rule_id = ? ORDER BY id")
            .bind(rule_id)
            .fetch_all(conn)
            .await?;
    Ok(configs)
}

pub async fn list_enabled(conn: &mut SqliteConnection, rule_id: i64) -> Result<Vec<PushConfig>> {
    let configs = sqlx::query_as::<_, PushConfig>(
        "SELECT * FROM push_configs WHERE rule_id = ? AND enabled = 1 ORDER BY id",
    )
    .bind(rule_id)
    .fetch_all(conn)
    .await?;
    Ok(configs)
}

/// De-duplicated on `(rule, channel_url)`; returns false when the URL was
/// already configured.
pub async fn add(conn: &mut SqliteConnection, rule_id: i64, channel_url: &str) -> Result<bool> {
    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO push_configs (rule_id, channel_url) VALUES (?, ?)",
    )
    .bind(rule_id)
    .bind(channel_url)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(inserted > 0)
}

/// The synchronizer matches peer rows by URL; a missing row is a no-op.
pub async fn delete_by_url(
    conn: &mut SqliteConnection,
    rule_id: i64,
    channel_url: &str,
) -> Result<u64> {
    let affected = sqlx::query("DELETE FROM push_configs WHERE rule_id = ? AND channel_url = ?")
        .bind(rule_id)
        .bind(channel_url)
        .execute(conn)
        .await?
        .rows_affected();
    Ok(affected)
}

pub async fn set_enabled_by_url(
    conn: &mut SqliteConnection,
    rule_id: i64,
    channel_url: &str,
    enabled: bool,
) -> Result<u64> {
    let affected =
        sqlx::query("UPDATE push_configs SET enabled = ? WHERE rule_id = ? AND channel_url = ?")
            .bind(enabled)
            .bind(rule_id)
            .bind(channel_url)
            .execute(conn)
            .await?
            .rows_affected();
    Ok(affected)
}

pub async fn set_media_send_mode_by_url(
    conn: &mut SqliteConnection,
    rule_id: i64,
    channel_url: &str,
    mode: MediaSendMode,
) -> Result<u64> {
    let affected = sqlx::query(
        "UPDATE push_configs SET media_send_mode = ? WHERE rule_id = ? AND channel_url = ?",
    )
    .bind(mode)
    .bind(rule_id)
    .bind(channel_url)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(affected)
}
