use sqlx::SqliteConnection;

use crate::db::keywords::AddOutcome;
use crate::error::Result;
use crate::models::{MediaExtension, MediaTypeFlags};

/// The five media categories a rule can block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFlag {
    Photo,
    Document,
    Video,
    Audio,
    Voice,
}

impl MediaFlag {
    pub fn column(self) -> &'static str {
        match self {
            MediaFlag::Photo => "photo",
            MediaFlag::Document => "document",
            MediaFlag::Video => "video",
            MediaFlag::Audio => "audio",
            MediaFlag::Voice => "voice",
        }
    }
}

/// Missing row reads as all-false (nothing blocked).
pub async fn get_flags(conn: &mut SqliteConnection, rule_id: i64) -> Result<MediaTypeFlags> {
    let flags =
        sqlx::query_as::<_, MediaTypeFlags>("SELECT * FROM media_type_flags WHERE rule_id = ?")
            .bind(rule_id)
            .fetch_optional(conn)
            .await?;
    Ok(flags.unwrap_or(MediaTypeFlags {
        rule_id,
        ..Default::default()
    }))
}

async fn ensure_row(conn: &mut SqliteConnection, rule_id: i64) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO media_type_flags (rule_id) VALUES (?)")
        .bind(rule_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Flips exactly one flag, creating the all-false row when absent.
/// Returns the new value of the flipped flag.
pub async fn toggle_flag(
    conn: &mut SqliteConnection,
    rule_id: i64,
    flag: MediaFlag,
) -> Result<bool> {
    ensure_row(&mut *conn, rule_id).await?;
    let column = flag.column();
    let sql = format!(
        "UPDATE media_type_flags SET {column} = NOT {column} WHERE rule_id = ? RETURNING {column}"
    );
    let (value,): (bool,) = sqlx::query_as(&sql).bind(rule_id).fetch_one(conn).await?;
    Ok(value)
}

/// Forces one flag to a value (the synchronizer mirrors the primary rule's
/// new state rather than blind-toggling the peer).
pub async fn set_flag(
    conn: &mut SqliteConnection,
    rule_id: i64,
    flag: MediaFlag,
    value: bool,
) -> Result<()> {
    ensure_row(&mut *conn, rule_id).await?;
    let sql = format!(
        "UPDATE media_type_flags SET {} = ? WHERE rule_id = ?",
        flag.column()
    );
    sqlx::query(&sql).bind(value).bind(rule_id).execute(conn).await?;
    Ok(())
}

/// Extension rows with their stable ids; the UI deletes by these ids.
pub async fn list_extensions(
    conn: &mut SqliteConnection,
    rule_id: i64,
) -> Result<Vec<MediaExtension>> {
    let extensions = sqlx::query_as::<_, MediaExtension>(
        "SELECT * FROM media_extensions WHERE rule_id = ? ORDER BY id",
    )
    .bind(rule_id)
    .fetch_all(conn)
    .await?;
    Ok(extensions)
}

pub async fn add_extensions(
    conn: &mut SqliteConnection,
    rule_id: i64,
    extensions: &[String],
) -> Result<AddOutcome> {
    let mut outcome = AddOutcome::default();
    for extension in extensions {
        let normalized = extension.trim().trim_start_matches('.').to_lowercase();
        if normalized.is_empty() {
            continue;
        }
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO media_extensions (rule_id, extension) VALUES (?, ?)",
        )
        .bind(rule_id)
        .bind(&normalized)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if inserted > 0 {
            outcome.added += 1;
        } else {
            outcome.duplicates += 1;
        }
    }
    Ok(outcome)
}

pub async fn delete_extension_by_id(
    conn: &mut SqliteConnection,
    rule_id: i64,
    id: i64,
) -> Result<Option<MediaExtension>> {
    let deleted = sqlx::query_as::<_, MediaExtension>(
        "DELETE FROM media_extensions WHERE id = ? AND rule_id = ? RETURNING *",
    )
    .bind(id)
    .bind(rule_id)
    .fetch_optional(conn)
    .await?;
    Ok(deleted)
}

pub async fn delete_extension_by_value(
    conn: &mut SqliteConnection,
    rule_id: i64,
    extension: &str,
) -> Result<u64> {
    let affected =
        sqlx::query("DELETE FROM media_extensions WHERE rule_id = ? AND extension = ?")
            .bind(rule_id)
            .bind(extension)
            .execute(conn)
            .await?
            .rows_affected();
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[tokio::test]
    async fn toggle_creates_row_and_flips_one_flag() {
        let db = test_db().await;
        let mut conn = db.pool.acquire().await.unwrap();

        let photo = toggle_flag(&mut conn, 7, MediaFlag::Photo).await.unwrap();
        assert!(photo);

        let flags = get_flags(&mut conn, 7).await.unwrap();
        assert!(flags.photo);
        assert!(!flags.document && !flags.video && !flags.audio && !flags.voice);

        let photo = toggle_flag(&mut conn, 7, MediaFlag::Photo).await.unwrap();
        assert!(!photo);
    }

    #[tokio::test]
    async fn extensions_normalize_and_deduplicate() {
        let db = test_db().await;
        let mut conn = db.pool.acquire().await.unwrap();

        let outcome = add_extensions(
            &mut conn,
            1,
            &[".PDF".to_string(), "pdf".to_string(), "zip".to_string()],
        )
        .await
        .unwrap();
        assert_eq!((outcome.added, outcome.duplicates), (2, 1));

        let listed: Vec<String> = list_extensions(&mut conn, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.extension)
            .collect();
        assert_eq!(listed, vec!["pdf", "zip"]);
    }
}
