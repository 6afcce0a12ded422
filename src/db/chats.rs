use sqlx::SqliteConnection;

use crate::models::Chat;

pub async fn upsert(
    conn: &mut SqliteConnection,
    telegram_id: &str,
    display_name: &str,
) -> Result<Chat, sqlx::Error> {
    sqlx::query_as::<_, Chat>(
        "INSERT INTO chats (telegram_id, display_name) VALUES (?, ?)
         ON CONFLICT(telegram_id) DO UPDATE SET display_name = excluded.display_name
         RETURNING *",
    )
    .bind(telegram_id)
    .bind(display_name)
    .fetch_one(conn)
    .await
}

pub async fn find(conn: &mut SqliteConnection, id: i64) -> Result<Option<Chat>, sqlx::Error> {
    sqlx::query_as::<_, Chat>("SELECT * FROM chats WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn find_by_telegram_id(
    conn: &mut SqliteConnection,
    telegram_id: &str,
) -> Result<Option<Chat>, sqlx::Error> {
    sqlx::query_as::<_, Chat>("SELECT * FROM chats WHERE telegram_id = ?")
        .bind(telegram_id)
        .fetch_optional(conn)
        .await
}

pub async fn all(conn: &mut SqliteConnection) -> Result<Vec<Chat>, sqlx::Error> {
    sqlx::query_as::<_, Chat>("SELECT * FROM chats ORDER BY id")
        .fetch_all(conn)
        .await
}

pub async fn set_display_name(
    conn: &mut SqliteConnection,
    id: i64,
    display_name: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE chats SET display_name = ? WHERE id = ?")
        .bind(display_name)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_current_edit_rule(
    conn: &mut SqliteConnection,
    id: i64,
    rule_id: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE chats SET current_edit_rule_id = ? WHERE id = ?")
        .bind(rule_id)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Post-deletion scan: drop chats no rule references as source or target,
/// and clear edit pointers at rules that no longer exist.
pub async fn cleanup_orphans(conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let removed = sqlx::query(
        "DELETE FROM chats WHERE id NOT IN (SELECT source_chat_id FROM rules)
           AND id NOT IN (SELECT target_chat_id FROM rules)",
    )
    .execute(&mut *conn)
    .await?
    .rows_affected();

    sqlx::query(
        "UPDATE chats SET current_edit_rule_id = NULL
         WHERE current_edit_rule_id IS NOT NULL
           AND current_edit_rule_id NOT IN (SELECT id FROM rules)",
    )
    .execute(conn)
    .await?;

    Ok(removed)
}
