use sqlx::SqliteConnection;

use crate::error::Result;
use crate::models::Keyword;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewKeyword {
    pub text: String,
    pub is_regex: bool,
    pub is_blacklist: bool,
}

/// Outcome of a batch add: how many rows were inserted and how many were
/// already present (de-duplicated on the full tuple).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddOutcome {
    pub added: usize,
    pub duplicates: usize,
}

pub async fn add(
    conn: &mut SqliteConnection,
    rule_id: i64,
    items: &[NewKeyword],
) -> Result<AddOutcome> {
    let mut outcome = AddOutcome::default();
    for item in items {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO keywords (rule_id, text, is_regex, is_blacklist)
             VALUES (?, ?, ?, ?)",
        )
        .bind(rule_id)
        .bind(&item.text)
        .bind(item.is_regex)
        .bind(item.is_blacklist)
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

/// Full keyword set in stable insertion order; this order defines the
/// 1-based index space the UI lists and deletes by.
pub async fn list(conn: &mut SqliteConnection, rule_id: i64) -> Result<Vec<Keyword>> {
    let keywords =
        sqlx::query_as::<_, Keyword>("SELECT * FROM keywords WHERE rule_id = ? ORDER BY id")
            .bind(rule_id)
            .fetch_all(conn)
            .await?;
    Ok(keywords)
}

/// Deletes by 1-based positional index into the rule's listing. Out-of-range
/// indexes are ignored; returns the deleted rows for sync replay by value.
pub async fn delete_by_indexes(
    conn: &mut SqliteConnection,
    rule_id: i64,
    indexes: &[usize],
) -> Result<Vec<Keyword>> {
    let listing = list(conn, rule_id).await?;
    let mut deleted = Vec::new();

    for &index in indexes {
        if index == 0 || index > listing.len() {
            continue;
        }
        let keyword = &listing[index - 1];
        sqlx::query("DELETE FROM keywords WHERE id = ?")
            .bind(keyword.id)
            .execute(&mut *conn)
            .await?;
        deleted.push(keyword.clone());
    }
    Ok(deleted)
}

pub async fn delete_by_value(
    conn: &mut SqliteConnection,
    rule_id: i64,
    item: &NewKeyword,
) -> Result<u64> {
    let affected = sqlx::query(
        "DELETE FROM keywords
         WHERE rule_id = ? AND text = ? AND is_regex = ? AND is_blacklist = ?",
    )
    .bind(rule_id)
    .bind(&item.text)
    .bind(item.is_regex)
    .bind(item.is_blacklist)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(affected)
}
