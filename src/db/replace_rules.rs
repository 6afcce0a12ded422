use sqlx::SqliteConnection;

use crate::db::keywords::AddOutcome;
use crate::error::Result;
use crate::models::ReplaceRule;

pub async fn add(
    conn: &mut SqliteConnection,
    rule_id: i64,
    items: &[(String, String)],
) -> Result<AddOutcome> {
    let mut outcome = AddOutcome::default();
    for (pattern, replacement) in items {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO replace_rules (rule_id, pattern, replacement)
             VALUES (?, ?, ?)",
        )
        .bind(rule_id)
        .bind(pattern)
        .bind(replacement)
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

/// Definition order is application order in the Replace stage.
pub async fn list(conn: &mut SqliteConnection, rule_id: i64) -> Result<Vec<ReplaceRule>> {
    let rules =
        sqlx::query_as::<_, ReplaceRule>("SELECT * FROM replace_rules WHERE rule_id = ? ORDER BY id")
            .bind(rule_id)
            .fetch_all(conn)
            .await?;
    Ok(rules)
}

pub async fn delete_by_indexes(
    conn: &mut SqliteConnection,
    rule_id: i64,
    indexes: &[usize],
) -> Result<Vec<ReplaceRule>> {
    let listing = list(conn, rule_id).await?;
    let mut deleted = Vec::new();

    for &index in indexes {
        if index == 0 || index > listing.len() {
            continue;
        }
        let rule = &listing[index - 1];
        sqlx::query("DELETE FROM replace_rules WHERE id = ?")
            .bind(rule.id)
            .execute(&mut *conn)
            .await?;
        deleted.push(rule.clone());
    }
    Ok(deleted)
}

pub async fn delete_by_value(
    conn: &mut SqliteConnection,
    rule_id: i64,
    pattern: &str,
    replacement: &str,
) -> Result<u64> {
    let affected = sqlx::query(
        "DELETE FROM replace_rules WHERE rule_id = ? AND pattern = ? AND replacement = ?",
    )
    .bind(rule_id)
    .bind(pattern)
    .bind(replacement)
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
    async fn add_deduplicates_on_pattern_and_replacement() {
        let db = test_db().await;
        let mut conn = db.pool.acquire().await.unwrap();

        let items = vec![("foo".to_string(), "bar".to_string())];
        let first = add(&mut conn, 1, &items).await.unwrap();
        assert_eq!((first.added, first.duplicates), (1, 0));

        let second = add(&mut conn, 1, &items).await.unwrap();
        assert_eq!((second.added, second.duplicates), (0, 1));

        // Same pattern with a different replacement is distinct.
        let third = add(&mut conn, 1, &[("foo".to_string(), "baz".to_string())])
            .await
            .unwrap();
        assert_eq!((third.added, third.duplicates), (1, 0));
    }
}
