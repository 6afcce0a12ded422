use sqlx::SqliteConnection;

use crate::error::{Error, Result};
use crate::models::RuleSync;

/// Adds a directed edge. Both endpoints must exist and be distinct;
/// self-edges are rejected outright.
pub async fn add(conn: &mut SqliteConnection, rule_id: i64, peer_rule_id: i64) -> Result<RuleSync> {
    if rule_id == peer_rule_id {
        return Err(Error::RuleValidation(
            "a rule cannot sync with itself".to_string(),
        ));
    }

    for id in [rule_id, peer_rule_id] {
        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM rules WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        if exists == 0 {
            return Err(Error::RuleValidation(format!("rule {id} does not exist")));
        }
    }

    let edge = sqlx::query_as::<_, RuleSync>(
        "INSERT OR IGNORE INTO rule_syncs (rule_id, peer_rule_id) VALUES (?, ?) RETURNING *",
    )
    .bind(rule_id)
    .bind(peer_rule_id)
    .fetch_optional(&mut *conn)
    .await?;

    match edge {
        Some(edge) => Ok(edge),
        // Ignored duplicate: the edge already exists, fetch it.
        None => {
            let edge = sqlx::query_as::<_, RuleSync>(
                "SELECT * FROM rule_syncs WHERE rule_id = ? AND peer_rule_id = ?",
            )
            .bind(rule_id)
            .bind(peer_rule_id)
            .fetch_one(conn)
            .await?;
            Ok(edge)
        }
    }
}

pub async fn remove(conn: &mut SqliteConnection, rule_id: i64, peer_rule_id: i64) -> Result<u64> {
    let affected = sqlx::query("DELETE FROM rule_syncs WHERE rule_id = ? AND peer_rule_id = ?")
        .bind(rule_id)
        .bind(peer_rule_id)
        .execute(conn)
        .await?
        .rows_affected();
    Ok(affected)
}

/// Outgoing peers only: fan-out is single-level and directed.
pub async fn peers_of(conn: &mut SqliteConnection, rule_id: i64) -> Result<Vec<i64>> {
    let peers =
        sqlx::query_scalar::<_, i64>("SELECT peer_rule_id FROM rule_syncs WHERE rule_id = ?")
            .bind(rule_id)
            .fetch_all(conn)
            .await?;
    Ok(peers)
}
