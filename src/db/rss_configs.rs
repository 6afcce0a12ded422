use sqlx::SqliteConnection;

use crate::error::Result;
use crate::models::RssConfig;

pub async fn get(conn: &mut SqliteConnection, rule_id: i64) -> Result<Option<RssConfig>> {
    let config = sqlx::query_as::<_, RssConfig>("SELECT * FROM rss_configs WHERE rule_id = ?")
        .bind(rule_id)
        .fetch_optional(conn)
        .await?;
    Ok(config)
}

pub async fn upsert(conn: &mut SqliteConnection, config: &RssConfig) -> Result<()> {
    sqlx::query(
        "INSERT INTO rss_configs (rule_id, enabled, title, description, language, max_items)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(rule_id) DO UPDATE SET
           enabled = excluded.enabled,
           title = excluded.title,
           description = excluded.description,
           language = excluded.language,
           max_items = excluded.max_items",
    )
    .bind(config.rule_id)
    .bind(config.enabled)
    .bind(&config.title)
    .bind(&config.description)
    .bind(&config.language)
    .bind(config.max_items)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_enabled(
    conn: &mut SqliteConnection,
    rule_id: i64,
    enabled: bool,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO rss_configs (rule_id, enabled) VALUES (?, ?)
         ON CONFLICT(rule_id) DO UPDATE SET enabled = excluded.enabled",
    )
    .bind(rule_id)
    .bind(enabled)
    .execute(conn)
    .await?;
    Ok(())
}
