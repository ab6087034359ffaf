use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use scriptorium_core::moderation::APPROVAL_COLUMN;
use scriptorium_core::store::Table;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::fold;

/// Key used for the approval flag by databases written before `isApproved`.
pub const LEGACY_APPROVAL_KEY: &str = "is_approved";

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let converted = migrate_pool(&pool).await?;
    if converted > 0 {
        info!(rows = converted, "converted legacy approval flags");
    }
    pool.close().await;
    Ok(())
}

/// Creates every table and index, rewrites legacy approval keys, then fills
/// the search shadow for rows that lack one. Returns how many approval keys
/// were rewritten.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<u64> {
    for table in Table::ALL {
        let name = table.name();

        // One JSON document per row
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {name} (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL CHECK (json_valid(data)),
                folded TEXT
            )"
        ))
        .execute(pool)
        .await?;

        // Databases created before the search shadow existed
        let has_folded: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = 'folded'",
        )
        .bind(name)
        .fetch_one(pool)
        .await?;
        if has_folded == 0 {
            sqlx::query(&format!("ALTER TABLE {name} ADD COLUMN folded TEXT"))
                .execute(pool)
                .await?;
        }

        let ts = table.timestamp_column();
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{name}_{ts} ON {name} (json_extract(data, '$.{ts}'))"
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_comments_post_id ON comments (json_extract(data, '$.post_id'))",
    )
    .execute(pool)
    .await?;

    let mut converted = 0;
    for table in [Table::Comments, Table::GuestbookEntries] {
        converted += migrate_approval_key(pool, table).await?;
    }

    for table in Table::ALL {
        let folded = backfill_folded(pool, table).await?;
        if folded > 0 {
            info!(table = %table, rows = folded, "filled search shadow");
        }
    }
    Ok(converted)
}

/// Computes `folded` for every row where it is NULL.
async fn backfill_folded(pool: &SqlitePool, table: Table) -> Result<u64> {
    let name = table.name();
    let pending: Vec<(String, String)> =
        sqlx::query_as(&format!("SELECT id, data FROM {name} WHERE folded IS NULL"))
            .fetch_all(pool)
            .await?;

    let mut tx = pool.begin().await?;
    for (id, data) in &pending {
        let row: serde_json::Map<String, serde_json::Value> = serde_json::from_str(data)?;
        sqlx::query(&format!("UPDATE {name} SET folded = ? WHERE id = ?"))
            .bind(serde_json::to_string(&fold(&row))?)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(pending.len() as u64)
}

/// Moves `is_approved` to `isApproved`. An existing `isApproved` wins.
/// Rewritten rows get their search shadow recomputed by the backfill.
async fn migrate_approval_key(pool: &SqlitePool, table: Table) -> Result<u64> {
    let legacy = format!("$.{LEGACY_APPROVAL_KEY}");
    let canonical = format!("$.{APPROVAL_COLUMN}");
    let result = sqlx::query(&format!(
        "UPDATE {name} SET data = json_remove(
            CASE WHEN json_type(data, ?2) IS NULL
                 THEN json_set(data, ?2, CASE WHEN json_extract(data, ?1) THEN json('true') ELSE json('false') END)
                 ELSE data
            END,
            ?1),
            folded = NULL
         WHERE json_type(data, ?1) IS NOT NULL",
        name = table.name()
    ))
    .bind(&legacy)
    .bind(&canonical)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent_and_convert_legacy_flags() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::open(&dir.path().join("t.sqlite")).await.unwrap();
        migrate_pool(&pool).await.unwrap();

        sqlx::query("INSERT INTO guestbook_entries (id, data) VALUES (?, ?)")
            .bind("g1")
            .bind(r#"{"id":"g1","name":"A","message":"B","date":"2024-01-01T00:00:00.000000Z","is_approved":1}"#)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO comments (id, data) VALUES (?, ?)")
            .bind("c1")
            .bind(r#"{"id":"c1","post_id":"p","author":"A","text":"B","date":"2024-01-01T00:00:00.000000Z","is_approved":false,"isApproved":true}"#)
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(migrate_pool(&pool).await.unwrap(), 2);
        assert_eq!(migrate_pool(&pool).await.unwrap(), 0);

        let entry: String = sqlx::query_scalar("SELECT data FROM guestbook_entries WHERE id = 'g1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        let entry: serde_json::Value = serde_json::from_str(&entry).unwrap();
        assert_eq!(entry["isApproved"], serde_json::json!(true));
        assert!(entry.get("is_approved").is_none());

        let comment: String = sqlx::query_scalar("SELECT data FROM comments WHERE id = 'c1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        let comment: serde_json::Value = serde_json::from_str(&comment).unwrap();
        assert_eq!(comment["isApproved"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn rows_without_search_shadow_are_backfilled() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::open(&dir.path().join("old.sqlite")).await.unwrap();
        sqlx::query("CREATE TABLE manuscripts (id TEXT PRIMARY KEY, data TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO manuscripts (id, data) VALUES ('m1', ?)")
            .bind(r#"{"id":"m1","judul":"ĀDAB AL-ṢALAWĀT","jumlahHalaman":40}"#)
            .execute(&pool)
            .await
            .unwrap();

        migrate_pool(&pool).await.unwrap();

        let folded: String = sqlx::query_scalar("SELECT folded FROM manuscripts WHERE id = 'm1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        let folded: serde_json::Value = serde_json::from_str(&folded).unwrap();
        assert_eq!(folded["judul"], serde_json::json!("ādab al-ṣalawāt"));
        assert_eq!(folded["jumlahHalaman"], serde_json::json!("40"));
    }
}
