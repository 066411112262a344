//! Catalog record rows
//!
//! Records are stored whole as JSON, keyed by external id. `doc_id` mirrors
//! the record's own `id` so lookups work with either identifier.

use cellar_common::{CatalogRecord, Error, Result};
use sqlx::{Row, SqlitePool};

/// Insert or replace a record
pub async fn save_record(pool: &SqlitePool, record: &CatalogRecord) -> Result<()> {
    let key = record
        .key()
        .ok_or_else(|| Error::InvalidInput("record has no externalId".to_string()))?;
    let body = serde_json::to_string(record)?;

    sqlx::query(
        r#"
        INSERT INTO records (external_id, doc_id, body, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(external_id) DO UPDATE SET
            doc_id = COALESCE(excluded.doc_id, records.doc_id),
            body = excluded.body,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(record.id.as_deref())
    .bind(body)
    .bind(cellar_common::time::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a record by external id or document id
pub async fn load_record(pool: &SqlitePool, id: &str) -> Result<Option<CatalogRecord>> {
    let row = sqlx::query(
        r#"
        SELECT body FROM records
        WHERE external_id = ? OR doc_id = ?
        LIMIT 1
        "#,
    )
    .bind(id)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let body: String = row.get("body");
            Ok(Some(serde_json::from_str(&body)?))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> SqlitePool {
        crate::db::init_memory_pool().await.unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load_by_either_id() {
        let pool = setup().await;
        let mut record = CatalogRecord::new("EXT-1", "Gin");
        record.id = Some("doc-1".to_string());
        save_record(&pool, &record).await.unwrap();

        assert_eq!(load_record(&pool, "EXT-1").await.unwrap(), Some(record.clone()));
        assert_eq!(load_record(&pool, "doc-1").await.unwrap(), Some(record));
        assert_eq!(load_record(&pool, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_overwrites_by_external_id() {
        let pool = setup().await;
        save_record(&pool, &CatalogRecord::new("EXT-1", "Old")).await.unwrap();
        save_record(&pool, &CatalogRecord::new("EXT-1", "New")).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
        let stored = load_record(&pool, "EXT-1").await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("New"));
    }

    #[tokio::test]
    async fn test_save_without_key_rejected() {
        let pool = setup().await;
        let result = save_record(&pool, &CatalogRecord::default()).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
