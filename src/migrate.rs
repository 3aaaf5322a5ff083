//! Schema migrations for the registry database.
//!
//! Three tables: `documents` (the ingestion registry), `vector_collections`
//! (pinned collection schemas), and `vector_points` (the embeddings
//! themselves). Migrations are idempotent CREATE IF NOT EXISTS statements,
//! run on every startup.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_key TEXT NOT NULL UNIQUE,
            content_type TEXT NOT NULL DEFAULT 'text/plain',
            status TEXT NOT NULL,
            last_indexed_hash TEXT,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            failed_step TEXT,
            error TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create documents table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_collections (
            name TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            metric TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create vector_collections table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_points (
            collection TEXT NOT NULL,
            document_id TEXT NOT NULL,
            source_key TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            text TEXT NOT NULL,
            section TEXT,
            PRIMARY KEY (collection, document_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create vector_points table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_points_doc
         ON vector_points (collection, document_id)",
    )
    .execute(pool)
    .await
    .context("Failed to create vector_points index")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_status
         ON documents (status)",
    )
    .execute(pool)
    .await
    .context("Failed to create documents status index")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
