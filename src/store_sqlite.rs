//! SQLite vector store backend.
//!
//! Vectors are stored as little-endian f32 BLOBs in `vector_points`, with
//! collection schemas pinned in `vector_collections`. Search loads the
//! candidate rows (filter pushed into the WHERE clause) and scores them in
//! Rust; batch upserts run inside a single transaction so a failed write
//! never leaves a document half-replaced. `replace_document` prunes the
//! stale tail inside the same transaction as its upsert, so a document is
//! never visible with new points and leftover old ones.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::store::{
    validate_top_k, CollectionSchema, Metric, SearchFilter, SearchHit, VectorPoint, VectorStore,
};

/// Durable [`VectorStore`] sharing the registry's SQLite database.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_schema(&self, collection: &str) -> Result<CollectionSchema> {
        let row = sqlx::query(
            "SELECT name, model, dims, metric FROM vector_collections WHERE name = ?",
        )
        .bind(collection)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load collection schema")?
        .ok_or_else(|| anyhow::anyhow!("unknown collection: {}", collection))?;

        let metric_str: String = row.get("metric");
        let metric = Metric::parse(&metric_str)
            .ok_or_else(|| anyhow::anyhow!("corrupt metric in collection row: {}", metric_str))?;
        let dims: i64 = row.get("dims");

        Ok(CollectionSchema {
            name: row.get("name"),
            model: row.get("model"),
            dims: dims as usize,
            metric,
        })
    }

    fn validate_dims(schema: &CollectionSchema, collection: &str, points: &[VectorPoint]) -> Result<()> {
        for point in points {
            if point.vector.len() != schema.dims {
                bail!(
                    "vector for {}#{} has {} dims, collection '{}' expects {}",
                    point.document_id,
                    point.chunk_index,
                    point.vector.len(),
                    collection,
                    schema.dims,
                );
            }
        }
        Ok(())
    }
}

/// Serialize a vector as little-endian f32 bytes.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Deserialize a little-endian f32 BLOB back into a vector.
pub fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        bail!("embedding blob length {} is not a multiple of 4", blob.len());
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn ensure_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let existing = sqlx::query(
            "SELECT model, dims, metric FROM vector_collections WHERE name = ?",
        )
        .bind(&schema.name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to check collection")?;

        match existing {
            Some(row) => {
                let model: String = row.get("model");
                let dims: i64 = row.get("dims");
                let metric: String = row.get("metric");
                if model != schema.model
                    || dims as usize != schema.dims
                    || metric != schema.metric.as_str()
                {
                    bail!(
                        "collection '{}' exists with model={} dims={} metric={}, but config specifies model={} dims={} metric={}",
                        schema.name,
                        model,
                        dims,
                        metric,
                        schema.model,
                        schema.dims,
                        schema.metric.as_str(),
                    );
                }
            }
            None => {
                sqlx::query(
                    "INSERT INTO vector_collections (name, model, dims, metric) VALUES (?, ?, ?, ?)",
                )
                .bind(&schema.name)
                .bind(&schema.model)
                .bind(schema.dims as i64)
                .bind(schema.metric.as_str())
                .execute(&self.pool)
                .await
                .context("Failed to create collection")?;
            }
        }
        Ok(())
    }

    async fn upsert_batch(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let schema = self.load_schema(collection).await?;
        Self::validate_dims(&schema, collection, &points)?;

        let mut tx = self.pool.begin().await.context("Failed to begin upsert")?;
        for point in &points {
            sqlx::query(
                "INSERT OR REPLACE INTO vector_points
                 (collection, document_id, source_key, chunk_index, embedding, text, section)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(collection)
            .bind(&point.document_id)
            .bind(&point.source_key)
            .bind(point.chunk_index)
            .bind(vec_to_blob(&point.vector))
            .bind(&point.text)
            .bind(&point.section)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert point")?;
        }
        tx.commit().await.context("Failed to commit upsert")?;
        Ok(())
    }

    async fn replace_document(
        &self,
        collection: &str,
        document_id: &str,
        points: Vec<VectorPoint>,
    ) -> Result<()> {
        let schema = self.load_schema(collection).await?;
        Self::validate_dims(&schema, collection, &points)?;

        // One transaction covers both the upsert and the stale-tail delete.
        let mut tx = self.pool.begin().await.context("Failed to begin replace")?;
        for point in &points {
            sqlx::query(
                "INSERT OR REPLACE INTO vector_points
                 (collection, document_id, source_key, chunk_index, embedding, text, section)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(collection)
            .bind(&point.document_id)
            .bind(&point.source_key)
            .bind(point.chunk_index)
            .bind(vec_to_blob(&point.vector))
            .bind(&point.text)
            .bind(&point.section)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert point")?;
        }
        sqlx::query(
            "DELETE FROM vector_points
             WHERE collection = ? AND document_id = ? AND chunk_index >= ?",
        )
        .bind(collection)
        .bind(document_id)
        .bind(points.len() as i64)
        .execute(&mut *tx)
        .await
        .context("Failed to prune stale points")?;
        tx.commit().await.context("Failed to commit replace")?;
        Ok(())
    }

    async fn delete(
        &self,
        collection: &str,
        document_id: &str,
        chunk_indices: &[i64],
    ) -> Result<()> {
        if chunk_indices.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.context("Failed to begin delete")?;
        for index in chunk_indices {
            sqlx::query(
                "DELETE FROM vector_points
                 WHERE collection = ? AND document_id = ? AND chunk_index = ?",
            )
            .bind(collection)
            .bind(document_id)
            .bind(index)
            .execute(&mut *tx)
            .await
            .context("Failed to delete point")?;
        }
        tx.commit().await.context("Failed to commit delete")?;
        Ok(())
    }

    async fn chunk_indices(&self, collection: &str, document_id: &str) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT chunk_index FROM vector_points
             WHERE collection = ? AND document_id = ?
             ORDER BY chunk_index",
        )
        .bind(collection)
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list chunk indices")?;

        Ok(rows.iter().map(|r| r.get("chunk_index")).collect())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        validate_top_k(top_k)?;

        let schema = self.load_schema(collection).await?;
        if query.len() != schema.dims {
            bail!(
                "query vector has {} dims, collection '{}' expects {}",
                query.len(),
                collection,
                schema.dims,
            );
        }

        let mut sql = String::from(
            "SELECT document_id, source_key, chunk_index, embedding, text, section
             FROM vector_points WHERE collection = ?",
        );
        if filter.document_id.is_some() {
            sql.push_str(" AND document_id = ?");
        }
        if filter.source_key.is_some() {
            sql.push_str(" AND source_key = ?");
        }

        let mut q = sqlx::query(&sql).bind(collection);
        if let Some(ref doc) = filter.document_id {
            q = q.bind(doc);
        }
        if let Some(ref source) = filter.source_key {
            q = q.bind(source);
        }

        let rows = q
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch candidate points")?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob)?;
            hits.push(SearchHit {
                document_id: row.get("document_id"),
                source_key: row.get("source_key"),
                chunk_index: row.get("chunk_index"),
                score: schema.metric.score(query, &vector),
                text: row.get("text"),
                section: row.get("section"),
            });
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn schema() -> CollectionSchema {
        CollectionSchema {
            name: "main".to_string(),
            model: "test-model".to_string(),
            dims: 3,
            metric: Metric::Cosine,
        }
    }

    fn point(doc: &str, index: i64, vector: Vec<f32>) -> VectorPoint {
        VectorPoint {
            document_id: doc.to_string(),
            source_key: format!("{doc}.md"),
            chunk_index: index,
            vector,
            text: format!("chunk {index}"),
            section: Some("Intro".to_string()),
        }
    }

    #[test]
    fn test_blob_roundtrip() {
        let vector = vec![1.5, -2.25, 0.0, 1e-7];
        let decoded = blob_to_vec(&vec_to_blob(&vector)).unwrap();
        assert_eq!(vector, decoded);
    }

    #[test]
    fn test_blob_truncated_rejected() {
        assert!(blob_to_vec(&[0u8, 1, 2]).is_err());
    }

    #[tokio::test]
    async fn test_ensure_collection_idempotent() {
        let store = test_store().await;
        store.ensure_collection(&schema()).await.unwrap();
        store.ensure_collection(&schema()).await.unwrap();

        let mut other = schema();
        other.dims = 4;
        assert!(store.ensure_collection(&other).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_search_and_delete() {
        let store = test_store().await;
        store.ensure_collection(&schema()).await.unwrap();
        store
            .upsert_batch(
                "main",
                vec![
                    point("d1", 0, vec![1.0, 0.0, 0.0]),
                    point("d1", 1, vec![0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("main", &[1.0, 0.0, 0.0], 10, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_index, 0);
        assert_eq!(hits[0].section.as_deref(), Some("Intro"));

        store.delete("main", "d1", &[0]).await.unwrap();
        let indices = store.chunk_indices("main", "d1").await.unwrap();
        assert_eq!(indices, vec![1]);
    }

    #[tokio::test]
    async fn test_source_filter_pushed_down() {
        let store = test_store().await;
        store.ensure_collection(&schema()).await.unwrap();
        store
            .upsert_batch(
                "main",
                vec![
                    point("d1", 0, vec![1.0, 0.0, 0.0]),
                    point("d2", 0, vec![0.9, 0.1, 0.0]),
                ],
            )
            .await
            .unwrap();

        let filter = SearchFilter {
            document_id: None,
            source_key: Some("d2.md".to_string()),
        };
        let hits = store
            .search("main", &[1.0, 0.0, 0.0], 5, &filter)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "d2");
    }

    #[tokio::test]
    async fn test_replace_document_prunes_stale_tail() {
        let store = test_store().await;
        store.ensure_collection(&schema()).await.unwrap();
        store
            .replace_document(
                "main",
                "d1",
                vec![
                    point("d1", 0, vec![1.0, 0.0, 0.0]),
                    point("d1", 1, vec![0.0, 1.0, 0.0]),
                    point("d1", 2, vec![0.0, 0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        store
            .replace_document("main", "d1", vec![point("d1", 0, vec![0.5, 0.5, 0.0])])
            .await
            .unwrap();
        let indices = store.chunk_indices("main", "d1").await.unwrap();
        assert_eq!(indices, vec![0]);

        // Empty batch removes the whole document.
        store.replace_document("main", "d1", vec![]).await.unwrap();
        assert!(store.chunk_indices("main", "d1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_document_failure_leaves_old_version() {
        let store = test_store().await;
        store.ensure_collection(&schema()).await.unwrap();
        store
            .replace_document(
                "main",
                "d1",
                vec![
                    point("d1", 0, vec![1.0, 0.0, 0.0]),
                    point("d1", 1, vec![0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        // Bad dims reject the whole replacement; nothing is pruned either.
        let result = store
            .replace_document("main", "d1", vec![point("d1", 0, vec![1.0, 0.0])])
            .await;
        assert!(result.is_err());
        let indices = store.chunk_indices("main", "d1").await.unwrap();
        assert_eq!(indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_wrong_dims_rejected_before_write() {
        let store = test_store().await;
        store.ensure_collection(&schema()).await.unwrap();

        let result = store
            .upsert_batch("main", vec![point("d1", 0, vec![1.0, 0.0])])
            .await;
        assert!(result.is_err());
        let indices = store.chunk_indices("main", "d1").await.unwrap();
        assert!(indices.is_empty());
    }
}
