//! PostgreSQL + pgvector [`VectorStore`].
//!
//! Uses the `langchain_pg_collection` / `langchain_pg_embedding` layout so
//! collections written by other tools remain readable. Vectors are bound as
//! text literals and cast with `::vector`; distance is pgvector's cosine
//! operator `<=>`.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tokio::sync::OnceCell;

use super::{vector_literal, VectorStore};
use crate::embedding::Embedder;
use crate::models::{Document, ScoredDocument};

pub struct PgVectorStore {
    pool: PgPool,
    embedder: Arc<dyn Embedder>,
    collection: String,
    collection_id: OnceCell<String>,
}

impl PgVectorStore {
    pub fn new(pool: PgPool, embedder: Arc<dyn Embedder>, collection: String) -> Self {
        Self {
            pool,
            embedder,
            collection,
            collection_id: OnceCell::new(),
        }
    }

    /// UUID of the named collection, created on first use.
    async fn collection_id(&self) -> Result<&str> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    INSERT INTO langchain_pg_collection (uuid, name, cmetadata)
                    VALUES ($1::uuid, $2, '{}'::jsonb)
                    ON CONFLICT (name) DO NOTHING
                    "#,
                )
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(&self.collection)
                .execute(&self.pool)
                .await
                .context("Failed to create vector collection")?;

                let id: String = sqlx::query_scalar(
                    "SELECT uuid::text FROM langchain_pg_collection WHERE name = $1",
                )
                .bind(&self.collection)
                .fetch_one(&self.pool)
                .await
                .context("Failed to look up vector collection")?;

                tracing::debug!(collection = %self.collection, id = %id, "vector collection ready");
                Ok::<_, anyhow::Error>(id)
            })
            .await?;
        Ok(id.as_str())
    }
}

/// Rebuild a [`Document`] from the stored text and `cmetadata` JSON.
fn document_from_row(content: String, metadata: Option<&str>) -> Document {
    let meta: serde_json::Value = metadata
        .and_then(|m| serde_json::from_str(m).ok())
        .unwrap_or(serde_json::Value::Null);
    let field = |name: &str| match meta.get(name) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Document::new(content, field("table"), field("id"))
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        let query_vec = self.embedder.embed(query).await?;
        let collection_id = self.collection_id().await?;

        let rows = sqlx::query(
            r#"
            SELECT document,
                   cmetadata::text AS cmetadata,
                   (embedding <=> $1::vector)::float8 AS distance
            FROM langchain_pg_embedding
            WHERE collection_id = $2::uuid
            ORDER BY distance ASC
            LIMIT $3
            "#,
        )
        .bind(vector_literal(&query_vec))
        .bind(collection_id)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .context("Similarity search failed")?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let content: Option<String> = row.try_get("document")?;
            let metadata: Option<String> = row.try_get("cmetadata")?;
            let distance: f64 = row.try_get("distance")?;
            hits.push(ScoredDocument {
                document: document_from_row(content.unwrap_or_default(), metadata.as_deref()),
                distance,
            });
        }
        Ok(hits)
    }

    async fn add_documents(&self, docs: &[Document]) -> Result<usize> {
        if docs.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != docs.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} documents",
                vectors.len(),
                docs.len()
            );
        }
        let collection_id = self.collection_id().await?;

        let mut tx = self.pool.begin().await?;
        for (doc, vector) in docs.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO langchain_pg_embedding (id, collection_id, embedding, document, cmetadata)
                VALUES ($1, $2::uuid, $3::vector, $4, $5::jsonb)
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(collection_id)
            .bind(vector_literal(vector))
            .bind(&doc.content)
            .bind(serde_json::to_string(&doc.metadata)?)
            .execute(&mut *tx)
            .await
            .context("Failed to insert embedding")?;
        }
        tx.commit().await?;

        tracing::info!(collection = %self.collection, added = docs.len(), "documents stored");
        Ok(docs.len())
    }

    async fn count(&self) -> Result<usize> {
        let collection_id = self.collection_id().await?;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM langchain_pg_embedding WHERE collection_id = $1::uuid",
        )
        .bind(collection_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_from_row() {
        let doc = document_from_row(
            "Table: orders\norder_id: 4".to_string(),
            Some(r#"{"table":"orders","id":"4"}"#),
        );
        assert_eq!(doc.metadata.table, "orders");
        assert_eq!(doc.metadata.id, "4");
    }

    #[test]
    fn numeric_ids_from_other_writers_render_as_text() {
        let doc = document_from_row(String::new(), Some(r#"{"table":"orders","id":4}"#));
        assert_eq!(doc.metadata.id, "4");
    }

    #[test]
    fn missing_metadata_is_empty() {
        let doc = document_from_row("text".to_string(), None);
        assert_eq!(doc.metadata.table, "");
        assert_eq!(doc.metadata.id, "");
    }
}
