//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is what ingestion and hybrid search need from
//! a similarity index: embed-and-append, and nearest-neighbor lookup by
//! cosine distance. Collections are append-only; nothing here updates or
//! deletes a stored document.
//!
//! | Implementation | Backing |
//! |----------------|---------|
//! | [`PgVectorStore`] | PostgreSQL + pgvector (`langchain_pg_*` tables) |
//! | [`InMemoryVectorStore`] | brute-force scan over a `Vec`, for tests and `provider = "memory"` |

mod memory;
mod pgvector;

pub use memory::InMemoryVectorStore;
pub use pgvector::PgVectorStore;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::VectorStoreConfig;
use crate::db;
use crate::embedding::Embedder;
use crate::models::{Document, ScoredDocument};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The `k` documents closest to `query`, closest first.
    async fn similarity_search_with_score(&self, query: &str, k: usize)
        -> Result<Vec<ScoredDocument>>;

    /// Like [`similarity_search_with_score`](VectorStore::similarity_search_with_score)
    /// without the distances.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        Ok(self
            .similarity_search_with_score(query, k)
            .await?
            .into_iter()
            .map(|hit| hit.document)
            .collect())
    }

    /// Embed all documents in one batch and append them. Returns the number
    /// stored. No uniqueness is enforced.
    async fn add_documents(&self, docs: &[Document]) -> Result<usize>;

    /// Documents currently in the collection.
    async fn count(&self) -> Result<usize>;
}

/// Build the configured vector store around `embedder`.
pub async fn create_vector_store(
    config: &VectorStoreConfig,
    embedder: Arc<dyn Embedder>,
) -> Result<Arc<dyn VectorStore>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(InMemoryVectorStore::new(embedder))),
        "pgvector" => {
            let pool = db::connect(config).await?;
            Ok(Arc::new(PgVectorStore::new(
                pool,
                embedder,
                config.collection.clone(),
            )))
        }
        other => anyhow::bail!("Unknown vector store provider: {}", other),
    }
}

/// pgvector text literal: `[0.1,0.2,...]`.
pub(crate) fn vector_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_literal_format() {
        assert_eq!(vector_literal(&[1.0, -0.5, 0.25]), "[1,-0.5,0.25]");
        assert_eq!(vector_literal(&[]), "[]");
    }
}
