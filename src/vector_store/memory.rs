//! In-memory [`VectorStore`] for tests and throwaway sessions.
//!
//! Vector search is brute-force cosine distance over every stored vector.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use super::VectorStore;
use crate::embedding::{cosine_distance, Embedder};
use crate::models::{Document, ScoredDocument};

struct StoredDocument {
    document: Document,
    vector: Vec<f32>,
}

pub struct InMemoryVectorStore {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<StoredDocument>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        let query_vec = self.embedder.embed(query).await?;
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());

        let mut hits: Vec<ScoredDocument> = entries
            .iter()
            .map(|entry| ScoredDocument {
                document: entry.document.clone(),
                distance: cosine_distance(&query_vec, &entry.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
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

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for (document, vector) in docs.iter().zip(vectors) {
            entries.push(StoredDocument {
                document: document.clone(),
                vector,
            });
        }
        Ok(docs.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().unwrap_or_else(|e| e.into_inner()).len())
    }
}
