//! Hybrid search: vector retrieval feeding the SQL agent.
//!
//! For each question the orchestrator fetches the `k` closest stored rows,
//! joins their text into a context block, and hands the agent a prompt
//! that carries both the context and the question verbatim. The agent's
//! answer is returned unchanged.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::agent::{SqlAgent, ToolCallingSqlAgent};
use crate::config::{Config, LlmConfig};
use crate::connection::ConnectionConfig;
use crate::llm::{ChatModel, OpenAiChatModel};
use crate::relational::{AdapterCache, RelationalStore};
use crate::vector_store::VectorStore;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("vector search failed: {0:#}")]
    Retrieval(anyhow::Error),
    #[error("{0:#}")]
    Agent(anyhow::Error),
}

/// Build the agent prompt. Context and query are interpolated as-is.
pub fn build_prompt(context: &str, query: &str) -> String {
    format!(
        "Use both vector search results and SQL to answer the question.\n\
         \n\
         Vector search context:\n\
         {context}\n\
         \n\
         Now use SQL queries as needed to provide a complete answer to: {query}\n\
         \n\
         Be thorough but concise. Combine both sources.\n"
    )
}

#[derive(Clone)]
pub struct HybridSearch {
    store: Arc<dyn VectorStore>,
    agent: Arc<dyn SqlAgent>,
    k: usize,
}

impl HybridSearch {
    pub fn new(store: Arc<dyn VectorStore>, agent: Arc<dyn SqlAgent>, k: usize) -> Self {
        Self { store, agent, k }
    }

    /// Retrieve context, prompt the agent, return its answer verbatim.
    pub async fn run(&self, query: &str) -> Result<String, SearchError> {
        let docs = self
            .store
            .similarity_search(query, self.k)
            .await
            .map_err(SearchError::Retrieval)?;
        tracing::debug!(k = self.k, hits = docs.len(), "retrieved context");

        let context = docs
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        self.agent
            .run(&build_prompt(&context, query))
            .await
            .map_err(SearchError::Agent)
    }

    /// Like [`run`](Self::run), with any failure rendered as the answer text.
    pub async fn answer(&self, query: &str) -> String {
        match self.run(query).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = %e, "hybrid search failed");
                format!("An error occurred: {}", e)
            }
        }
    }
}

/// Builds a chat model for an API key.
pub type ChatModelFactory =
    Box<dyn Fn(&LlmConfig, String) -> anyhow::Result<Arc<dyn ChatModel>> + Send + Sync>;

/// Assembles a [`HybridSearch`] per connection and API key.
///
/// The vector store is shared; relational adapters come from a TTL cache
/// and a fresh agent is built for every pipeline.
pub struct SearchFactory {
    adapters: AdapterCache,
    store: Arc<dyn VectorStore>,
    chat_models: ChatModelFactory,
    llm: LlmConfig,
    k: usize,
}

impl SearchFactory {
    pub fn new(
        adapters: AdapterCache,
        store: Arc<dyn VectorStore>,
        chat_models: ChatModelFactory,
        llm: LlmConfig,
        k: usize,
    ) -> Self {
        Self {
            adapters,
            store,
            chat_models,
            llm,
            k,
        }
    }

    /// PostgreSQL adapters and the OpenAI-compatible chat model.
    pub fn from_config(config: &Config, store: Arc<dyn VectorStore>) -> Self {
        Self::new(
            AdapterCache::postgres(Duration::from_secs(config.db.cache_ttl_secs)),
            store,
            Box::new(
                |llm: &LlmConfig, api_key: String| -> anyhow::Result<Arc<dyn ChatModel>> {
                    Ok(Arc::new(OpenAiChatModel::new(llm, api_key)?))
                },
            ),
            config.llm.clone(),
            config.retrieval.k,
        )
    }

    pub fn store(&self) -> Arc<dyn VectorStore> {
        self.store.clone()
    }

    pub fn adapter(&self, conn: &ConnectionConfig) -> Arc<dyn RelationalStore> {
        self.adapters.get(conn)
    }

    pub fn build(&self, conn: &ConnectionConfig, api_key: Option<&str>) -> anyhow::Result<HybridSearch> {
        let llm = (self.chat_models)(&self.llm, self.llm.resolve_api_key(api_key))?;
        let agent = ToolCallingSqlAgent::new(
            self.adapter(conn),
            llm,
            self.llm.max_iterations,
            self.llm.top_k,
        );
        Ok(HybridSearch::new(self.store.clone(), Arc::new(agent), self.k))
    }
}
