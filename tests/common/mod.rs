//! Fakes for the capability traits, shared by the integration tests.
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use hybrid_sql::agent::SqlAgent;
use hybrid_sql::embedding::Embedder;
use hybrid_sql::llm::{ChatCompletion, ChatMessage, ChatModel};
use hybrid_sql::models::{Document, Row, ScoredDocument};
use hybrid_sql::relational::{quote_ident, RelationalStore};
use hybrid_sql::vector_store::{InMemoryVectorStore, VectorStore};

/// Bag-of-words embedder: each lowercase word bumps one hashed dimension.
pub struct HashEmbedder;

const DIMS: usize = 256;

fn word_slot(word: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMS as u64) as usize
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIMS];
                for word in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                {
                    v[word_slot(&word.to_lowercase())] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// In-memory vector store that records every call.
pub struct RecordingStore {
    inner: InMemoryVectorStore,
    pub searches: Mutex<Vec<(String, usize)>>,
    pub add_calls: Mutex<Vec<Vec<Document>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryVectorStore::new(Arc::new(HashEmbedder)),
            searches: Mutex::new(Vec::new()),
            add_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn add_call_count(&self) -> usize {
        self.add_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl VectorStore for RecordingStore {
    async fn similarity_search_with_score(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>> {
        self.searches.lock().unwrap().push((query.to_string(), k));
        self.inner.similarity_search_with_score(query, k).await
    }

    async fn add_documents(&self, docs: &[Document]) -> Result<usize> {
        self.add_calls.lock().unwrap().push(docs.to_vec());
        self.inner.add_documents(docs).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}

/// Vector store whose every call fails, as when the database is down.
pub struct UnreachableStore;

#[async_trait]
impl VectorStore for UnreachableStore {
    async fn similarity_search_with_score(&self, _query: &str, _k: usize) -> Result<Vec<ScoredDocument>> {
        bail!("connection refused")
    }

    async fn add_documents(&self, _docs: &[Document]) -> Result<usize> {
        bail!("connection refused")
    }

    async fn count(&self) -> Result<usize> {
        bail!("connection refused")
    }
}

/// Tables held in memory; `SELECT * FROM "<t>"` returns their rows.
#[derive(Default)]
pub struct FakeDb {
    tables: HashMap<String, Vec<Row>>,
    failing: HashSet<String>,
    pub executed: Mutex<Vec<String>>,
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str, rows: Vec<Row>) -> Self {
        self.tables.insert(name.to_string(), rows);
        self
    }

    pub fn with_failing_table(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub fn products() -> Vec<Row> {
    vec![
        row(&[("id", json!(1)), ("name", json!("Laptop")), ("price", json!(1299.0))]),
        row(&[("id", json!(2)), ("name", json!("Monitor")), ("price", json!(349.5))]),
        row(&[("id", json!(3)), ("name", json!("Keyboard")), ("price", json!(89.99))]),
    ]
}

#[async_trait]
impl RelationalStore for FakeDb {
    fn dialect(&self) -> &str {
        "postgresql"
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.executed.lock().unwrap().push(sql.to_string());
        if sql.trim_start().to_uppercase().starts_with("CREATE")
            || sql.trim_start().to_uppercase().starts_with("ALTER")
        {
            Ok(0)
        } else {
            bail!("syntax error at or near \"{}\"", sql.split_whitespace().next().unwrap_or(""))
        }
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<Row>> {
        for (name, rows) in &self.tables {
            if sql == format!("SELECT * FROM {}", quote_ident(name)) {
                return Ok(rows.clone());
            }
        }
        for name in &self.failing {
            if sql.contains(&quote_ident(name)) {
                bail!("permission denied for table {}", name);
            }
        }
        bail!("relation does not exist: {}", sql)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn describe_table(&self, table: &str, _sample_rows: usize) -> Result<String> {
        Ok(format!("CREATE TABLE {} ()", table))
    }
}

/// Agent that records prompts and returns a canned answer or error.
pub struct FakeAgent {
    answer: Result<String, String>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeAgent {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Ok(answer.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            answer: Err(error.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SqlAgent for FakeAgent {
    async fn run(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.answer {
            Ok(a) => Ok(a.clone()),
            Err(e) => bail!("{}", e),
        }
    }
}

/// Chat model that answers every request with the same text.
pub struct FixedChat(pub String);

#[async_trait]
impl ChatModel for FixedChat {
    async fn complete(&self, _messages: &[ChatMessage], _tools: &[Value]) -> Result<ChatCompletion> {
        Ok(ChatCompletion::text(self.0.clone()))
    }
}
