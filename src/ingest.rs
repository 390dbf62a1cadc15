//! Ingestion job: table rows → text documents → dedup probe → one bulk insert.
//!
//! Each row becomes a [`Document`] whose content lists the table name and
//! every `column: value` pair. Before a document is queued, a similarity
//! probe on its own content decides whether the store already holds it.
//! All admitted documents are written with a single
//! [`VectorStore::add_documents`] call at the end, so two near-identical
//! rows seen in the same pass are both admitted.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::models::{Document, Row};
use crate::relational::{quote_ident, render_value, RelationalStore};
use crate::vector_store::VectorStore;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Documents fetched by the duplicate probe.
    pub probe_k: usize,
    /// When set, only a probe hit at or below this distance is a duplicate.
    pub duplicate_max_distance: Option<f64>,
    /// Read and probe, but skip the write.
    pub dry_run: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            probe_k: 1,
            duplicate_max_distance: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub tables_scanned: usize,
    pub rows_scanned: usize,
    /// Documents written (or that would be written, on a dry run).
    pub added: usize,
    pub skipped_duplicates: usize,
    /// Tables whose read failed, with the error.
    pub failed_tables: Vec<(String, String)>,
    pub dry_run: bool,
}

impl IngestReport {
    /// The line shown to operators after a refresh.
    pub fn message(&self) -> String {
        format!("Updated {} new documents in vector store.", self.added)
    }
}

/// Render one row as document text.
///
/// ```text
/// Table: products
/// id: 1
/// name: Laptop
/// ```
pub fn row_to_content(table: &str, row: &Row) -> String {
    let mut content = format!("Table: {}", table);
    for (column, value) in row {
        content.push('\n');
        content.push_str(column);
        content.push_str(": ");
        content.push_str(&render_value(value));
    }
    content
}

/// Build the document for a row; its id is the rendered first column.
pub fn row_to_document(table: &str, row: &Row) -> Document {
    let id = row
        .first()
        .map(|(_, value)| render_value(value))
        .unwrap_or_default();
    Document::new(row_to_content(table, row), table, id)
}

fn is_duplicate(hits: &[crate::models::ScoredDocument], max_distance: Option<f64>) -> bool {
    match max_distance {
        None => !hits.is_empty(),
        Some(limit) => hits.iter().any(|hit| hit.distance <= limit),
    }
}

/// Read every listed table and append the rows the store has not seen.
pub async fn populate_vector_store(
    db: &dyn RelationalStore,
    store: &dyn VectorStore,
    tables: &[String],
    options: &IngestOptions,
) -> Result<IngestReport> {
    let mut report = IngestReport {
        dry_run: options.dry_run,
        ..IngestReport::default()
    };
    let mut pending: Vec<Document> = Vec::new();

    for table in tables {
        let sql = format!("SELECT * FROM {}", quote_ident(table));
        let rows = match db.query_rows(&sql).await {
            Ok(rows) => rows,
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::warn!(table = %table, error = %message, "skipping table");
                report.failed_tables.push((table.clone(), message));
                continue;
            }
        };
        report.tables_scanned += 1;
        report.rows_scanned += rows.len();

        let mut table_added = 0usize;
        for row in &rows {
            let doc = row_to_document(table, row);
            let hits = store
                .similarity_search_with_score(&doc.content, options.probe_k)
                .await
                .with_context(|| format!("Duplicate probe failed for table {}", table))?;

            if is_duplicate(&hits, options.duplicate_max_distance) {
                report.skipped_duplicates += 1;
            } else {
                pending.push(doc);
                table_added += 1;
            }
        }
        tracing::debug!(table = %table, rows = rows.len(), queued = table_added, "table scanned");
    }

    if pending.is_empty() {
        tracing::info!("no new documents to add");
        return Ok(report);
    }

    if options.dry_run {
        report.added = pending.len();
        tracing::info!(would_add = pending.len(), "dry run, vector store unchanged");
        return Ok(report);
    }

    report.added = store
        .add_documents(&pending)
        .await
        .context("Failed to add documents to vector store")?;
    tracing::info!(added = report.added, "vector store updated");

    Ok(report)
}

/// Run [`populate_vector_store`] and return the line to show the operator.
///
/// A failed run is reported in the line; the caller's session carries on.
pub async fn refresh_message(
    db: &dyn RelationalStore,
    store: &dyn VectorStore,
    tables: &[String],
    options: &IngestOptions,
) -> String {
    match populate_vector_store(db, store, tables, options).await {
        Ok(report) => report.message(),
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "refresh failed");
            format!("Error refreshing vector store: {:#}", e)
        }
    }
}
