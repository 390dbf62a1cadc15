use anyhow::Result;

use crate::config::Config;
use crate::db;

/// Create the pgvector extension and the collection tables. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.vector_store).await?;

    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(&pool)
        .await?;

    // Collections partition the embedding table by name
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS langchain_pg_collection (
            uuid UUID PRIMARY KEY,
            name VARCHAR NOT NULL UNIQUE,
            cmetadata JSONB
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS langchain_pg_embedding (
            id VARCHAR PRIMARY KEY,
            collection_id UUID REFERENCES langchain_pg_collection(uuid) ON DELETE CASCADE,
            embedding VECTOR,
            document VARCHAR,
            cmetadata JSONB
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_cmetadata_gin ON langchain_pg_embedding USING gin (cmetadata jsonb_path_ops)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_embedding_collection_id ON langchain_pg_embedding(collection_id)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
