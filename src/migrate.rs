//! Schema setup for the SQLite store.

use anyhow::Result;
use sqlx::SqlitePool;

/// Create every table and index if missing. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Create knowledge_bases table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_bases (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create documents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            knowledge_base_id TEXT NOT NULL,
            path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            byte_size INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            declared_type TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            char_count INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            indexed_at INTEGER NOT NULL,
            PRIMARY KEY (knowledge_base_id, path),
            FOREIGN KEY (knowledge_base_id) REFERENCES knowledge_bases(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create chunks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            knowledge_base_id TEXT NOT NULL,
            document_path TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            total INTEGER NOT NULL,
            text TEXT NOT NULL,
            char_start INTEGER NOT NULL,
            char_end INTEGER NOT NULL,
            hash TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            extension TEXT NOT NULL,
            language TEXT,
            UNIQUE(knowledge_base_id, document_path, ordinal),
            FOREIGN KEY (knowledge_base_id, document_path)
                REFERENCES documents(knowledge_base_id, path) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create chunk_vectors table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(knowledge_base_id, document_path)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_type ON chunks(doc_type)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_declared_type ON documents(declared_type)")
        .execute(pool)
        .await?;

    Ok(())
}
