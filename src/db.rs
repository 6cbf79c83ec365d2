//! SQLite connection setup.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use knowledge_harness_core::retrieval::RetrievalEngine;

use crate::config::Config;
use crate::embedding;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

/// How long a connection waits on another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

    Ok(pool)
}

/// Open the database and apply the schema.
pub async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let pool = connect(config).await?;
    migrate::apply(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

/// Open the store and wire the configured embedding provider into a
/// retrieval engine.
pub async fn open_engine(config: &Config) -> Result<RetrievalEngine> {
    let store = open_store(config).await?;
    let embedder = embedding::create_provider(&config.embedding)?;
    Ok(RetrievalEngine::new(store, embedder, config.retrieval_params()))
}
