//! SQLite-backed [`VectorStore`] implementation.
//!
//! Knowledge bases, documents, chunks and vectors live in four tables
//! linked by cascading foreign keys. A document replacement is one
//! transaction (delete the path's rows, check dimensionality, insert), so
//! readers on other connections see either the old chunk set or the new
//! one. Search is brute-force cosine distance over the rows that pass the
//! scope and predicate, which are pushed down into SQL.
//!
//! Write transactions are serialised by an in-process lock. SQLite admits
//! one writer at a time, and a deferred transaction that reads before it
//! writes fails with `SQLITE_BUSY` instead of waiting when another
//! connection holds the write lock. Reads never take the lock.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row, SqlitePool};
use tokio::sync::Mutex;

use knowledge_harness_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use knowledge_harness_core::error::{KbError, Result};
use knowledge_harness_core::models::{
    Chunk, ChunkMetadata, DocumentSummary, KnowledgeBase, VectorRecord,
};
use knowledge_harness_core::store::{
    Field, KnowledgeBaseInfo, Neighbor, Predicate, Scope, StoreStats, VectorStore,
};

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    writer: Mutex<()>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            writer: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(n as u64)
    }
}

fn unavailable(err: sqlx::Error) -> KbError {
    KbError::StoreUnavailable(err.to_string())
}

fn column(field: Field) -> &'static str {
    match field {
        Field::DocType => "c.doc_type",
        Field::Extension => "c.extension",
        Field::Language => "c.language",
        Field::Path => "c.document_path",
    }
}

fn push_scope(qb: &mut QueryBuilder<'_, Sqlite>, scope: &Scope) {
    match scope {
        Scope::All => {
            qb.push("1 = 1");
        }
        Scope::Only(ids) if ids.is_empty() => {
            qb.push("1 = 0");
        }
        Scope::Only(ids) => {
            qb.push("c.knowledge_base_id IN (");
            let mut list = qb.separated(", ");
            for id in ids {
                list.push_bind(id.clone());
            }
            list.push_unseparated(")");
        }
    }
}

fn push_predicate(qb: &mut QueryBuilder<'_, Sqlite>, predicate: &Predicate) {
    match predicate {
        Predicate::Eq(field, value) => {
            qb.push(column(*field));
            qb.push(" = ");
            qb.push_bind(value.clone());
        }
        Predicate::In(_, values) if values.is_empty() => {
            qb.push("1 = 0");
        }
        Predicate::In(field, values) => {
            qb.push(column(*field));
            qb.push(" IN (");
            let mut list = qb.separated(", ");
            for value in values {
                list.push_bind(value.clone());
            }
            list.push_unseparated(")");
        }
        Predicate::PathPrefix(prefix) => {
            qb.push("substr(c.document_path, 1, ");
            qb.push_bind(prefix.chars().count() as i64);
            qb.push(") = ");
            qb.push_bind(prefix.clone());
        }
        Predicate::And(all) if all.is_empty() => {
            qb.push("1 = 1");
        }
        Predicate::And(all) => {
            qb.push("(");
            for (i, p) in all.iter().enumerate() {
                if i > 0 {
                    qb.push(" AND ");
                }
                push_predicate(qb, p);
            }
            qb.push(")");
        }
    }
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    Chunk {
        id: row.get("id"),
        document_path: row.get("document_path"),
        ordinal: row.get::<i64, _>("ordinal") as usize,
        total: row.get::<i64, _>("total") as usize,
        text: row.get("text"),
        char_start: row.get::<i64, _>("char_start") as usize,
        char_end: row.get::<i64, _>("char_end") as usize,
        hash: row.get("hash"),
        metadata: ChunkMetadata {
            doc_type: row.get("doc_type"),
            extension: row.get("extension"),
            language: row.get("language"),
            knowledge_base_id: row.get("knowledge_base_id"),
        },
    }
}

fn document_from_row(row: &SqliteRow) -> DocumentSummary {
    DocumentSummary {
        knowledge_base_id: row.get("knowledge_base_id"),
        path: row.get("path"),
        content_hash: row.get("content_hash"),
        byte_size: row.get::<i64, _>("byte_size") as u64,
        modified_at: row.get("modified_at"),
        declared_type: row.get("declared_type"),
        doc_type: row.get("doc_type"),
        char_count: row.get::<i64, _>("char_count") as usize,
        chunk_count: row.get::<i64, _>("chunk_count") as usize,
        indexed_at: row.get("indexed_at"),
    }
}

const DOCUMENT_COLUMNS: &str = "knowledge_base_id, path, content_hash, byte_size, modified_at, \
     declared_type, doc_type, char_count, chunk_count, indexed_at";

#[async_trait]
impl VectorStore for SqliteStore {
    async fn create_knowledge_base(&self, name: &str) -> Result<KnowledgeBase> {
        let kb = KnowledgeBase::new(name);
        let _write = self.writer.lock().await;
        let result = sqlx::query("INSERT INTO knowledge_bases (id, name, created_at) VALUES (?, ?, ?)")
            .bind(&kb.id)
            .bind(&kb.name)
            .bind(kb.created_at)
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(kb),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(KbError::KnowledgeBaseExists(name.to_string()))
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn get_knowledge_base(&self, name: &str) -> Result<Option<KnowledgeBase>> {
        let row = sqlx::query("SELECT id, name, created_at FROM knowledge_bases WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(row.map(|r| KnowledgeBase {
            id: r.get("id"),
            name: r.get("name"),
            created_at: r.get("created_at"),
        }))
    }

    async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBaseInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT kb.id, kb.name, kb.created_at,
                   (SELECT COUNT(*) FROM documents d WHERE d.knowledge_base_id = kb.id) AS documents,
                   (SELECT COUNT(*) FROM chunks c WHERE c.knowledge_base_id = kb.id) AS chunks
            FROM knowledge_bases kb
            ORDER BY kb.name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(rows
            .iter()
            .map(|r| KnowledgeBaseInfo {
                knowledge_base: KnowledgeBase {
                    id: r.get("id"),
                    name: r.get("name"),
                    created_at: r.get("created_at"),
                },
                documents: r.get::<i64, _>("documents") as u64,
                chunks: r.get::<i64, _>("chunks") as u64,
            })
            .collect())
    }

    async fn delete_knowledge_base(&self, name: &str) -> Result<bool> {
        let _write = self.writer.lock().await;
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM knowledge_bases WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unavailable)?;
        let Some(id) = id else {
            return Ok(false);
        };

        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE knowledge_base_id = ?)",
        )
        .bind(&id)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;
        sqlx::query("DELETE FROM chunks WHERE knowledge_base_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        sqlx::query("DELETE FROM documents WHERE knowledge_base_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        sqlx::query("DELETE FROM knowledge_bases WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;
        Ok(true)
    }

    async fn replace_document(
        &self,
        document: &DocumentSummary,
        records: &[VectorRecord],
    ) -> Result<()> {
        let kb_id = &document.knowledge_base_id;
        let path = &document.path;
        let _write = self.writer.lock().await;
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let kb_exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM knowledge_bases WHERE id = ?")
                .bind(kb_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(unavailable)?;
        if !kb_exists {
            return Err(KbError::KnowledgeBaseNotFound(kb_id.clone()));
        }

        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN \
             (SELECT id FROM chunks WHERE knowledge_base_id = ? AND document_path = ?)",
        )
        .bind(kb_id)
        .bind(path)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;
        sqlx::query("DELETE FROM chunks WHERE knowledge_base_id = ? AND document_path = ?")
            .bind(kb_id)
            .bind(path)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        sqlx::query("DELETE FROM documents WHERE knowledge_base_id = ? AND path = ?")
            .bind(kb_id)
            .bind(path)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        // Dimensionality of whatever remains after removing this path.
        let stored: Option<i64> = sqlx::query_scalar("SELECT dims FROM chunk_vectors LIMIT 1")
            .fetch_optional(&mut *tx)
            .await
            .map_err(unavailable)?;
        let expected = stored
            .map(|d| d as usize)
            .or_else(|| records.first().map(|r| r.dims()));
        if let Some(expected) = expected {
            if let Some(bad) = records.iter().find(|r| r.dims() != expected) {
                // Dropping the transaction rolls back the deletes.
                return Err(KbError::DimensionMismatch {
                    expected,
                    actual: bad.dims(),
                });
            }
        }

        sqlx::query(&format!(
            "INSERT INTO documents ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            DOCUMENT_COLUMNS
        ))
        .bind(kb_id)
        .bind(path)
        .bind(&document.content_hash)
        .bind(document.byte_size as i64)
        .bind(document.modified_at)
        .bind(&document.declared_type)
        .bind(&document.doc_type)
        .bind(document.char_count as i64)
        .bind(records.len() as i64)
        .bind(document.indexed_at)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        for record in records {
            let chunk = &record.chunk;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, knowledge_base_id, document_path, ordinal, total, text,
                                    char_start, char_end, hash, doc_type, extension, language)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(kb_id)
            .bind(path)
            .bind(chunk.ordinal as i64)
            .bind(chunk.total as i64)
            .bind(&chunk.text)
            .bind(chunk.char_start as i64)
            .bind(chunk.char_end as i64)
            .bind(&chunk.hash)
            .bind(&chunk.metadata.doc_type)
            .bind(&chunk.metadata.extension)
            .bind(&chunk.metadata.language)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

            sqlx::query("INSERT INTO chunk_vectors (chunk_id, dims, embedding) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(record.dims() as i64)
                .bind(vec_to_blob(&record.embedding))
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
        }

        tx.commit().await.map_err(unavailable)?;
        Ok(())
    }

    async fn remove_document(&self, knowledge_base_id: &str, path: &str) -> Result<bool> {
        let _write = self.writer.lock().await;
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN \
             (SELECT id FROM chunks WHERE knowledge_base_id = ? AND document_path = ?)",
        )
        .bind(knowledge_base_id)
        .bind(path)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;
        sqlx::query("DELETE FROM chunks WHERE knowledge_base_id = ? AND document_path = ?")
            .bind(knowledge_base_id)
            .bind(path)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        let removed = sqlx::query("DELETE FROM documents WHERE knowledge_base_id = ? AND path = ?")
            .bind(knowledge_base_id)
            .bind(path)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?
            .rows_affected();
        tx.commit().await.map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn get_document(
        &self,
        knowledge_base_id: &str,
        path: &str,
    ) -> Result<Option<DocumentSummary>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE knowledge_base_id = ? AND path = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(knowledge_base_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(row.as_ref().map(document_from_row))
    }

    async fn list_documents(&self, knowledge_base_id: &str) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE knowledge_base_id = ? ORDER BY path ASC",
            DOCUMENT_COLUMNS
        ))
        .bind(knowledge_base_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    async fn dimensions(&self) -> Result<Option<usize>> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM chunk_vectors LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(dims.map(|d| d as usize))
    }

    async fn count_vectors(&self, scope: &Scope) -> Result<u64> {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT COUNT(*) FROM chunk_vectors cv JOIN chunks c ON c.id = cv.chunk_id WHERE ",
        );
        push_scope(&mut qb, scope);
        let count: i64 = qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(count as u64)
    }

    async fn nearest(
        &self,
        query: &[f32],
        k: usize,
        scope: &Scope,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<Neighbor>> {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            r#"
            SELECT c.id, c.knowledge_base_id, c.document_path, c.ordinal, c.total, c.text,
                   c.char_start, c.char_end, c.hash, c.doc_type, c.extension, c.language,
                   cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE "#,
        );
        push_scope(&mut qb, scope);
        if let Some(predicate) = predicate {
            qb.push(" AND ");
            push_predicate(&mut qb, predicate);
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        let mut hits: Vec<Neighbor> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                Neighbor {
                    chunk: chunk_from_row(row),
                    distance: cosine_distance(query, &blob_to_vec(&blob)),
                }
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

    async fn stats(&self) -> Result<StoreStats> {
        let knowledge_bases = self.count("SELECT COUNT(*) FROM knowledge_bases").await?;
        let documents = self.count("SELECT COUNT(*) FROM documents").await?;
        let chunks = self.count("SELECT COUNT(*) FROM chunks").await?;
        let vectors = self.count("SELECT COUNT(*) FROM chunk_vectors").await?;

        let rows = sqlx::query(
            "SELECT declared_type, COUNT(*) AS n FROM documents GROUP BY declared_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;
        let documents_by_type: BTreeMap<String, u64> = rows
            .iter()
            .map(|r| (r.get("declared_type"), r.get::<i64, _>("n") as u64))
            .collect();

        Ok(StoreStats {
            knowledge_bases,
            documents,
            chunks,
            vectors,
            dimensions: self.dimensions().await?,
            documents_by_type,
        })
    }
}
