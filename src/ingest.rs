//! Indexing pipeline orchestration.
//!
//! Coordinates the full flow for one root directory: scan → admission →
//! normalization → chunking → embedding → storage.
//!
//! Admitted files run through independent per-file pipelines, up to
//! `indexing.workers` at a time. Reading and extraction happen on the
//! blocking pool; embedding calls are batched; each document is committed
//! with one atomic `replace_document`. Files whose stored content hash is
//! unchanged are skipped unless a full rebuild is requested.
//!
//! Per-file extraction and embedding failures are recorded and the run
//! continues. A dimension mismatch or an unavailable store aborts the run.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use knowledge_harness_core::chunk::{chunk_document, ChunkParams};
use knowledge_harness_core::error::KbError;
use knowledge_harness_core::filter::{Preset, RejectReason};
use knowledge_harness_core::models::KnowledgeBase;
use knowledge_harness_core::retrieval::RetrievalEngine;

use crate::config::{Config, FilterConfig};
use crate::normalize::read_document;
use crate::scanner::Scanner;

/// Shared cancellation signal for a running index.
///
/// Checked before each file and between embedding batches. Files in flight
/// when it is raised are not committed.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Re-embed every admitted file, even when its hash is unchanged.
    pub full: bool,
    /// Remove stored documents that this scan did not admit.
    pub prune: bool,
    /// Use this preset instead of the configured one.
    pub preset: Option<Preset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexSummary {
    pub knowledge_base: String,
    pub preset: String,
    pub scanned: u64,
    pub admitted: u64,
    pub rejected_by_reason: BTreeMap<RejectReason, u64>,
    pub indexed: u64,
    pub unchanged: u64,
    pub removed: u64,
    pub chunks_written: u64,
    pub extraction_failures: Vec<FileFailure>,
    pub embedding_failures: Vec<FileFailure>,
    pub cancelled: bool,
}

/// Result of indexing a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Indexed { chunks: usize },
    Unchanged,
    /// The file is gone or no longer admitted; `removed` tells whether a
    /// stored copy was deleted.
    Removed { removed: bool },
    Rejected { reason: RejectReason, rule: Option<String> },
    ExtractionFailed { error: String },
    EmbeddingFailed { error: String },
    Cancelled,
}

/// A filesystem change reported by an external watcher. Paths are
/// relative to the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Upserted(PathBuf),
    Removed(PathBuf),
}

/// Serialises writes to the same document path.
#[derive(Debug, Default)]
struct PathLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    fn lock_for(&self, knowledge_base_id: &str, path: &str) -> Arc<tokio::sync::Mutex<()>> {
        let key = format!("{}\0{}", knowledge_base_id, path);
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key).or_default().clone()
    }
}

/// The indexing pipeline around a [`RetrievalEngine`].
#[derive(Clone)]
pub struct Indexer {
    engine: RetrievalEngine,
    chunking: ChunkParams,
    filter: FilterConfig,
    workers: usize,
    locks: Arc<PathLocks>,
}

impl Indexer {
    pub fn new(
        engine: RetrievalEngine,
        chunking: ChunkParams,
        filter: FilterConfig,
        workers: usize,
    ) -> Self {
        Self {
            engine,
            chunking,
            filter,
            workers: workers.max(1),
            locks: Arc::new(PathLocks::default()),
        }
    }

    pub fn from_config(config: &Config, engine: RetrievalEngine) -> Self {
        Self::new(
            engine,
            config.chunking.params(),
            config.filter.clone(),
            config.indexing.workers,
        )
    }

    pub fn engine(&self) -> &RetrievalEngine {
        &self.engine
    }

    pub fn filter(&self) -> &FilterConfig {
        &self.filter
    }

    /// Index every admitted file under `root` into knowledge base
    /// `kb_name`, creating the knowledge base when missing.
    pub async fn run_index(
        &self,
        root: &Path,
        kb_name: &str,
        options: &IndexOptions,
        cancel: &CancelFlag,
    ) -> Result<IndexSummary> {
        let kb = self.engine.ensure_knowledge_base(kb_name).await?;

        let mut scanner = Scanner::new(root, &self.filter, options.preset)?;
        let report = tokio::task::spawn_blocking(move || scanner.scan()).await?;

        let mut summary = IndexSummary {
            knowledge_base: kb.name.clone(),
            preset: report.preset.to_string(),
            scanned: report.stats.scanned,
            admitted: report.stats.admitted,
            rejected_by_reason: report.stats.rejected.clone(),
            ..IndexSummary::default()
        };

        let stored: Vec<String> = self
            .engine
            .store()
            .list_documents(&kb.id)
            .await?
            .into_iter()
            .map(|d| d.path)
            .collect();

        let root = Arc::new(root.to_path_buf());
        let mut outcomes = stream::iter(report.admitted.iter().cloned())
            .map(|path| {
                let skip_unchanged = !options.full;
                let root = root.clone();
                let kb_id = kb.id.clone();
                async move {
                    let outcome = self
                        .process_file(&kb_id, &root, &path, skip_unchanged, cancel)
                        .await;
                    (path, outcome)
                }
            })
            .buffer_unordered(self.workers);

        while let Some((path, outcome)) = outcomes.next().await {
            match outcome? {
                FileOutcome::Indexed { chunks } => {
                    debug!(path = %path, chunks, "indexed");
                    summary.indexed += 1;
                    summary.chunks_written += chunks as u64;
                }
                FileOutcome::Unchanged => summary.unchanged += 1,
                FileOutcome::ExtractionFailed { error } => {
                    warn!(path = %path, %error, "extraction failed");
                    summary.extraction_failures.push(FileFailure { path, error });
                }
                FileOutcome::EmbeddingFailed { error } => {
                    warn!(path = %path, %error, "embedding failed");
                    summary.embedding_failures.push(FileFailure { path, error });
                }
                FileOutcome::Cancelled => summary.cancelled = true,
                FileOutcome::Removed { .. } | FileOutcome::Rejected { .. } => {}
            }
        }
        drop(outcomes);

        if cancel.is_cancelled() {
            summary.cancelled = true;
        }

        if options.prune && !summary.cancelled {
            let admitted: HashSet<&String> = report.admitted.iter().collect();
            for path in stored.iter().filter(|p| !admitted.contains(p)) {
                if self.remove_path(&kb, path).await? {
                    debug!(path = %path, "pruned");
                    summary.removed += 1;
                }
            }
        }

        info!(
            knowledge_base = %summary.knowledge_base,
            scanned = summary.scanned,
            indexed = summary.indexed,
            unchanged = summary.unchanged,
            removed = summary.removed,
            failures = summary.extraction_failures.len() + summary.embedding_failures.len(),
            cancelled = summary.cancelled,
            "index finished"
        );
        Ok(summary)
    }

    /// Bring one file's stored state in line with the filesystem.
    ///
    /// The file is evaluated with the same filter as a full scan, ancestor
    /// directories included. A missing or rejected file is removed from the
    /// knowledge base.
    pub async fn reindex(&self, root: &Path, kb_name: &str, rel_path: &str) -> Result<FileOutcome> {
        let kb = self.engine.ensure_knowledge_base(kb_name).await?;
        let rel_path = normalize_rel(rel_path)?;

        if !root.join(&rel_path).is_file() {
            let removed = self.remove_path(&kb, &rel_path).await?;
            return Ok(FileOutcome::Removed { removed });
        }

        let mut scanner = Scanner::new(root, &self.filter, None)?;
        let path = rel_path.clone();
        let decision = tokio::task::spawn_blocking(move || scanner.evaluate_path(&path)).await?;

        if let Some(reason) = decision.reason() {
            self.remove_path(&kb, &rel_path).await?;
            return Ok(FileOutcome::Rejected {
                reason,
                rule: decision.matched_rule,
            });
        }

        let outcome = self
            .process_file(&kb.id, root, &rel_path, true, &CancelFlag::new())
            .await?;
        Ok(outcome)
    }

    /// Apply watcher events until the channel closes or `cancel` is raised.
    ///
    /// Returns the number of events applied. Per-file failures are logged;
    /// fatal store errors end the loop with an error.
    pub async fn run_change_queue(
        &self,
        root: &Path,
        kb_name: &str,
        mut events: mpsc::Receiver<ChangeEvent>,
        cancel: &CancelFlag,
    ) -> Result<u64> {
        let kb = self.engine.ensure_knowledge_base(kb_name).await?;
        let mut applied = 0u64;

        while let Some(event) = events.recv().await {
            if cancel.is_cancelled() {
                break;
            }
            match event {
                ChangeEvent::Upserted(path) => {
                    let rel = path.to_string_lossy().to_string();
                    match self.reindex(root, kb_name, &rel).await {
                        Ok(outcome) => debug!(path = %rel, ?outcome, "reindexed"),
                        Err(e) if is_fatal(&e) => return Err(e),
                        Err(e) => warn!(path = %rel, error = %e, "reindex failed"),
                    }
                }
                ChangeEvent::Removed(path) => match normalize_rel(&path.to_string_lossy()) {
                    Ok(rel) => {
                        self.remove_path(&kb, &rel).await?;
                    }
                    Err(e) => warn!(error = %e, "ignoring change event"),
                },
            }
            applied += 1;
        }
        Ok(applied)
    }

    async fn remove_path(&self, kb: &KnowledgeBase, path: &str) -> Result<bool> {
        let lock = self.locks.lock_for(&kb.id, path);
        let _guard = lock.lock().await;
        Ok(self.engine.remove(&kb.id, path).await?)
    }

    /// Read, chunk, embed and commit one file.
    ///
    /// Only fatal errors are returned as `Err`; per-file failures become a
    /// [`FileOutcome`].
    async fn process_file(
        &self,
        knowledge_base_id: &str,
        root: &Path,
        rel_path: &str,
        skip_unchanged: bool,
        cancel: &CancelFlag,
    ) -> std::result::Result<FileOutcome, KbError> {
        if cancel.is_cancelled() {
            return Ok(FileOutcome::Cancelled);
        }
        let lock = self.locks.lock_for(knowledge_base_id, rel_path);
        let _guard = lock.lock().await;

        let kb_id = knowledge_base_id.to_string();
        let root_dir = root.to_path_buf();
        let path = rel_path.to_string();
        let read = tokio::task::spawn_blocking(move || read_document(&kb_id, &root_dir, &path))
            .await
            .map_err(|e| KbError::ExtractionFailed {
                path: rel_path.to_string(),
                reason: e.to_string(),
            });
        let document = match read.and_then(|r| r) {
            Ok(document) => document,
            Err(e @ KbError::ExtractionFailed { .. }) => {
                return Ok(FileOutcome::ExtractionFailed {
                    error: e.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        // Read under the path lock so a concurrent writer's commit is seen.
        if skip_unchanged {
            let stored = self
                .engine
                .store()
                .get_document(knowledge_base_id, rel_path)
                .await?;
            if stored.is_some_and(|d| d.content_hash == document.content_hash) {
                return Ok(FileOutcome::Unchanged);
            }
        }

        let chunks = chunk_document(&document, &self.chunking);
        let batch_size = self.engine.params().batch_size.max(1);
        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size) {
            if cancel.is_cancelled() {
                return Ok(FileOutcome::Cancelled);
            }
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            match self.engine.embed_batch(&texts).await {
                Ok(vectors) => embeddings.extend(vectors),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    return Ok(FileOutcome::EmbeddingFailed {
                        error: e.to_string(),
                    })
                }
            }
        }
        if cancel.is_cancelled() {
            return Ok(FileOutcome::Cancelled);
        }

        let summary = document.summary(chunks.len());
        let written = self.engine.index(&summary, chunks, embeddings).await?;
        Ok(FileOutcome::Indexed { chunks: written })
    }
}

/// Whether an application error wraps a run-aborting [`KbError`].
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<KbError>().is_some_and(KbError::is_fatal)
}

/// Turn a user-supplied relative path into the stored `/`-separated form.
fn normalize_rel(path: &str) -> Result<String> {
    let cleaned = path.replace('\\', "/");
    let parts: Vec<&str> = cleaned
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() || parts.contains(&"..") || cleaned.starts_with('/') {
        bail!("Path must be relative to the indexed root: {}", path);
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_harness_core::embedding::HashEmbedder;
    use knowledge_harness_core::retrieval::{Query, RetrievalParams};
    use knowledge_harness_core::store::memory::InMemoryStore;
    use knowledge_harness_core::store::VectorStore;
    use tempfile::TempDir;

    fn indexer() -> Indexer {
        let engine = RetrievalEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(HashEmbedder::new(64).unwrap()),
            RetrievalParams::default(),
        );
        Indexer::new(engine, ChunkParams::default(), FilterConfig::default(), 2)
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn sample_tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "notes.md", &"Rust ownership rules and borrowing.\n".repeat(20));
        write(tmp.path(), "recipes/bread.txt", &"Knead the dough for ten minutes.\n".repeat(10));
        write(tmp.path(), ".env", "SECRET=abcdefghijkl");
        write(tmp.path(), "node_modules/pkg/index.js", "module.exports = {};\n");
        tmp
    }

    #[tokio::test]
    async fn test_index_then_skip_unchanged() {
        let tmp = sample_tree();
        let ix = indexer();

        let first = ix
            .run_index(tmp.path(), "default", &IndexOptions::default(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(first.indexed, 2);
        assert_eq!(first.admitted, 2);
        assert!(first.chunks_written >= 2);
        assert_eq!(first.rejected_by_reason.get(&RejectReason::SensitiveName), Some(&1));
        assert_eq!(first.rejected_by_reason.get(&RejectReason::Pattern), Some(&1));

        let second = ix
            .run_index(tmp.path(), "default", &IndexOptions::default(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(second.indexed, 0);
        assert_eq!(second.unchanged, 2);

        let full = IndexOptions {
            full: true,
            ..IndexOptions::default()
        };
        let third = ix
            .run_index(tmp.path(), "default", &full, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(third.indexed, 2);
    }

    #[tokio::test]
    async fn test_indexed_content_is_searchable() {
        let tmp = sample_tree();
        let ix = indexer();
        ix.run_index(tmp.path(), "default", &IndexOptions::default(), &CancelFlag::new())
            .await
            .unwrap();

        let results = ix
            .engine()
            .query(&Query::new("knead the dough"))
            .await
            .unwrap();
        assert_eq!(results[0].chunk.document_path, "recipes/bread.txt");
    }

    #[tokio::test]
    async fn test_prune_removes_vanished_files() {
        let tmp = sample_tree();
        let ix = indexer();
        ix.run_index(tmp.path(), "default", &IndexOptions::default(), &CancelFlag::new())
            .await
            .unwrap();

        std::fs::remove_file(tmp.path().join("recipes/bread.txt")).unwrap();
        let options = IndexOptions {
            prune: true,
            ..IndexOptions::default()
        };
        let summary = ix
            .run_index(tmp.path(), "default", &options, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(summary.removed, 1);

        let kb = ix.engine().knowledge_base("default").await.unwrap();
        let docs = ix.engine().store().list_documents(&kb.id).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "notes.md");
    }

    #[tokio::test]
    async fn test_cancelled_run_commits_nothing() {
        let tmp = sample_tree();
        let ix = indexer();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let summary = ix
            .run_index(tmp.path(), "default", &IndexOptions::default(), &cancel)
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.indexed, 0);
        let stats = ix.engine().store().stats().await.unwrap();
        assert_eq!(stats.documents, 0);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_recorded() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "broken.docx", "this is not a zip archive at all");
        write(tmp.path(), "fine.md", "a perfectly ordinary note");
        let ix = indexer();

        let summary = ix
            .run_index(tmp.path(), "default", &IndexOptions::default(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(summary.indexed, 1);
        assert_eq!(summary.extraction_failures.len(), 1);
        assert_eq!(summary.extraction_failures[0].path, "broken.docx");
    }

    #[tokio::test]
    async fn test_reindex_single_file() {
        let tmp = sample_tree();
        let ix = indexer();

        let outcome = ix.reindex(tmp.path(), "default", "notes.md").await.unwrap();
        assert!(matches!(outcome, FileOutcome::Indexed { .. }));
        let again = ix.reindex(tmp.path(), "default", "./notes.md").await.unwrap();
        assert_eq!(again, FileOutcome::Unchanged);

        let rejected = ix.reindex(tmp.path(), "default", ".env").await.unwrap();
        assert!(matches!(
            rejected,
            FileOutcome::Rejected {
                reason: RejectReason::SensitiveName,
                ..
            }
        ));

        std::fs::remove_file(tmp.path().join("notes.md")).unwrap();
        let gone = ix.reindex(tmp.path(), "default", "notes.md").await.unwrap();
        assert_eq!(gone, FileOutcome::Removed { removed: true });
    }

    #[tokio::test]
    async fn test_change_queue() {
        let tmp = sample_tree();
        let ix = indexer();
        let (tx, rx) = mpsc::channel(8);

        tx.send(ChangeEvent::Upserted(PathBuf::from("notes.md")))
            .await
            .unwrap();
        tx.send(ChangeEvent::Upserted(PathBuf::from("recipes/bread.txt")))
            .await
            .unwrap();
        tx.send(ChangeEvent::Removed(PathBuf::from("notes.md")))
            .await
            .unwrap();
        drop(tx);

        let applied = ix
            .run_change_queue(tmp.path(), "default", rx, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(applied, 3);

        let kb = ix.engine().knowledge_base("default").await.unwrap();
        let docs = ix.engine().store().list_documents(&kb.id).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "recipes/bread.txt");
    }

    #[test]
    fn test_normalize_rel() {
        assert_eq!(normalize_rel("./a/b.md").unwrap(), "a/b.md");
        assert_eq!(normalize_rel("a\\b.md").unwrap(), "a/b.md");
        assert!(normalize_rel("../x.md").is_err());
        assert!(normalize_rel("/etc/passwd").is_err());
    }
}
