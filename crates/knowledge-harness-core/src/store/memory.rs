//! In-memory [`VectorStore`] implementation for tests and embedding hosts.
//!
//! All state lives behind a single `std::sync::RwLock`, so a document
//! replacement is one write-locked swap and readers never observe a
//! partial chunk set. Search is brute-force cosine distance.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::error::{KbError, Result};
use crate::models::{DocumentSummary, KnowledgeBase, VectorRecord};

use super::{KnowledgeBaseInfo, Neighbor, Predicate, Scope, StoreStats, VectorStore};

#[derive(Default)]
struct State {
    /// Keyed by name.
    knowledge_bases: BTreeMap<String, KnowledgeBase>,
    /// Keyed by `(knowledge_base_id, path)`.
    documents: BTreeMap<(String, String), StoredDocument>,
}

struct StoredDocument {
    summary: DocumentSummary,
    records: Vec<VectorRecord>,
}

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| KbError::StoreUnavailable("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| KbError::StoreUnavailable("in-memory store lock poisoned".to_string()))
    }
}

impl State {
    fn dimensions(&self) -> Option<usize> {
        self.documents
            .values()
            .flat_map(|d| d.records.iter())
            .map(|r| r.dims())
            .next()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn create_knowledge_base(&self, name: &str) -> Result<KnowledgeBase> {
        let mut state = self.write()?;
        if state.knowledge_bases.contains_key(name) {
            return Err(KbError::KnowledgeBaseExists(name.to_string()));
        }
        let kb = KnowledgeBase::new(name);
        state.knowledge_bases.insert(name.to_string(), kb.clone());
        Ok(kb)
    }

    async fn get_knowledge_base(&self, name: &str) -> Result<Option<KnowledgeBase>> {
        Ok(self.read()?.knowledge_bases.get(name).cloned())
    }

    async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBaseInfo>> {
        let state = self.read()?;
        Ok(state
            .knowledge_bases
            .values()
            .map(|kb| {
                let docs = state
                    .documents
                    .values()
                    .filter(|d| d.summary.knowledge_base_id == kb.id);
                let (documents, chunks) = docs.fold((0u64, 0u64), |(d, c), doc| {
                    (d + 1, c + doc.records.len() as u64)
                });
                KnowledgeBaseInfo {
                    knowledge_base: kb.clone(),
                    documents,
                    chunks,
                }
            })
            .collect())
    }

    async fn delete_knowledge_base(&self, name: &str) -> Result<bool> {
        let mut state = self.write()?;
        let Some(kb) = state.knowledge_bases.remove(name) else {
            return Ok(false);
        };
        state.documents.retain(|(kb_id, _), _| *kb_id != kb.id);
        Ok(true)
    }

    async fn replace_document(
        &self,
        document: &DocumentSummary,
        records: &[VectorRecord],
    ) -> Result<()> {
        let mut state = self.write()?;
        if !state
            .knowledge_bases
            .values()
            .any(|kb| kb.id == document.knowledge_base_id)
        {
            return Err(KbError::KnowledgeBaseNotFound(
                document.knowledge_base_id.clone(),
            ));
        }

        let key = (document.knowledge_base_id.clone(), document.path.clone());
        let previous = state.documents.remove(&key);

        let expected = state
            .dimensions()
            .or_else(|| records.first().map(|r| r.dims()));
        let check = expected.and_then(|expected| {
            records
                .iter()
                .map(|r| r.dims())
                .find(|d| *d != expected)
                .map(|actual| (expected, actual))
        });
        if let Some((expected, actual)) = check {
            if let Some(prev) = previous {
                state.documents.insert(key, prev);
            }
            return Err(KbError::DimensionMismatch { expected, actual });
        }

        state.documents.insert(
            key,
            StoredDocument {
                summary: document.clone(),
                records: records.to_vec(),
            },
        );
        Ok(())
    }

    async fn remove_document(&self, knowledge_base_id: &str, path: &str) -> Result<bool> {
        let mut state = self.write()?;
        Ok(state
            .documents
            .remove(&(knowledge_base_id.to_string(), path.to_string()))
            .is_some())
    }

    async fn get_document(
        &self,
        knowledge_base_id: &str,
        path: &str,
    ) -> Result<Option<DocumentSummary>> {
        let state = self.read()?;
        Ok(state
            .documents
            .get(&(knowledge_base_id.to_string(), path.to_string()))
            .map(|d| d.summary.clone()))
    }

    async fn list_documents(&self, knowledge_base_id: &str) -> Result<Vec<DocumentSummary>> {
        let state = self.read()?;
        Ok(state
            .documents
            .iter()
            .filter(|((kb_id, _), _)| kb_id == knowledge_base_id)
            .map(|(_, d)| d.summary.clone())
            .collect())
    }

    async fn dimensions(&self) -> Result<Option<usize>> {
        Ok(self.read()?.dimensions())
    }

    async fn count_vectors(&self, scope: &Scope) -> Result<u64> {
        let state = self.read()?;
        Ok(state
            .documents
            .iter()
            .filter(|((kb_id, _), _)| scope.includes(kb_id))
            .map(|(_, d)| d.records.len() as u64)
            .sum())
    }

    async fn nearest(
        &self,
        query: &[f32],
        k: usize,
        scope: &Scope,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<Neighbor>> {
        let state = self.read()?;
        let mut hits: Vec<Neighbor> = state
            .documents
            .iter()
            .filter(|((kb_id, _), _)| scope.includes(kb_id))
            .flat_map(|(_, d)| d.records.iter())
            .filter(|r| predicate.map_or(true, |p| p.matches(&r.chunk)))
            .map(|r| Neighbor {
                chunk: r.chunk.clone(),
                distance: cosine_distance(query, &r.embedding),
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
        let state = self.read()?;
        let mut stats = StoreStats {
            knowledge_bases: state.knowledge_bases.len() as u64,
            dimensions: state.dimensions(),
            ..StoreStats::default()
        };
        for doc in state.documents.values() {
            stats.documents += 1;
            stats.chunks += doc.records.len() as u64;
            stats.vectors += doc.records.len() as u64;
            *stats
                .documents_by_type
                .entry(doc.summary.declared_type.clone())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata};

    fn summary(kb: &str, path: &str) -> DocumentSummary {
        DocumentSummary {
            knowledge_base_id: kb.to_string(),
            path: path.to_string(),
            content_hash: "hash".to_string(),
            byte_size: 10,
            modified_at: 0,
            declared_type: "md".to_string(),
            doc_type: "plain-text".to_string(),
            char_count: 10,
            chunk_count: 1,
            indexed_at: 0,
        }
    }

    fn record(kb: &str, path: &str, ordinal: usize, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            chunk: Chunk {
                id: format!("{path}-{ordinal}"),
                document_path: path.to_string(),
                ordinal,
                total: 1,
                text: format!("{path} chunk {ordinal}"),
                char_start: 0,
                char_end: 10,
                hash: format!("{path}-{ordinal}-hash"),
                metadata: ChunkMetadata {
                    doc_type: "plain-text".to_string(),
                    extension: "md".to_string(),
                    language: None,
                    knowledge_base_id: kb.to_string(),
                },
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn test_knowledge_base_lifecycle() {
        let store = InMemoryStore::new();
        let kb = store.create_knowledge_base("notes").await.unwrap();
        assert!(matches!(
            store.create_knowledge_base("notes").await,
            Err(KbError::KnowledgeBaseExists(_))
        ));
        store
            .replace_document(&summary(&kb.id, "a.md"), &[record(&kb.id, "a.md", 0, vec![1.0, 0.0])])
            .await
            .unwrap();

        let listed = store.list_knowledge_bases().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].documents, 1);
        assert_eq!(listed[0].chunks, 1);

        assert!(store.delete_knowledge_base("notes").await.unwrap());
        assert!(!store.delete_knowledge_base("notes").await.unwrap());
        assert_eq!(store.count_vectors(&Scope::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replace_swaps_chunk_set() {
        let store = InMemoryStore::new();
        let kb = store.create_knowledge_base("kb").await.unwrap();
        let doc = summary(&kb.id, "a.md");
        store
            .replace_document(
                &doc,
                &[
                    record(&kb.id, "a.md", 0, vec![1.0, 0.0]),
                    record(&kb.id, "a.md", 1, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
            .replace_document(&doc, &[record(&kb.id, "a.md", 0, vec![1.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(store.count_vectors(&Scope::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_keeps_previous() {
        let store = InMemoryStore::new();
        let kb = store.create_knowledge_base("kb").await.unwrap();
        store
            .replace_document(&summary(&kb.id, "a.md"), &[record(&kb.id, "a.md", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .replace_document(&summary(&kb.id, "b.md"), &[record(&kb.id, "b.md", 0, vec![0.0, 1.0])])
            .await
            .unwrap();

        let err = store
            .replace_document(
                &summary(&kb.id, "b.md"),
                &[record(&kb.id, "b.md", 0, vec![1.0, 0.0, 0.0])],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KbError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        assert_eq!(store.count_vectors(&Scope::All).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sole_document_may_change_dimensions() {
        let store = InMemoryStore::new();
        let kb = store.create_knowledge_base("kb").await.unwrap();
        let doc = summary(&kb.id, "a.md");
        store
            .replace_document(&doc, &[record(&kb.id, "a.md", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .replace_document(&doc, &[record(&kb.id, "a.md", 0, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(store.dimensions().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_nearest_respects_scope_and_predicate() {
        let store = InMemoryStore::new();
        let a = store.create_knowledge_base("a").await.unwrap();
        let b = store.create_knowledge_base("b").await.unwrap();
        store
            .replace_document(&summary(&a.id, "x.md"), &[record(&a.id, "x.md", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .replace_document(&summary(&b.id, "y.md"), &[record(&b.id, "y.md", 0, vec![1.0, 0.1])])
            .await
            .unwrap();

        let all = store.nearest(&[1.0, 0.0], 10, &Scope::All, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].chunk.document_path, "x.md");

        let only_b = store
            .nearest(&[1.0, 0.0], 10, &Scope::Only(vec![b.id.clone()]), None)
            .await
            .unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].chunk.document_path, "y.md");

        let filtered = store
            .nearest(
                &[1.0, 0.0],
                10,
                &Scope::All,
                Some(&Predicate::PathPrefix("y".to_string())),
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_knowledge_base_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .replace_document(&summary("missing", "a.md"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::KnowledgeBaseNotFound(_)));
    }
}
