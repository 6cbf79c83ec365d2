//! Storage abstraction for Knowledge Harness.
//!
//! The [`VectorStore`] trait is the persistent vector index capability the
//! retrieval engine runs on: knowledge base lifecycle, atomic per-document
//! replacement, and nearest-neighbour search with metadata predicates.
//!
//! Implementations must be `Send + Sync` and must never expose a document
//! in a half-replaced state: a reader sees either the old chunk set for a
//! path or the new one.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Chunk, DocumentSummary, KnowledgeBase, VectorRecord};

/// Chunk metadata field usable in a [`Predicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    DocType,
    Extension,
    Language,
    Path,
}

impl Field {
    /// The value of this field on a chunk.
    pub fn value_of<'a>(&self, chunk: &'a Chunk) -> Option<&'a str> {
        match self {
            Field::DocType => Some(&chunk.metadata.doc_type),
            Field::Extension => Some(&chunk.metadata.extension),
            Field::Language => chunk.metadata.language.as_deref(),
            Field::Path => Some(&chunk.document_path),
        }
    }
}

/// Metadata filter applied during vector search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Eq(Field, String),
    In(Field, Vec<String>),
    /// Document path starts with the prefix.
    PathPrefix(String),
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, chunk: &Chunk) -> bool {
        match self {
            Predicate::Eq(field, value) => field.value_of(chunk) == Some(value.as_str()),
            Predicate::In(field, values) => field
                .value_of(chunk)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            Predicate::PathPrefix(prefix) => chunk.document_path.starts_with(prefix.as_str()),
            Predicate::And(all) => all.iter().all(|p| p.matches(chunk)),
        }
    }

    /// Combine optional predicates into one conjunction.
    pub fn all(predicates: Vec<Predicate>) -> Option<Predicate> {
        match predicates.len() {
            0 => None,
            1 => predicates.into_iter().next(),
            _ => Some(Predicate::And(predicates)),
        }
    }
}

/// Which knowledge bases a query or count covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    /// Knowledge base ids.
    Only(Vec<String>),
}

impl Scope {
    pub fn includes(&self, knowledge_base_id: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::Only(ids) => ids.iter().any(|id| id == knowledge_base_id),
        }
    }
}

/// A nearest-neighbour hit in the store's native metric.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub chunk: Chunk,
    /// Cosine distance in `[0, 2]`; smaller is closer.
    pub distance: f32,
}

/// A knowledge base with its current sizes.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBaseInfo {
    #[serde(flatten)]
    pub knowledge_base: KnowledgeBase,
    pub documents: u64,
    pub chunks: u64,
}

/// Whole-store counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub knowledge_bases: u64,
    pub documents: u64,
    pub chunks: u64,
    pub vectors: u64,
    pub dimensions: Option<usize>,
    /// Documents per declared type (file extension).
    pub documents_by_type: BTreeMap<String, u64>,
}

/// Persistent vector index backing the retrieval engine.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_knowledge_base`](VectorStore::create_knowledge_base) | Create a named partition |
/// | [`delete_knowledge_base`](VectorStore::delete_knowledge_base) | Drop a partition and everything in it |
/// | [`replace_document`](VectorStore::replace_document) | Atomically swap one path's chunks and vectors |
/// | [`remove_document`](VectorStore::remove_document) | Delete one path |
/// | [`nearest`](VectorStore::nearest) | Cosine nearest-neighbour search |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a knowledge base. Fails with `KnowledgeBaseExists` on a
    /// duplicate name.
    async fn create_knowledge_base(&self, name: &str) -> Result<KnowledgeBase>;

    async fn get_knowledge_base(&self, name: &str) -> Result<Option<KnowledgeBase>>;

    async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBaseInfo>>;

    /// Delete a knowledge base and cascade to its documents, chunks and
    /// vectors. Returns whether it existed.
    async fn delete_knowledge_base(&self, name: &str) -> Result<bool>;

    /// Replace everything stored for `document.path` in its knowledge base
    /// with `records`, as one atomic step.
    ///
    /// Fails with `DimensionMismatch` if the vectors disagree with the
    /// dimensionality already held by the store.
    async fn replace_document(
        &self,
        document: &DocumentSummary,
        records: &[VectorRecord],
    ) -> Result<()>;

    /// Delete one document and its chunks. Returns whether it existed.
    async fn remove_document(&self, knowledge_base_id: &str, path: &str) -> Result<bool>;

    /// Stored metadata for one document.
    async fn get_document(
        &self,
        knowledge_base_id: &str,
        path: &str,
    ) -> Result<Option<DocumentSummary>>;

    async fn list_documents(&self, knowledge_base_id: &str) -> Result<Vec<DocumentSummary>>;

    /// Dimensionality shared by every stored vector, or `None` when empty.
    async fn dimensions(&self) -> Result<Option<usize>>;

    async fn count_vectors(&self, scope: &Scope) -> Result<u64>;

    /// Up to `k` nearest chunks to `query` within `scope` that satisfy
    /// `predicate`, closest first.
    async fn nearest(
        &self,
        query: &[f32],
        k: usize,
        scope: &Scope,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<Neighbor>>;

    async fn stats(&self) -> Result<StoreStats>;
}
