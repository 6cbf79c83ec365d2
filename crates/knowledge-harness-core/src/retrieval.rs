//! Retrieval engine: indexing chunk embeddings and answering similarity
//! queries.
//!
//! The engine runs entirely through the [`VectorStore`] and
//! [`EmbeddingProvider`] traits. It owns the rules that sit between them:
//! batch embedding, dimensionality checks, scope resolution by knowledge
//! base name, and turning raw neighbours into a ranked result.
//!
//! # Query algorithm
//!
//! 1. Resolve knowledge base names to a [`Scope`] (unknown name → error).
//! 2. Return nothing if the scope holds no vectors (before embedding).
//! 3. Embed the query and compare its length with the stored vectors.
//! 4. Fetch `top_k × candidate_multiplier` neighbours under the predicate.
//! 5. Convert cosine distance to similarity: `clamp(1 − d, 0, 1)`.
//! 6. Deduplicate by chunk text hash, keeping the best score.
//! 7. Sort by score (desc), ordinal (asc), path (asc); truncate to `top_k`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::{KbError, Result};
use crate::models::{Chunk, DocumentSummary, KnowledgeBase, ScoredChunk, VectorRecord};
use crate::store::{Predicate, Scope, VectorStore};

/// Retrieval tuning, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalParams {
    /// Results returned when a query does not ask for a count.
    pub top_k: usize,
    /// Upper clamp for a requested `top_k`.
    pub max_top_k: usize,
    /// Neighbours fetched per requested result, before deduplication.
    pub candidate_multiplier: usize,
    /// Texts per embedding call.
    pub batch_size: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 10,
            max_top_k: 50,
            candidate_multiplier: 3,
            batch_size: 100,
        }
    }
}

/// One similarity query.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub text: String,
    pub top_k: Option<usize>,
    pub predicate: Option<Predicate>,
    /// Knowledge base names; empty means all knowledge bases.
    pub knowledge_bases: Vec<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Indexes embedded chunks and answers queries over a [`VectorStore`].
#[derive(Clone)]
pub struct RetrievalEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: RetrievalParams,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            store,
            embedder,
            params,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Look up a knowledge base by name.
    pub async fn knowledge_base(&self, name: &str) -> Result<KnowledgeBase> {
        self.store
            .get_knowledge_base(name)
            .await?
            .ok_or_else(|| KbError::KnowledgeBaseNotFound(name.to_string()))
    }

    /// Look up a knowledge base by name, creating it if missing.
    pub async fn ensure_knowledge_base(&self, name: &str) -> Result<KnowledgeBase> {
        if let Some(kb) = self.store.get_knowledge_base(name).await? {
            return Ok(kb);
        }
        match self.store.create_knowledge_base(name).await {
            // Created by a concurrent caller in between.
            Err(KbError::KnowledgeBaseExists(_)) => self
                .store
                .get_knowledge_base(name)
                .await?
                .ok_or_else(|| KbError::KnowledgeBaseNotFound(name.to_string())),
            other => other,
        }
    }

    /// Embed chunk texts in batches of `batch_size`, preserving order.
    ///
    /// Vectors are checked against the provider's declared dimensionality.
    pub async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.params.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            vectors.extend(self.embed_batch(&texts).await?);
        }
        Ok(vectors)
    }

    /// Embed one batch of texts.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.embedder.embed(texts).await?;
        if vectors.len() != texts.len() {
            return Err(KbError::EmbeddingBackend(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        let expected = self.embedder.dims();
        if let Some(v) = vectors.iter().find(|v| v.len() != expected) {
            return Err(KbError::DimensionMismatch {
                expected,
                actual: v.len(),
            });
        }
        Ok(vectors)
    }

    /// Store a document's chunks and their embeddings, replacing whatever
    /// was stored for the same path.
    ///
    /// Returns the number of chunks written.
    pub async fn index(
        &self,
        document: &DocumentSummary,
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<usize> {
        if chunks.len() != embeddings.len() {
            return Err(KbError::InvalidInput(format!(
                "{} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }
        if let Some(chunk) = chunks
            .iter()
            .find(|c| c.document_path != document.path)
        {
            return Err(KbError::InvalidInput(format!(
                "chunk {} belongs to {}, not {}",
                chunk.id, chunk.document_path, document.path
            )));
        }
        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorRecord { chunk, embedding })
            .collect();
        self.store.replace_document(document, &records).await?;
        Ok(records.len())
    }

    /// Embed and store one document's chunks.
    pub async fn index_chunks(&self, document: &DocumentSummary, chunks: Vec<Chunk>) -> Result<usize> {
        let embeddings = self.embed_chunks(&chunks).await?;
        self.index(document, chunks, embeddings).await
    }

    /// Delete one document from a knowledge base.
    pub async fn remove(&self, knowledge_base_id: &str, path: &str) -> Result<bool> {
        self.store.remove_document(knowledge_base_id, path).await
    }

    /// Resolve knowledge base names to a scope. No names means every
    /// knowledge base.
    pub async fn resolve_scope(&self, names: &[String]) -> Result<Scope> {
        if names.is_empty() {
            return Ok(Scope::All);
        }
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(self.knowledge_base(name).await?.id);
        }
        Ok(Scope::Only(ids))
    }

    /// Clamp a requested result count to `[1, max_top_k]`.
    pub fn effective_top_k(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.params.top_k)
            .clamp(1, self.params.max_top_k.max(1))
    }

    /// Run a similarity query.
    ///
    /// An empty or never-indexed scope yields an empty result. A query
    /// vector whose length differs from the stored vectors is
    /// [`KbError::DimensionMismatch`].
    pub async fn query(&self, query: &Query) -> Result<Vec<ScoredChunk>> {
        if query.text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let scope = self.resolve_scope(&query.knowledge_bases).await?;
        if self.store.count_vectors(&scope).await? == 0 {
            return Ok(Vec::new());
        }

        let top_k = self.effective_top_k(query.top_k);
        let mut vectors = self.embedder.embed(std::slice::from_ref(&query.text)).await?;
        let query_vec = vectors
            .pop()
            .ok_or_else(|| KbError::EmbeddingBackend("no vector returned for query".to_string()))?;

        if let Some(stored) = self.store.dimensions().await? {
            if stored != query_vec.len() {
                return Err(KbError::DimensionMismatch {
                    expected: stored,
                    actual: query_vec.len(),
                });
            }
        }

        let candidates = top_k * self.params.candidate_multiplier.max(1);
        let neighbors = self
            .store
            .nearest(&query_vec, candidates, &scope, query.predicate.as_ref())
            .await?;

        let mut best: HashMap<String, ScoredChunk> = HashMap::new();
        for n in neighbors {
            let score = (1.0 - f64::from(n.distance)).clamp(0.0, 1.0);
            let candidate = ScoredChunk {
                chunk: n.chunk,
                score,
            };
            match best.get(&candidate.chunk.hash) {
                Some(existing) if rank(existing, &candidate) != Ordering::Greater => {}
                _ => {
                    best.insert(candidate.chunk.hash.clone(), candidate);
                }
            }
        }

        let mut results: Vec<ScoredChunk> = best.into_values().collect();
        results.sort_by(rank);
        results.truncate(top_k);
        Ok(results)
    }
}

/// Result order: score desc, then ordinal asc, then path asc.
fn rank(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
        .then_with(|| a.chunk.document_path.cmp(&b.chunk.document_path))
}
