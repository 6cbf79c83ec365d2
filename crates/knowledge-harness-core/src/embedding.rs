//! Embedding capability trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that every embedding backend
//! implements, the offline [`HashEmbedder`], and pure helpers for vector
//! serialization and similarity.
//!
//! Network-backed providers (OpenAI-compatible, Ollama, fastembed) live in
//! the `knowledge-harness` app crate.

use async_trait::async_trait;

use crate::error::{KbError, Result};

/// An embedding backend.
///
/// Every call against one configured model returns vectors of the same
/// length, [`dims`](EmbeddingProvider::dims).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001B3;

/// Deterministic feature-hashing embedder.
///
/// Lowercased character 3- and 4-grams are hashed with FNV-1a into signed
/// buckets and the result is L2-normalised. Needs no model and no network,
/// which makes it the provider for offline use and tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    name: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(KbError::InvalidInput(
                "hash embedder dimension must be > 0".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            name: format!("fnv1a-hash-{}", dimension),
        })
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        for n in 3..=4 {
            if n > chars.len() {
                continue;
            }
            for window in chars.windows(n) {
                let ngram: String = window.iter().collect();
                let h = fnv1a(ngram.as_bytes());
                let bucket = (h % self.dimension as u64) as usize;
                let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
                vector[bucket] += sign;
            }
        }
        l2_normalize(&mut vector);
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use knowledge_harness_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, zero
/// vectors, or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance, `1 - cosine_similarity`, in `[0.0, 2.0]`.
///
/// This is the native metric of both bundled stores.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
        assert!((cosine_distance(&a, &b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_hash_embedder_shape() {
        let emb = HashEmbedder::new(64).unwrap();
        let v = emb.embed_one("hello world");
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
        assert_eq!(emb.embed_one("hello world"), v);
        assert!(emb.embed_one("").iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_hash_embedder_similarity_tracks_overlap() {
        let emb = HashEmbedder::new(256).unwrap();
        let q = emb.embed_one("deployment checklist");
        let near = emb.embed_one("the deployment checklist for friday");
        let far = emb.embed_one("banana bread recipe");
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[test]
    fn test_hash_embedder_rejects_zero_dims() {
        assert!(HashEmbedder::new(0).is_err());
    }

    #[tokio::test]
    async fn test_hash_embedder_batch() {
        let emb = HashEmbedder::new(32).unwrap();
        let out = emb
            .embed(&["a b c".to_string(), "d e f".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(emb.dims(), 32);
        assert_eq!(emb.model_name(), "fnv1a-hash-32");
    }
}
