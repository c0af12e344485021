//! Embedding backend seam and a TTL-bounded query cache.
//!
//! The store never computes embeddings itself; callers hand it vectors
//! produced by an [`Embedder`]. [`CachedEmbedder`] wraps any embedder and
//! memoizes results keyed by the SHA-256 of the text.

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::debug;

/// Error type for embedding operations.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding backend error: {0}")]
    Backend(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

/// Trait for computing text embeddings.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Compute embedding vectors for a batch of texts, in input order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Compute embedding for a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let results = self.embed(&[text]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Parse("Empty embedding response".to_string()))
    }

    /// Return the dimensionality of embeddings produced by this embedder.
    fn dimensions(&self) -> usize;
}

struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: Instant,
}

/// Memoizing wrapper around an [`Embedder`].
///
/// Expired entries are evicted lazily on access. When full, expired entries
/// are purged first, then the oldest entry is dropped. A zero TTL disables
/// caching.
pub struct CachedEmbedder<E> {
    inner: E,
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E, ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner,
            entries: DashMap::new(),
            ttl,
            max_entries,
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Number of cached vectors, including possibly expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn caching(&self) -> bool {
        !self.ttl.is_zero() && self.max_entries > 0
    }

    fn get(&self, key: &str) -> Option<Vec<f32>> {
        if !self.caching() {
            return None;
        }
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(key);
            None
        } else {
            Some(entry.vector.clone())
        }
    }

    fn put(&self, key: String, vector: Vec<f32>) {
        if !self.caching() {
            return;
        }
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_expired();
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                vector,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove all expired entries.
    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().inserted_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

/// Cache key: SHA-256 hex of the text.
pub fn cache_key(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[async_trait]
impl<E: Embedder> Embedder for CachedEmbedder<E> {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let keys: Vec<String> = texts.iter().map(|t| cache_key(t)).collect();
        let mut out: Vec<Option<Vec<f32>>> = keys.iter().map(|k| self.get(k)).collect();

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        if !missing.is_empty() {
            let batch: Vec<&str> = missing.iter().map(|&i| texts[i]).collect();
            let computed = self.inner.embed(&batch).await?;
            if computed.len() != batch.len() {
                return Err(EmbeddingError::Parse(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    computed.len()
                )));
            }
            for (&i, vector) in missing.iter().zip(computed) {
                self.put(keys[i].clone(), vector.clone());
                out[i] = Some(vector);
            }
        }
        debug!(
            total = texts.len(),
            computed = missing.len(),
            "Embedding batch served"
        );

        out.into_iter()
            .map(|v| v.ok_or_else(|| EmbeddingError::Parse("missing embedding".into())))
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Deterministic embedder that counts how many texts it was asked for.
    #[derive(Clone)]
    pub(crate) struct CountingEmbedder {
        pub calls: Arc<AtomicUsize>,
        pub dims: usize,
    }

    impl CountingEmbedder {
        pub(crate) fn new(dims: usize) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                dims,
            }
        }

        pub(crate) fn computed(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dims];
                    if let Some(first) = v.first_mut() {
                        *first = t.len() as f32;
                    }
                    v
                })
                .collect())
        }

        fn dimensions(&self) -> usize {
            self.dims
        }
    }

    #[tokio::test]
    async fn test_repeated_text_is_served_from_cache() {
        let inner = CountingEmbedder::new(3);
        let cached = CachedEmbedder::new(inner.clone(), Duration::from_secs(60), 100);

        let first = cached.embed_one("borrow checker").await.unwrap();
        let second = cached.embed_one("borrow checker").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.computed(), 1);
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_only_computes_misses_and_keeps_order() {
        let inner = CountingEmbedder::new(2);
        let cached = CachedEmbedder::new(inner.clone(), Duration::from_secs(60), 100);
        cached.embed_one("bb").await.unwrap();

        let out = cached.embed(&["a", "bb", "cccc"]).await.unwrap();
        assert_eq!(inner.computed(), 3);
        let firsts: Vec<f32> = out.iter().map(|v| v[0]).collect();
        assert_eq!(firsts, vec![1.0, 2.0, 4.0]);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let inner = CountingEmbedder::new(2);
        let cached = CachedEmbedder::new(inner.clone(), Duration::ZERO, 100);
        cached.embed_one("x").await.unwrap();
        cached.embed_one("x").await.unwrap();
        assert_eq!(inner.computed(), 2);
        assert!(cached.is_empty());
    }

    #[tokio::test]
    async fn test_size_bound_evicts_oldest() {
        let inner = CountingEmbedder::new(2);
        let cached = CachedEmbedder::new(inner.clone(), Duration::from_secs(60), 2);
        for text in ["one", "two", "three"] {
            cached.embed_one(text).await.unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(cached.len(), 2);

        cached.embed_one("three").await.unwrap();
        assert_eq!(inner.computed(), 3);
        cached.embed_one("one").await.unwrap();
        assert_eq!(inner.computed(), 4);
    }

    #[test]
    fn test_cache_key_is_sha256_hex() {
        let key = cache_key("abc");
        assert_eq!(key.len(), 64);
        assert_eq!(
            key,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
