//! Embedding gateway for semantic search
//!
//! The gateway is a capability interface: any backend that can embed a batch
//! of documents, embed a single query and score a query vector against a
//! matrix of vectors can drive the index. Document and query embeddings come
//! from separate entry points because many models apply different prompt
//! templates to each.
//!
//! Two backends ship with the crate:
//! - [`HashEmbedder`], a deterministic feature-hashing model with no external
//!   dependencies, useful for tests and offline use
//! - `OnnxEmbedder` (feature `ml-models`), a transformer model run through
//!   ONNX Runtime

use anyhow::{Context, Result};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, OnceLock};
use tracing::info;

use crate::config::{EmbeddingBackend, EmbeddingConfig};

/// Text to vector capability consumed by the index builder and retrieval engine.
pub trait EmbeddingGateway: Send + Sync {
    /// Informational model name, recorded in index metadata.
    fn model_id(&self) -> &str;

    /// Embed documents in order. Output `i` belongs to input `i`.
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a natural-language query.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Score `query` against every row of `matrix`.
    fn similarity(&self, query: &[f32], matrix: &[Vec<f32>]) -> Vec<f32> {
        matrix
            .iter()
            .map(|row| cosine_similarity(query, row))
            .collect()
    }
}

/// Compute cosine similarity between two vectors
///
/// Mismatched lengths and zero vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

/// Feature-hashing embedding model
///
/// Lowercased alphanumeric tokens (plus adjacent-token bigrams) are hashed
/// into a fixed number of buckets with a sign bit, then L2-normalized. The
/// result is deterministic across runs and platforms, which makes it the
/// backend of choice for tests.
pub struct HashEmbedder {
    model_id: String,
    dimension: usize,
}

impl HashEmbedder {
    pub const MODEL_ID: &'static str = "hash-embedder";

    pub fn new(dimension: usize) -> Self {
        Self {
            model_id: format!("{}-d{}", Self::MODEL_ID, dimension.max(1)),
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let mut hasher = FxHasher::default();
        feature.hash(&mut hasher);
        let h = hasher.finish();
        let idx = (h % self.dimension as u64) as usize;
        let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
        (idx, sign)
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0f32; self.dimension];

        for token in &tokens {
            let (idx, sign) = self.bucket(token);
            embedding[idx] += sign;
        }
        for pair in tokens.windows(2) {
            let (idx, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            embedding[idx] += 0.5 * sign;
        }

        l2_normalize(&mut embedding);
        embedding
    }
}

impl EmbeddingGateway for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.encode(t)).collect())
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.encode(text))
    }
}

type GatewayFactory = Box<dyn Fn() -> Result<Box<dyn EmbeddingGateway>> + Send + Sync>;

/// Gateway that loads its backend on first use and keeps it for its lifetime
///
/// Loading happens at most once: concurrent first callers serialize on an
/// init mutex and re-check the slot, so every caller observes the same model
/// instance. A failed load is returned to the caller and retried on the next
/// call.
pub struct LazyEmbedder {
    model_id: String,
    factory: GatewayFactory,
    slot: OnceLock<Box<dyn EmbeddingGateway>>,
    init_lock: Mutex<()>,
}

impl LazyEmbedder {
    pub fn new<F>(model_id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn EmbeddingGateway>> + Send + Sync + 'static,
    {
        Self {
            model_id: model_id.into(),
            factory: Box::new(factory),
            slot: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// Build a lazy gateway for the configured backend.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let config = config.clone();
        let model_id = match config.backend {
            EmbeddingBackend::Hash => HashEmbedder::new(config.dimension).model_id().to_string(),
            EmbeddingBackend::Onnx => config.model.clone(),
        };
        Self::new(model_id, move || create_embedder(&config))
    }

    /// Whether the backend has been loaded yet.
    pub fn is_loaded(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Get the loaded backend, loading it if this is the first call.
    pub fn get(&self) -> Result<&dyn EmbeddingGateway> {
        if let Some(model) = self.slot.get() {
            return Ok(model.as_ref());
        }

        let _guard = self
            .init_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Embedding model init lock poisoned"))?;

        if self.slot.get().is_none() {
            info!(model = %self.model_id, "Loading embedding model");
            let model = (self.factory)()
                .with_context(|| format!("Failed to load embedding model '{}'", self.model_id))?;
            let _ = self.slot.set(model);
            info!(model = %self.model_id, "Embedding model ready");
        }

        self.slot
            .get()
            .map(|model| model.as_ref())
            .context("Embedding model slot empty after initialization")
    }
}

impl EmbeddingGateway for LazyEmbedder {
    fn model_id(&self) -> &str {
        match self.slot.get() {
            Some(model) => model.model_id(),
            None => &self.model_id,
        }
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.get()?.embed_documents(texts)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.get()?.embed_query(text)
    }

    fn similarity(&self, query: &[f32], matrix: &[Vec<f32>]) -> Vec<f32> {
        match self.slot.get() {
            Some(model) => model.similarity(query, matrix),
            None => matrix
                .iter()
                .map(|row| cosine_similarity(query, row))
                .collect(),
        }
    }
}

/// Construct the configured backend eagerly.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingGateway>> {
    match config.backend {
        EmbeddingBackend::Hash => Ok(Box::new(HashEmbedder::new(config.dimension))),
        #[cfg(feature = "ml-models")]
        EmbeddingBackend::Onnx => Ok(Box::new(super::onnx::OnnxEmbedder::from_config(config)?)),
        #[cfg(not(feature = "ml-models"))]
        EmbeddingBackend::Onnx => anyhow::bail!(
            "Embedding backend 'onnx' requires building with the 'ml-models' feature"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_hash_embedder_is_normalized_and_deterministic() {
        let model = HashEmbedder::new(128);
        let first = model.embed_query("authenticate user login").unwrap();
        let second = model.embed_query("authenticate user login").unwrap();

        assert_eq!(first.len(), 128);
        assert_eq!(first, second);
        let norm: f32 = first.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_hash_embedder_similar_texts_score_higher() {
        let model = HashEmbedder::new(256);
        let docs = model
            .embed_documents(&[
                "user authentication and login handling".to_string(),
                "database connection pool sizing".to_string(),
            ])
            .unwrap();
        let query = model.embed_query("login authentication").unwrap();

        let scores = model.similarity(&query, &docs);
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_hash_embedder_empty_text_is_zero_vector() {
        let model = HashEmbedder::new(16);
        let v = model.embed_query("   ").unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_lazy_embedder_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let lazy = LazyEmbedder::new("counting", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(HashEmbedder::new(32)) as Box<dyn EmbeddingGateway>)
        });

        assert!(!lazy.is_loaded());
        assert_eq!(lazy.model_id(), "counting");

        lazy.embed_query("first").unwrap();
        lazy.embed_documents(&["second".to_string()]).unwrap();
        lazy.embed_query("third").unwrap();

        assert!(lazy.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(lazy.model_id(), "hash-embedder-d32");
    }

    #[test]
    fn test_lazy_embedder_concurrent_first_use_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let lazy = Arc::new(LazyEmbedder::new("counting", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Box::new(HashEmbedder::new(8)) as Box<dyn EmbeddingGateway>)
        }));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lazy = Arc::clone(&lazy);
                std::thread::spawn(move || lazy.embed_query("hello").unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lazy_embedder_propagates_load_failure() {
        let lazy = LazyEmbedder::new("broken", || anyhow::bail!("weights not found"));
        let err = lazy.embed_query("anything").unwrap_err();
        assert!(format!("{:#}", err).contains("weights not found"));
        assert!(!lazy.is_loaded());
    }
}
