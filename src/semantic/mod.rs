//! Semantic search module
//!
//! Chunked embedding index over a file tree: chunking, embedding backends,
//! the persisted index, the builder that fills it and the retrieval engine
//! that queries it.

pub mod builder;
pub mod chunking;
pub mod embeddings;
pub mod engine;
pub mod index_store;
pub mod location;
#[cfg(feature = "ml-models")]
pub mod model_download;
#[cfg(feature = "ml-models")]
pub mod onnx;

pub use builder::{BuildOutcome, BuildStats, IndexBuilder};
pub use chunking::{Chunker, TextChunk, DEFAULT_CHUNK_SIZE};
pub use embeddings::{
    cosine_similarity, create_embedder, EmbeddingGateway, HashEmbedder, LazyEmbedder,
};
pub use engine::{
    FileContext, GrepResult, GrepSnippet, NeighborHit, RelevantChunk, RetrievalEngine,
    SearchAndReadResult, SearchHit,
};
pub use index_store::{IndexData, IndexStatus, IndexStore};
pub use location::{locate_chunk, locate_span, ChunkLocation};
#[cfg(feature = "ml-models")]
pub use model_download::{default_cache_dir, ModelDownloader, ModelInfo};
#[cfg(feature = "ml-models")]
pub use onnx::OnnxEmbedder;
