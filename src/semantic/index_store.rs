//! Persistent embedding index
//!
//! The index is three parallel sequences sharing one position `i`: chunk
//! text, chunk vector and chunk provenance. On disk it is a single JSON
//! object:
//!
//! ```json
//! {
//!   "chunks": ["..."],
//!   "embeddings": [[0.1, ...]],
//!   "metadata": {
//!     "chunk_count": 1, "chunk_size": 500, "model": "...", "embedding_dim": 384,
//!     "file_metadata": [{"file": "a.md", "start_pos": 0, "end_pos": 500}]
//!   }
//! }
//! ```
//!
//! Writes take an exclusive file lock, reads a shared one. The loaded index
//! is cached behind a read-write lock and shared read-only across callers.

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use super::chunking::TextChunk;

/// Per-chunk provenance as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkProvenance {
    pub file: String,
    pub start_pos: usize,
    pub end_pos: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub chunk_count: usize,
    pub chunk_size: usize,
    pub model: String,
    pub embedding_dim: usize,
    pub file_metadata: Vec<ChunkProvenance>,
}

/// On-disk representation
#[derive(Debug, Serialize, Deserialize)]
struct PersistedEmbeddings {
    chunks: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    metadata: IndexMetadata,
}

/// Loaded, aligned index contents
#[derive(Debug, Clone, Default)]
pub struct IndexData {
    pub chunks: Vec<TextChunk>,
    pub embeddings: Vec<Vec<f32>>,
    pub chunk_size: usize,
    pub model: String,
    pub embedding_dim: usize,
}

impl IndexData {
    /// Assemble index contents, checking that chunks and vectors line up.
    pub fn new(
        chunks: Vec<TextChunk>,
        embeddings: Vec<Vec<f32>>,
        chunk_size: usize,
        model: impl Into<String>,
    ) -> Result<Self> {
        if chunks.len() != embeddings.len() {
            anyhow::bail!(
                "Index misaligned: {} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            );
        }
        let embedding_dim = embeddings.first().map(|v| v.len()).unwrap_or(0);
        if let Some(pos) = embeddings.iter().position(|v| v.len() != embedding_dim) {
            anyhow::bail!(
                "Embedding {} has dimension {}, expected {}",
                pos,
                embeddings[pos].len(),
                embedding_dim
            );
        }

        Ok(Self {
            chunks,
            embeddings,
            chunk_size,
            model: model.into(),
            embedding_dim,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Positions of every chunk cut from `file`, in index order.
    pub fn chunk_indices_for(&self, file: &str) -> Vec<usize> {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.source_file == file)
            .map(|(i, _)| i)
            .collect()
    }

    fn to_persisted(&self) -> PersistedEmbeddings {
        PersistedEmbeddings {
            chunks: self.chunks.iter().map(|c| c.text.clone()).collect(),
            embeddings: self.embeddings.clone(),
            metadata: IndexMetadata {
                chunk_count: self.chunks.len(),
                chunk_size: self.chunk_size,
                model: self.model.clone(),
                embedding_dim: self.embedding_dim,
                file_metadata: self
                    .chunks
                    .iter()
                    .map(|c| ChunkProvenance {
                        file: c.source_file.clone(),
                        start_pos: c.start_offset,
                        end_pos: c.end_offset,
                    })
                    .collect(),
            },
        }
    }

    fn from_persisted(persisted: PersistedEmbeddings) -> Result<Self> {
        let PersistedEmbeddings {
            chunks,
            embeddings,
            metadata,
        } = persisted;

        if chunks.len() != metadata.file_metadata.len() {
            anyhow::bail!(
                "Index misaligned: {} chunks but {} provenance records",
                chunks.len(),
                metadata.file_metadata.len()
            );
        }

        let chunks = chunks
            .into_iter()
            .zip(metadata.file_metadata)
            .map(|(text, prov)| TextChunk {
                text,
                source_file: prov.file,
                start_offset: prov.start_pos,
                end_offset: prov.end_pos,
            })
            .collect();

        Self::new(chunks, embeddings, metadata.chunk_size, metadata.model)
    }
}

/// Summary of what is on disk, for metadata reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IndexStatus {
    Missing,
    Empty,
    Ready {
        chunk_count: usize,
        chunk_size: usize,
        model: String,
        embedding_dim: usize,
    },
}

impl IndexStatus {
    pub fn has_embeddings(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Index file handle with lazy, cached loading
pub struct IndexStore {
    path: PathBuf,
    cache: RwLock<Option<Arc<IndexData>>>,
}

impl IndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Get the index, reading it from disk on first call.
    ///
    /// A missing file loads as an empty index.
    pub fn load(&self) -> Result<Arc<IndexData>> {
        {
            let cache = self
                .cache
                .read()
                .map_err(|_| anyhow::anyhow!("Index cache lock poisoned"))?;
            if let Some(data) = cache.as_ref() {
                return Ok(Arc::clone(data));
            }
        }

        let mut cache = self
            .cache
            .write()
            .map_err(|_| anyhow::anyhow!("Index cache lock poisoned"))?;
        if let Some(data) = cache.as_ref() {
            return Ok(Arc::clone(data));
        }

        let data = Arc::new(self.read_from_disk()?);
        *cache = Some(Arc::clone(&data));
        Ok(data)
    }

    /// Drop the cached copy so the next `load` re-reads the file.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.write() {
            *cache = None;
        }
    }

    /// Persist `data`, overwriting any previous index, and cache it.
    pub fn replace(&self, data: IndexData) -> Result<Arc<IndexData>> {
        self.save(&data)?;
        let data = Arc::new(data);
        let mut cache = self
            .cache
            .write()
            .map_err(|_| anyhow::anyhow!("Index cache lock poisoned"))?;
        *cache = Some(Arc::clone(&data));
        Ok(data)
    }

    /// Describe the index on disk, loading it if needed.
    pub fn status(&self) -> Result<IndexStatus> {
        if !self.exists() {
            return Ok(IndexStatus::Missing);
        }
        let data = self.load()?;
        if data.is_empty() {
            return Ok(IndexStatus::Empty);
        }
        Ok(IndexStatus::Ready {
            chunk_count: data.len(),
            chunk_size: data.chunk_size,
            model: data.model.clone(),
            embedding_dim: data.embedding_dim,
        })
    }

    fn read_from_disk(&self) -> Result<IndexData> {
        if !self.exists() {
            debug!(path = %self.path.display(), "No index file, using empty index");
            return Ok(IndexData::default());
        }

        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("Failed to open index file: {}", self.path.display()))?;
        file.lock_shared().with_context(|| {
            format!("Failed to acquire shared lock on: {}", self.path.display())
        })?;

        let mut raw = String::new();
        std::io::BufReader::new(&file)
            .read_to_string(&mut raw)
            .with_context(|| format!("Failed to read index file: {}", self.path.display()))?;
        if raw.trim().is_empty() {
            debug!(path = %self.path.display(), "Index file is empty, using empty index");
            return Ok(IndexData::default());
        }

        let persisted: PersistedEmbeddings = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse index file: {}", self.path.display()))?;

        let data = IndexData::from_persisted(persisted)
            .with_context(|| format!("Corrupt index file: {}", self.path.display()))?;

        info!(
            path = %self.path.display(),
            chunks = data.len(),
            model = %data.model,
            "Loaded embedding index"
        );
        Ok(data)
    }

    fn save(&self, data: &IndexData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create index directory: {}", parent.display())
            })?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let file = std::fs::File::create(&tmp_path).with_context(|| {
                format!("Failed to create index file: {}", tmp_path.display())
            })?;
            file.lock_exclusive().with_context(|| {
                format!("Failed to acquire exclusive lock on: {}", tmp_path.display())
            })?;

            let mut writer = std::io::BufWriter::new(&file);
            serde_json::to_writer(&mut writer, &data.to_persisted())
                .with_context(|| format!("Failed to serialize index: {}", tmp_path.display()))?;
            writer
                .flush()
                .with_context(|| format!("Failed to write index: {}", tmp_path.display()))?;
        }

        std::fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "Failed to move {} into place at {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;

        info!(
            path = %self.path.display(),
            chunks = data.len(),
            "Saved embedding index"
        );
        Ok(())
    }
}
