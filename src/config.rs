//! Configuration management for docpack_search
//!
//! Supports loading configuration from TOML files with environment and CLI
//! overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::semantic::chunking::DEFAULT_CHUNK_SIZE;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

/// Index build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Chunk width in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Glob patterns, relative to `files/`, that are never indexed
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Maximum file size to index in bytes (default 10MB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Detect and transcode non-UTF-8 text (Latin-1, Shift-JIS, UTF-16...).
    /// When disabled, undecodable bytes are dropped.
    #[serde(default = "default_true")]
    pub transcode_non_utf8: bool,

    /// Index file name inside the docpack's `index/` directory
    #[serde(default = "default_index_file")]
    pub index_file: String,
}

/// Which embedding backend to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Deterministic feature hashing, no model files needed
    #[default]
    Hash,
    /// Transformer model on ONNX Runtime (requires the `ml-models` feature)
    Onnx,
}

impl FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hash" => Ok(Self::Hash),
            "onnx" => Ok(Self::Onnx),
            other => anyhow::bail!("Unknown embedding backend '{}' (expected 'hash' or 'onnx')", other),
        }
    }
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackend,

    /// Model name for the ONNX backend
    #[serde(default = "default_model")]
    pub model: String,

    /// Vector width for the hash backend
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Model cache directory (default: platform cache dir)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Override the model's query prompt prefix
    #[serde(default)]
    pub query_prefix: Option<String>,

    /// Override the model's document prompt prefix
    #[serde(default)]
    pub document_prefix: Option<String>,
}

/// Query defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Lines of context around grep snippets
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/.venv/**".to_string(),
    ]
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_true() -> bool {
    true
}

fn default_index_file() -> String {
    "embeddings.json".to_string()
}

fn default_model() -> String {
    "BAAI/bge-small-en-v1.5".to_string()
}

fn default_dimension() -> usize {
    384
}

fn default_top_k() -> usize {
    5
}

fn default_context_lines() -> usize {
    3
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            exclude_patterns: default_exclude_patterns(),
            max_file_size: default_max_file_size(),
            transcode_non_utf8: true,
            index_file: default_index_file(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            model: default_model(),
            dimension: default_dimension(),
            cache_dir: None,
            query_prefix: None,
            document_prefix: None,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_lines: default_context_lines(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from default locations
    ///
    /// Search order:
    /// 1. DOCPACK_SEARCH_CONFIG environment variable
    /// 2. ./docpack_search.toml (current directory)
    /// 3. ~/.config/docpack_search/config.toml (user config)
    pub fn from_default_locations() -> Result<Option<(Self, PathBuf)>> {
        if let Ok(env_path) = std::env::var("DOCPACK_SEARCH_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                let config = Self::from_file(&path)?;
                return Ok(Some((config, path)));
            }
        }

        let local_path = PathBuf::from("docpack_search.toml");
        if local_path.exists() {
            let config = Self::from_file(&local_path)?;
            return Ok(Some((config, local_path)));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_path = config_dir.join("docpack_search").join("config.toml");
            if user_path.exists() {
                let config = Self::from_file(&user_path)?;
                return Ok(Some((config, user_path)));
            }
        }

        Ok(None)
    }

    /// Load from an explicit path, else the default locations, else defaults.
    ///
    /// Environment overrides are applied and the result validated.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let (config, source) = match explicit {
            Some(path) => (Self::from_file(path)?, Some(path.to_path_buf())),
            None => match Self::from_default_locations()? {
                Some((config, path)) => (config, Some(path)),
                None => (Self::default(), None),
            },
        };

        let config = config.with_env_overrides()?;
        config.validate()?;
        Ok((config, source))
    }

    /// Apply `DOCPACK_*` environment variable overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(val) = get("DOCPACK_EMBEDDING_BACKEND") {
            self.embedding.backend = val.parse()?;
        }
        if let Some(val) = get("DOCPACK_EMBEDDING_MODEL") {
            self.embedding.model = val;
        }
        if let Some(val) = get("DOCPACK_CHUNK_SIZE") {
            self.indexer.chunk_size = val
                .trim()
                .parse()
                .with_context(|| format!("Invalid DOCPACK_CHUNK_SIZE '{}'", val))?;
        }
        Ok(self)
    }

    /// Merge CLI overrides into the configuration
    pub fn with_overrides(
        mut self,
        chunk_size: Option<usize>,
        backend: Option<EmbeddingBackend>,
        model: Option<String>,
    ) -> Self {
        if let Some(size) = chunk_size {
            self.indexer.chunk_size = size;
        }
        if let Some(backend) = backend {
            self.embedding.backend = backend;
        }
        if let Some(model) = model {
            self.embedding.model = model;
        }
        self
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.indexer.chunk_size == 0 {
            anyhow::bail!("indexer.chunk_size must be greater than 0");
        }
        if self.embedding.dimension == 0 {
            anyhow::bail!("embedding.dimension must be greater than 0");
        }
        if self.indexer.index_file.trim().is_empty() {
            anyhow::bail!("indexer.index_file must not be empty");
        }
        Ok(())
    }

    /// Generate a template configuration file
    pub fn generate_template() -> String {
        r#"# docpack_search configuration
# Generated template - customize as needed

[indexer]
# Chunk width in characters (default: 500)
# Env override: DOCPACK_CHUNK_SIZE
chunk_size = 500

# Glob patterns (relative to the docpack's files/ directory) to skip
exclude_patterns = [
    "**/.git/**",
    "**/node_modules/**",
    "**/__pycache__/**",
    "**/.venv/**",
]

# Maximum file size to index in bytes (default: 10MB)
max_file_size = 10485760

# Transcode non-UTF-8 text files to UTF-8 (default: true)
transcode_non_utf8 = true

# Index file name inside index/
index_file = "embeddings.json"

[embedding]
# "hash" (deterministic, no model files) or "onnx" (needs the ml-models feature)
# Env override: DOCPACK_EMBEDDING_BACKEND
backend = "hash"

# ONNX model name
# Env override: DOCPACK_EMBEDDING_MODEL
model = "BAAI/bge-small-en-v1.5"

# Vector width for the hash backend
dimension = 384

# Where downloaded models are cached (default: platform cache dir)
# cache_dir = "/var/cache/docpack_search"

# Override the model's prompt templates
# query_prefix = "Represent this sentence for searching relevant passages: "
# document_prefix = ""

[retrieval]
# Default number of results
top_k = 5

# Context lines around semantic_grep snippets
context_lines = 3
"#
        .to_string()
    }

    /// Write template config to the specified path
    pub fn write_template(path: &Path) -> Result<()> {
        let template = Self::generate_template();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, template)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
