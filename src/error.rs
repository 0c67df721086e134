//! Error taxonomy for retrieval queries
//!
//! Structural outcomes (no index, unknown file) are explicit variants the
//! caller branches on. Model and storage failures wrap the underlying
//! `anyhow::Error` and propagate unchanged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The index is missing or holds zero chunks. Both cases collapse here.
    #[error("No embeddings available. Build embeddings first.")]
    NoEmbeddings,

    /// `neighbors` was asked about a file with no indexed chunks.
    #[error("File not found in index: {file}")]
    FileNotFound { file: String },

    /// The embedding model could not be loaded or failed during inference.
    #[error("Embedding model error: {0}")]
    Embedding(#[source] anyhow::Error),

    /// The on-disk index exists but could not be read back.
    #[error("Index store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl RetrievalError {
    /// True for the outcomes a caller is expected to handle as data rather
    /// than as a failure of the environment.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::NoEmbeddings | Self::FileNotFound { .. })
    }
}

pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_embeddings_message() {
        let err = RetrievalError::NoEmbeddings;
        assert_eq!(
            err.to_string(),
            "No embeddings available. Build embeddings first."
        );
        assert!(err.is_structural());
    }

    #[test]
    fn test_embedding_error_is_not_structural() {
        let err = RetrievalError::Embedding(anyhow::anyhow!("model weights missing"));
        assert!(!err.is_structural());
        assert!(err.to_string().contains("model weights missing"));
    }
}
