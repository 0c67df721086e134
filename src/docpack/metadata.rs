//! One-call overview of a docpack: manifest, file statistics and index state

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::{Docpack, FileSandbox, Manifest};
use crate::semantic::index_store::{IndexStatus, IndexStore};

pub const NO_EXTENSION: &str = "(no extension)";

#[derive(Debug, Clone, Serialize)]
pub struct DocpackStatistics {
    pub total_files: usize,
    pub total_size_bytes: u64,
    /// File count per lowercase extension
    pub file_types: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexOverview {
    pub has_embeddings: bool,
    pub embeddings: IndexStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentPaths {
    pub workspace: String,
    pub files_dir: String,
    pub index_dir: String,
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocpackMetadata {
    pub manifest: Manifest,
    pub statistics: DocpackStatistics,
    pub indexes: IndexOverview,
    pub environment: EnvironmentPaths,
}

fn extension_key(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| NO_EXTENSION.to_string())
}

impl Docpack {
    /// Gather file statistics over `files/`.
    pub fn statistics(&self) -> Result<DocpackStatistics> {
        let files = self.list_files(".")?;
        let mut total_size_bytes = 0;
        let mut file_types = BTreeMap::new();

        for file in &files {
            if let Some(meta) = self.resolve(file).and_then(|p| p.metadata().ok()) {
                total_size_bytes += meta.len();
            }
            *file_types.entry(extension_key(file)).or_insert(0) += 1;
        }

        Ok(DocpackStatistics {
            total_files: files.len(),
            total_size_bytes,
            file_types,
        })
    }

    /// Manifest, statistics, index status and directory paths together.
    pub fn metadata(&self, store: &IndexStore) -> Result<DocpackMetadata> {
        let embeddings = store.status()?;
        Ok(DocpackMetadata {
            manifest: self.manifest().clone(),
            statistics: self.statistics()?,
            indexes: IndexOverview {
                has_embeddings: embeddings.has_embeddings(),
                embeddings,
            },
            environment: EnvironmentPaths {
                workspace: self.root().display().to_string(),
                files_dir: self.files_dir().display().to_string(),
                index_dir: self.index_dir().display().to_string(),
                output_dir: self.output_dir().display().to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extension_key() {
        assert_eq!(extension_key("src/main.PY"), "py");
        assert_eq!(extension_key("Makefile"), NO_EXTENSION);
    }

    #[test]
    fn test_statistics_and_missing_index() {
        let temp = TempDir::new().unwrap();
        let docpack = Docpack::init(temp.path().join("pack"), Some("pack"), None).unwrap();
        std::fs::write(docpack.files_dir().join("a.py"), "12345").unwrap();
        std::fs::write(docpack.files_dir().join("b.py"), "123").unwrap();
        std::fs::write(docpack.files_dir().join("LICENSE"), "mit").unwrap();

        let store = IndexStore::new(docpack.index_file("embeddings.json"));
        let meta = docpack.metadata(&store).unwrap();

        assert_eq!(meta.statistics.total_files, 3);
        assert_eq!(meta.statistics.total_size_bytes, 11);
        assert_eq!(meta.statistics.file_types["py"], 2);
        assert_eq!(meta.statistics.file_types[NO_EXTENSION], 1);
        assert!(!meta.indexes.has_embeddings);
        assert_eq!(meta.indexes.embeddings, IndexStatus::Missing);
        assert_eq!(meta.manifest.name, "pack");

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["indexes"]["embeddings"]["state"], "missing");
    }
}
