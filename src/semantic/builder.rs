//! Index builder
//!
//! Walks a file tree, chunks every decodable text file, embeds all chunks in
//! one document-embedding call and writes the index. Chunk order is the
//! walk order (sorted by file name within each directory), then offset order
//! within each file; vectors are stored in exactly that order.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::chunking::{Chunker, TextChunk};
use super::embeddings::EmbeddingGateway;
use super::index_store::{IndexData, IndexStore};
use crate::config::IndexerConfig;
use crate::docpack::FileSandbox;
use crate::utils::{decode_text, has_binary_extension, is_binary_content};

/// Counters from one build pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub files_seen: usize,
    pub files_indexed: usize,
    /// Binary, oversized, excluded or whitespace-only files
    pub files_skipped: usize,
    /// Files that could not be read
    pub files_failed: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BuildOutcome {
    /// A new index was written.
    Built {
        stats: BuildStats,
        model: String,
        embedding_dim: usize,
        elapsed_ms: u64,
    },
    /// No chunks were produced; any prior index file is untouched.
    NothingToIndex { stats: BuildStats },
}

enum FileResult {
    Chunks(Vec<TextChunk>),
    Skipped,
    Failed,
}

pub struct IndexBuilder {
    chunker: Chunker,
    exclude: Option<GlobSet>,
    max_file_size: u64,
    transcode_non_utf8: bool,
}

impl IndexBuilder {
    pub fn new(config: &IndexerConfig) -> Result<Self> {
        let exclude = if config.exclude_patterns.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in &config.exclude_patterns {
                let glob = Glob::new(pattern)
                    .with_context(|| format!("Invalid exclude glob pattern: {}", pattern))?;
                builder.add(glob);
            }
            Some(builder.build().context("Failed to build exclude GlobSet")?)
        };

        Ok(Self {
            chunker: Chunker::new(config.chunk_size),
            exclude,
            max_file_size: config.max_file_size,
            transcode_non_utf8: config.transcode_non_utf8,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunker.chunk_size()
    }

    /// `/`-separated paths of the regular files under the sandbox root, in
    /// deterministic order.
    pub fn discover(&self, sandbox: &dyn FileSandbox) -> Vec<String> {
        let root = sandbox.files_root();
        let mut files = Vec::new();
        for entry in WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Error walking directory");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            files.push(rel.to_string_lossy().replace('\\', "/"));
        }
        files
    }

    fn is_excluded(&self, relative: &str) -> bool {
        self.exclude
            .as_ref()
            .map(|set| set.is_match(relative))
            .unwrap_or(false)
    }

    fn process_file(&self, sandbox: &dyn FileSandbox, relative: &str) -> FileResult {
        if self.is_excluded(relative) || has_binary_extension(Path::new(relative)) {
            return FileResult::Skipped;
        }

        let Some(path) = sandbox.resolve(relative) else {
            warn!(path = %relative, "Skipping file outside sandbox");
            return FileResult::Skipped;
        };

        match path.metadata() {
            Ok(meta) if meta.len() > self.max_file_size => {
                debug!(path = %path.display(), size = meta.len(), "Skipping file exceeding size limit");
                return FileResult::Skipped;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to stat file, skipping");
                return FileResult::Failed;
            }
        }

        let bytes = match sandbox.read_bytes(relative) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read file, skipping");
                return FileResult::Failed;
            }
        };

        if is_binary_content(&bytes) {
            debug!(path = %path.display(), "Skipping binary file");
            return FileResult::Skipped;
        }

        let text = decode_text(&bytes, self.transcode_non_utf8);
        let chunks = self.chunker.chunk_file(&text, relative);
        if chunks.is_empty() {
            return FileResult::Skipped;
        }
        FileResult::Chunks(chunks)
    }

    /// Chunk every eligible file in the sandbox, in walk order.
    pub fn collect_chunks(&self, sandbox: &dyn FileSandbox) -> (Vec<TextChunk>, BuildStats) {
        let files = self.discover(sandbox);
        let results: Vec<FileResult> = files
            .par_iter()
            .map(|rel| self.process_file(sandbox, rel))
            .collect();

        let mut stats = BuildStats {
            files_seen: files.len(),
            ..Default::default()
        };
        let mut chunks = Vec::new();
        for result in results {
            match result {
                FileResult::Chunks(file_chunks) => {
                    stats.files_indexed += 1;
                    chunks.extend(file_chunks);
                }
                FileResult::Skipped => stats.files_skipped += 1,
                FileResult::Failed => stats.files_failed += 1,
            }
        }
        stats.chunks = chunks.len();
        (chunks, stats)
    }

    /// Build and persist the index for the sandbox's tree.
    pub fn build(
        &self,
        sandbox: &dyn FileSandbox,
        gateway: &dyn EmbeddingGateway,
        store: &IndexStore,
    ) -> Result<BuildOutcome> {
        let start = Instant::now();
        let root = sandbox.files_root();
        if !root.is_dir() {
            anyhow::bail!("Files directory not found: {}", root.display());
        }

        let (chunks, stats) = self.collect_chunks(sandbox);
        info!(
            files = stats.files_seen,
            indexed = stats.files_indexed,
            skipped = stats.files_skipped,
            failed = stats.files_failed,
            chunks = stats.chunks,
            "Chunked file tree"
        );

        if chunks.is_empty() {
            warn!(path = %root.display(), "No text content found to embed");
            return Ok(BuildOutcome::NothingToIndex { stats });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = gateway
            .embed_documents(&texts)
            .context("Failed to embed chunks")?;

        if embeddings.len() != chunks.len() {
            anyhow::bail!(
                "Embedding model returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            );
        }
        if embeddings.first().map(|v| v.is_empty()).unwrap_or(false) {
            anyhow::bail!("Embedding model returned zero-length vectors");
        }

        let data = IndexData::new(chunks, embeddings, self.chunk_size(), gateway.model_id())?;
        let embedding_dim = data.embedding_dim;
        let model = data.model.clone();
        store.replace(data)?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            path = %store.path().display(),
            chunks = stats.chunks,
            model = %model,
            embedding_dim,
            elapsed_ms,
            "Built embedding index"
        );

        Ok(BuildOutcome::Built {
            stats,
            model,
            embedding_dim,
            elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docpack::DirectorySandbox;
    use crate::semantic::embeddings::HashEmbedder;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn config(chunk_size: usize) -> IndexerConfig {
        IndexerConfig {
            chunk_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_collect_chunks_order_and_skips() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "b.txt", b"bbbbbbbbbb");
        write(root, "a.txt", b"aaaaa");
        write(root, "empty.txt", b"   \n");
        write(root, "logo.png", b"\x89PNG");
        write(root, "blob.dat", b"\x00\x01\x02\x03");
        write(root, ".git/config", b"[core]");

        let builder = IndexBuilder::new(&config(4)).unwrap();
        let (chunks, stats) = builder.collect_chunks(&DirectorySandbox::new(root));

        let files: Vec<&str> = chunks.iter().map(|c| c.source_file.as_str()).collect();
        assert_eq!(files, vec!["a.txt", "a.txt", "b.txt", "b.txt", "b.txt"]);
        assert_eq!(chunks[1].text, "a");
        assert_eq!(stats.files_seen, 6);
        assert_eq!(stats.files_indexed, 2);
        assert_eq!(stats.files_skipped, 4);
        assert_eq!(stats.chunks, 5);
    }

    #[test]
    fn test_max_file_size_skips_large_files() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "big.txt", &[b'x'; 64]);
        write(temp.path(), "small.txt", b"tiny");

        let builder = IndexBuilder::new(&IndexerConfig {
            max_file_size: 16,
            ..Default::default()
        })
        .unwrap();
        let (chunks, _) = builder.collect_chunks(&DirectorySandbox::new(temp.path()));
        assert!(chunks.iter().all(|c| c.source_file == "small.txt"));
    }

    #[test]
    fn test_invalid_utf8_is_decoded_best_effort() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "latin.txt", b"caf\xE9 au lait");

        let builder = IndexBuilder::new(&IndexerConfig {
            transcode_non_utf8: false,
            ..Default::default()
        })
        .unwrap();
        let (chunks, stats) = builder.collect_chunks(&DirectorySandbox::new(temp.path()));
        assert_eq!(stats.files_failed, 0);
        assert_eq!(chunks[0].text, "caf au lait");
    }

    #[test]
    fn test_build_writes_aligned_index() {
        let temp = TempDir::new().unwrap();
        let files = temp.path().join("files");
        write(&files, "one.md", b"alpha beta gamma delta");
        write(&files, "two.md", b"epsilon zeta");

        let store = IndexStore::new(temp.path().join("index/embeddings.json"));
        let builder = IndexBuilder::new(&config(10)).unwrap();
        let outcome = builder.build(&DirectorySandbox::new(&files), &HashEmbedder::new(32), &store).unwrap();

        match outcome {
            BuildOutcome::Built { stats, embedding_dim, .. } => {
                assert_eq!(stats.chunks, 5);
                assert_eq!(embedding_dim, 32);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let data = IndexStore::new(store.path()).load().unwrap();
        assert_eq!(data.chunks.len(), data.embeddings.len());
        assert_eq!(data.chunk_size, 10);
        assert_eq!(data.model, "hash-embedder-d32");
    }

    #[test]
    fn test_nothing_to_index_keeps_previous_index() {
        let temp = TempDir::new().unwrap();
        let files = temp.path().join("files");
        write(&files, "doc.md", b"some content");

        let store = IndexStore::new(temp.path().join("index/embeddings.json"));
        let builder = IndexBuilder::new(&config(500)).unwrap();
        let model = HashEmbedder::new(16);
        builder.build(&DirectorySandbox::new(&files), &model, &store).unwrap();
        let before = std::fs::read(store.path()).unwrap();

        std::fs::write(files.join("doc.md"), "  \n ").unwrap();
        let outcome = builder.build(&DirectorySandbox::new(&files), &model, &store).unwrap();

        assert!(matches!(outcome, BuildOutcome::NothingToIndex { .. }));
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp = TempDir::new().unwrap();
        let store = IndexStore::new(temp.path().join("embeddings.json"));
        let builder = IndexBuilder::new(&config(500)).unwrap();
        let result = builder.build(
            &DirectorySandbox::new(temp.path().join("nope")),
            &HashEmbedder::new(8),
            &store,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let result = IndexBuilder::new(&IndexerConfig {
            exclude_patterns: vec!["[unclosed".to_string()],
            ..Default::default()
        });
        assert!(result.is_err());
    }

    /// Sandbox whose reads fail for one named file
    struct FailingRead {
        inner: DirectorySandbox,
        broken: &'static str,
    }

    impl FileSandbox for FailingRead {
        fn files_root(&self) -> &Path {
            self.inner.files_root()
        }

        fn resolve(&self, relative: &str) -> Option<PathBuf> {
            self.inner.resolve(relative)
        }

        fn read_bytes(&self, relative: &str) -> Result<Vec<u8>> {
            if relative == self.broken {
                anyhow::bail!("Permission denied: {}", relative);
            }
            self.inner.read_bytes(relative)
        }
    }

    #[test]
    fn test_unreadable_file_is_counted_and_build_continues() {
        let temp = TempDir::new().unwrap();
        let files = temp.path().join("files");
        write(&files, "locked.md", b"cannot be read");
        write(&files, "open.md", b"readable text");

        let sandbox = FailingRead {
            inner: DirectorySandbox::new(&files),
            broken: "locked.md",
        };
        let store = IndexStore::new(temp.path().join("index/embeddings.json"));
        let builder = IndexBuilder::new(&config(500)).unwrap();
        let outcome = builder.build(&sandbox, &HashEmbedder::new(16), &store).unwrap();

        match outcome {
            BuildOutcome::Built { stats, .. } => {
                assert_eq!(stats.files_seen, 2);
                assert_eq!(stats.files_failed, 1);
                assert_eq!(stats.files_indexed, 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        let data = store.load().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data.chunks[0].source_file, "open.md");
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_permissions_are_counted() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        write(temp.path(), "locked.md", b"secret");
        write(temp.path(), "open.md", b"visible");
        let locked = temp.path().join("locked.md");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        if std::fs::read(&locked).is_ok() {
            // running as root, permissions are not enforced
            return;
        }

        let builder = IndexBuilder::new(&config(500)).unwrap();
        let (chunks, stats) = builder.collect_chunks(&DirectorySandbox::new(temp.path()));
        assert_eq!(stats.files_failed, 1);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_file, "open.md");

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_tree_is_not_indexed() {
        let temp = TempDir::new().unwrap();
        let files = temp.path().join("files");
        write(&files, "notes.md", b"inside the tree");
        std::fs::write(temp.path().join("secret.txt"), "TOP SECRET password hunter2").unwrap();
        std::os::unix::fs::symlink(temp.path().join("secret.txt"), files.join("link.txt")).unwrap();
        std::os::unix::fs::symlink(files.join("notes.md"), files.join("alias.md")).unwrap();

        let builder = IndexBuilder::new(&config(500)).unwrap();
        let (chunks, stats) = builder.collect_chunks(&DirectorySandbox::new(&files));

        let sources: Vec<&str> = chunks.iter().map(|c| c.source_file.as_str()).collect();
        assert_eq!(sources, vec!["alias.md", "notes.md"]);
        assert!(chunks.iter().all(|c| !c.text.contains("SECRET")));
        assert_eq!(stats.files_skipped, 1);
    }
}
