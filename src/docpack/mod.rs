//! Docpack workspace and sandboxed file access
//!
//! A docpack is a directory with a fixed layout:
//!
//! ```text
//! <docpack>/
//!   docpack.json   manifest
//!   files/         the tree that gets indexed
//!   index/         index blobs (embeddings.json)
//!   output/        files written by tools
//! ```
//!
//! Every read goes through [`FileSandbox::resolve`], which refuses paths that
//! escape `files/`.

mod manifest;
mod metadata;

pub use manifest::{Manifest, ManifestEnvironment, ManifestMetadata, DEFAULT_TOOLS, MANIFEST_FILE};
pub use metadata::{DocpackMetadata, DocpackStatistics, EnvironmentPaths, IndexOverview};

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::decode_text;

pub const FILES_DIR: &str = "files";
pub const INDEX_DIR: &str = "index";
pub const OUTPUT_DIR: &str = "output";

/// Containment-checked access to an indexed file tree.
pub trait FileSandbox: Send + Sync {
    /// Root of the tree that gets indexed.
    fn files_root(&self) -> &Path;

    /// Map a tree-relative path to a real path, or `None` when it would
    /// escape the root.
    fn resolve(&self, relative: &str) -> Option<PathBuf>;

    /// Raw bytes of a file.
    fn read_bytes(&self, relative: &str) -> Result<Vec<u8>> {
        let path = self.resolve(relative).context("Path outside sandbox")?;
        std::fs::read(&path).with_context(|| format!("Failed to read file: {}", path.display()))
    }

    /// Read a file as text, dropping undecodable bytes.
    fn read_text(&self, relative: &str) -> Result<String> {
        let bytes = self.read_bytes(relative)?;
        Ok(decode_text(&bytes, true).into_owned())
    }
}

/// Join `relative` onto `root` lexically, refusing to leave `root`.
///
/// Existing paths are additionally canonicalized so symlinks pointing out of
/// the root are refused too.
pub fn resolve_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    let candidate = parts.iter().fold(root.to_path_buf(), |acc, p| acc.join(p));

    if candidate.exists() {
        let real_root = root.canonicalize().ok()?;
        let real = candidate.canonicalize().ok()?;
        if !real.starts_with(&real_root) {
            debug!(path = %relative, "Refusing symlink out of sandbox");
            return None;
        }
    }

    Some(candidate)
}

/// Plain directory sandbox, for trees that are not full docpacks.
#[derive(Debug, Clone)]
pub struct DirectorySandbox {
    root: PathBuf,
}

impl DirectorySandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileSandbox for DirectorySandbox {
    fn files_root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        resolve_within(&self.root, relative)
    }
}

/// An opened docpack
#[derive(Debug, Clone)]
pub struct Docpack {
    root: PathBuf,
    files: PathBuf,
    manifest: Manifest,
}

impl Docpack {
    /// Open an existing docpack. `docpack.json` must exist; `output/` is
    /// created when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            anyhow::bail!("No {} found at {}", MANIFEST_FILE, manifest_path.display());
        }
        let manifest = Manifest::load(&manifest_path)?;

        let output = root.join(OUTPUT_DIR);
        std::fs::create_dir_all(&output)
            .with_context(|| format!("Failed to create output directory: {}", output.display()))?;

        debug!(path = %root.display(), name = %manifest.name, "Opened docpack");
        Ok(Self {
            files: root.join(FILES_DIR),
            root,
            manifest,
        })
    }

    /// Create a new docpack layout with a fresh manifest.
    ///
    /// Fails when `path` already exists.
    pub fn init(path: impl AsRef<Path>, name: Option<&str>, description: Option<&str>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if root.exists() {
            anyhow::bail!("Path already exists: {}", root.display());
        }

        let name = name
            .map(|n| n.to_string())
            .or_else(|| root.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "my-docpack".to_string());
        let description = description.unwrap_or("A new docpack");

        for dir in [FILES_DIR, INDEX_DIR, OUTPUT_DIR] {
            let dir = root.join(dir);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        let manifest = Manifest::new(name, description);
        manifest.save(&root.join(MANIFEST_FILE))?;

        info!(path = %root.display(), name = %manifest.name, "Initialized docpack");
        Ok(Self {
            files: root.join(FILES_DIR),
            root,
            manifest,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn files_dir(&self) -> PathBuf {
        self.files.clone()
    }

    pub fn index_dir(&self) -> PathBuf {
        self.root.join(INDEX_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    /// Path of a named index blob inside `index/`.
    pub fn index_file(&self, name: &str) -> PathBuf {
        self.index_dir().join(name)
    }

    /// Resolve a path inside `output/`.
    pub fn resolve_output(&self, relative: &str) -> Option<PathBuf> {
        resolve_within(&self.output_dir(), relative)
    }

    /// Every regular file under `relative`, as sorted `/`-separated paths
    /// relative to `files/`. A missing directory lists as empty.
    pub fn list_files(&self, relative: &str) -> Result<Vec<String>> {
        let start = self
            .resolve(relative)
            .context("Path outside sandbox")?;
        if !start.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&start).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Error walking directory");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.files) else {
                continue;
            };
            let rel = rel.to_string_lossy().replace('\\', "/");
            if self.resolve(&rel).is_some() {
                files.push(rel);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Read a file under `files/` as text, dropping undecodable bytes.
    pub fn read_file(&self, relative: &str) -> Result<String> {
        self.read_text(relative)
    }

    /// Write a file under `output/`, creating parent directories.
    pub fn write_output(&self, relative: &str, content: &str) -> Result<PathBuf> {
        let path = self
            .resolve_output(relative)
            .context("Path outside output directory")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write output file: {}", path.display()))?;
        Ok(path)
    }
}

impl FileSandbox for Docpack {
    fn files_root(&self) -> &Path {
        &self.files
    }

    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        resolve_within(&self.files, relative)
    }
}
