#![cfg(feature = "ml-models")]
//! Embedding model files from the HuggingFace Hub
//!
//! A model is an ONNX graph plus a `tokenizer.json`. Both are fetched once
//! into `<cache>/models/<name>/` and reused afterwards.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECS: u64 = 2;
const MODEL_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";
const SHA256_ENV: &str = "DOCPACK_MODEL_SHA256";

/// Where a model lives and how to prompt it
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub onnx_url: String,
    pub tokenizer_url: String,
    pub expected_sha256: Option<String>,
    pub query_prefix: String,
    pub document_prefix: String,
}

impl ModelInfo {
    fn from_repo(name: &str, repo: &str, onnx_path: &str) -> Self {
        let base = format!("https://huggingface.co/{}/resolve/main", repo);
        Self {
            name: name.to_string(),
            onnx_url: format!("{}/{}", base, onnx_path),
            tokenizer_url: format!("{}/{}", base, TOKENIZER_FILE),
            expected_sha256: None,
            query_prefix: String::new(),
            document_prefix: String::new(),
        }
    }

    /// BGE small (384 dimensions), the default model.
    pub fn bge_small() -> Self {
        let mut info = Self::from_repo(
            "BAAI/bge-small-en-v1.5",
            "BAAI/bge-small-en-v1.5",
            "onnx/model.onnx",
        );
        info.query_prefix = "Represent this sentence for searching relevant passages: ".to_string();
        info
    }

    /// EmbeddingGemma (768 dimensions), ONNX export from onnx-community.
    pub fn embedding_gemma() -> Self {
        let mut info = Self::from_repo(
            "google/embeddinggemma-300m",
            "onnx-community/embeddinggemma-300m-ONNX",
            "onnx/model.onnx",
        );
        info.query_prefix = "task: search result | query: ".to_string();
        info.document_prefix = "title: none | text: ".to_string();
        info
    }

    /// Look up a known model by name.
    pub fn for_model(name: &str) -> Result<Self> {
        match name {
            "BAAI/bge-small-en-v1.5" | "bge-small" => Ok(Self::bge_small()),
            "google/embeddinggemma-300m" | "embeddinggemma" => Ok(Self::embedding_gemma()),
            other => anyhow::bail!(
                "Unknown embedding model '{}'. Supported: BAAI/bge-small-en-v1.5, google/embeddinggemma-300m",
                other
            ),
        }
    }

    /// Pinned checksum, else `DOCPACK_MODEL_SHA256`, else none.
    fn checksum(&self) -> Result<Option<String>> {
        let raw = match &self.expected_sha256 {
            Some(hash) => Some(hash.clone()),
            None => std::env::var(SHA256_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty()),
        };
        raw.map(|hash| normalize_sha256(&hash)).transpose()
    }
}

fn normalize_sha256(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.len() != 64 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        anyhow::bail!("Invalid SHA256 value '{}'. Expected 64 hex characters.", trimmed);
    }
    Ok(trimmed.to_lowercase())
}

fn sha256_of(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Fetches model files into a local cache
pub struct ModelDownloader {
    cache_dir: PathBuf,
}

impl ModelDownloader {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn model_dir(&self, model_name: &str) -> PathBuf {
        self.cache_dir.join("models").join(model_name.replace('/', "-"))
    }

    pub fn is_cached(&self, model_name: &str) -> bool {
        let dir = self.model_dir(model_name);
        dir.join(MODEL_FILE).is_file() && dir.join(TOKENIZER_FILE).is_file()
    }

    /// Directory holding the model's files, downloading them first if needed.
    pub fn ensure_model(&self, model: &ModelInfo) -> Result<PathBuf> {
        let dir = self.model_dir(&model.name);
        if self.is_cached(&model.name) {
            debug!(model = %model.name, path = %dir.display(), "Model found in cache");
            return Ok(dir);
        }

        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create model cache directory: {}", dir.display()))?;
        info!(model = %model.name, path = %dir.display(), "Downloading embedding model (one-time)");

        let onnx_path = dir.join(MODEL_FILE);
        self.fetch_with_retry(&model.onnx_url, &onnx_path)?;
        match model.checksum()? {
            Some(expected) => {
                let actual = sha256_of(&onnx_path)?;
                if actual != expected {
                    fs::remove_file(&onnx_path).ok();
                    anyhow::bail!(
                        "Checksum mismatch for {}: expected {}, got {}",
                        model.name,
                        expected,
                        actual
                    );
                }
                debug!(model = %model.name, "Checksum verified");
            }
            None => warn!(
                model = %model.name,
                "No checksum configured; set {} to verify the download",
                SHA256_ENV
            ),
        }
        self.fetch_with_retry(&model.tokenizer_url, &dir.join(TOKENIZER_FILE))?;

        info!(model = %model.name, "Model cached");
        Ok(dir)
    }

    fn fetch_with_retry(&self, url: &str, dest: &Path) -> Result<()> {
        let mut attempt = 1;
        loop {
            match fetch(url, dest) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < MAX_RETRIES => {
                    warn!(url = %url, attempt, error = %e, "Download failed, retrying");
                    std::thread::sleep(Duration::from_secs(RETRY_DELAY_SECS));
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Giving up on {} after {} attempts", url, MAX_RETRIES))
                }
            }
        }
    }
}

/// Stream `url` into `dest` through a `.part` file, so an interrupted
/// download never looks cached.
fn fetch(url: &str, dest: &Path) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;
    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("Failed to connect to {}", url))?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {} from {}", response.status(), url);
    }

    let bar = match response.content_length() {
        Some(total) => ProgressBar::new(total),
        None => ProgressBar::new_spinner(),
    };
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("#>-"),
    );
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    bar.set_message(file_name);

    let part = dest.with_extension("part");
    let file = fs::File::create(&part)
        .with_context(|| format!("Failed to create file: {}", part.display()))?;
    let mut writer = bar.wrap_write(std::io::BufWriter::new(file));
    let written = std::io::copy(&mut response, &mut writer)
        .with_context(|| format!("Failed to read response from {}", url))?;
    writer
        .flush()
        .with_context(|| format!("Failed to write file: {}", part.display()))?;
    bar.finish_and_clear();

    fs::rename(&part, dest)
        .with_context(|| format!("Failed to move {} into place", part.display()))?;
    debug!(path = %dest.display(), bytes = written, "Downloaded");
    Ok(())
}

/// `<user cache dir>/docpack_search`
pub fn default_cache_dir() -> Result<PathBuf> {
    Ok(dirs::cache_dir()
        .context("Failed to determine the user cache directory")?
        .join("docpack_search"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_model_info_lookup() {
        let info = ModelInfo::for_model("BAAI/bge-small-en-v1.5").unwrap();
        assert!(info.onnx_url.starts_with("https://huggingface.co/BAAI/bge-small-en-v1.5/"));
        assert!(info.tokenizer_url.ends_with("/tokenizer.json"));
        assert!(info.query_prefix.starts_with("Represent this sentence"));
        assert!(info.document_prefix.is_empty());

        let gemma = ModelInfo::for_model("embeddinggemma").unwrap();
        assert!(gemma.onnx_url.contains("onnx-community"));
        assert!(ModelInfo::for_model("no/such-model").is_err());
    }

    #[test]
    fn test_cache_layout() {
        let temp = tempdir().unwrap();
        let downloader = ModelDownloader::new(temp.path().to_path_buf());
        let dir = downloader.model_dir("BAAI/bge-small-en-v1.5");
        assert!(dir.ends_with("models/BAAI-bge-small-en-v1.5"));
        assert!(!downloader.is_cached("BAAI/bge-small-en-v1.5"));

        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MODEL_FILE), b"onnx").unwrap();
        assert!(!downloader.is_cached("BAAI/bge-small-en-v1.5"));
        fs::write(dir.join(TOKENIZER_FILE), b"{}").unwrap();
        assert!(downloader.is_cached("BAAI/bge-small-en-v1.5"));
        assert_eq!(downloader.ensure_model(&ModelInfo::bge_small()).unwrap(), dir);
    }

    #[test]
    fn test_sha256_checks() {
        assert_eq!(normalize_sha256(&"A".repeat(64)).unwrap(), "a".repeat(64));
        assert!(normalize_sha256("abc").is_err());

        let temp = tempdir().unwrap();
        let path = temp.path().join("f");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_of(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let mut info = ModelInfo::bge_small();
        info.expected_sha256 = Some("B".repeat(64));
        assert_eq!(info.checksum().unwrap(), Some("b".repeat(64)));
    }

    #[test]
    #[ignore]
    fn test_download_model() {
        let temp = tempdir().unwrap();
        let downloader = ModelDownloader::new(temp.path().to_path_buf());
        let model = ModelInfo::bge_small();

        downloader.ensure_model(&model).unwrap();
        assert!(downloader.is_cached(&model.name));
    }
}
