//! `docpack.json` manifest

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MANIFEST_VERSION: &str = "1.0";
pub const MANIFEST_FILE: &str = "docpack.json";

/// Tools a freshly initialized docpack advertises.
pub const DEFAULT_TOOLS: &[&str] = &[
    "list_files",
    "read_file",
    "write_output",
    "semantic_search",
    "semantic_search_and_read",
    "semantic_grep",
    "semantic_neighbors",
    "docpack_metadata",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub environment: ManifestEnvironment,

    #[serde(default)]
    pub metadata: ManifestMetadata,

    /// Keys this crate does not interpret, kept for round-tripping.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestEnvironment {
    #[serde(default)]
    pub tools: Vec<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_version() -> String {
    MANIFEST_VERSION.to_string()
}

impl Manifest {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            version: default_version(),
            name: name.into(),
            description: description.into(),
            environment: ManifestEnvironment {
                tools: DEFAULT_TOOLS.iter().map(|t| t.to_string()).collect(),
                extra: Default::default(),
            },
            metadata: ManifestMetadata {
                created: Some(chrono::Utc::now().to_rfc3339()),
                creator: Some(format!("docpack-search {}", env!("CARGO_PKG_VERSION"))),
                extra: Default::default(),
            },
            extra: Default::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write manifest: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_manifest_shape() {
        let manifest = Manifest::new("demo", "A demo docpack");
        let value = serde_json::to_value(&manifest).unwrap();

        assert_eq!(value["version"], "1.0");
        assert_eq!(value["name"], "demo");
        assert!(value["environment"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t == "semantic_search"));
        let created = value["metadata"]["created"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(created).is_ok());
    }

    #[test]
    fn test_unknown_keys_survive() {
        let raw = r#"{
            "version": "1.0",
            "name": "legacy",
            "environment": {"tools": ["read_file"], "interpreter": "python3.12"},
            "metadata": {"created": "2024-01-01T00:00:00Z", "language": "python"},
            "custom": 42
        }"#;
        let manifest: Manifest = serde_json::from_str(raw).unwrap();
        assert_eq!(manifest.environment.tools, vec!["read_file"]);
        assert_eq!(manifest.description, "");

        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["custom"], 42);
        assert_eq!(value["environment"]["interpreter"], "python3.12");
        assert_eq!(value["metadata"]["language"], "python");
    }
}
