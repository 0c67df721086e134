//! Named tool dispatch over a docpack
//!
//! Tool calls arrive as a name plus JSON arguments. They are parsed into the
//! closed [`ToolCall`] enum up front, so an unknown name or a malformed
//! argument set is rejected before anything runs. Every result, including
//! failures, renders as a JSON value; failures are `{"error": "<message>"}`.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::docpack::Docpack;
use crate::semantic::RetrievalEngine;

fn default_path() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    ListFiles {
        #[serde(default = "default_path")]
        path: String,
    },
    ReadFile {
        path: String,
    },
    WriteOutput {
        path: String,
        content: String,
    },
    SemanticSearch {
        query: String,
        #[serde(default)]
        top_k: Option<usize>,
    },
    SemanticSearchAndRead {
        query: String,
        #[serde(default)]
        top_k: Option<usize>,
    },
    SemanticGrep {
        query: String,
        #[serde(default)]
        top_k: Option<usize>,
        #[serde(default)]
        context_lines: Option<usize>,
    },
    SemanticNeighbors {
        file: String,
        #[serde(default)]
        top_k: Option<usize>,
    },
    DocpackMetadata,
}

impl ToolCall {
    pub const NAMES: &'static [&'static str] = &[
        "list_files",
        "read_file",
        "write_output",
        "semantic_search",
        "semantic_search_and_read",
        "semantic_grep",
        "semantic_neighbors",
        "docpack_metadata",
    ];

    /// Parse a call from its name and JSON object arguments (or `null`).
    pub fn parse(name: &str, args: Value) -> Result<Self> {
        if !Self::NAMES.contains(&name) {
            anyhow::bail!("Unknown tool: {}", name);
        }

        let mut object = match args {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => anyhow::bail!("Arguments for {} must be a JSON object, got {}", name, other),
        };
        object.insert("tool".to_string(), Value::String(name.to_string()));

        serde_json::from_value(Value::Object(object))
            .with_context(|| format!("Invalid arguments for {}", name))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ListFiles { .. } => "list_files",
            Self::ReadFile { .. } => "read_file",
            Self::WriteOutput { .. } => "write_output",
            Self::SemanticSearch { .. } => "semantic_search",
            Self::SemanticSearchAndRead { .. } => "semantic_search_and_read",
            Self::SemanticGrep { .. } => "semantic_grep",
            Self::SemanticNeighbors { .. } => "semantic_neighbors",
            Self::DocpackMetadata => "docpack_metadata",
        }
    }
}

pub fn error_value(message: impl std::fmt::Display) -> Value {
    json!({ "error": message.to_string() })
}

/// Runs tool calls against one docpack and its retrieval engine
pub struct ToolExecutor<'a> {
    docpack: &'a Docpack,
    engine: &'a RetrievalEngine,
    defaults: RetrievalConfig,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(docpack: &'a Docpack, engine: &'a RetrievalEngine, defaults: RetrievalConfig) -> Self {
        Self {
            docpack,
            engine,
            defaults,
        }
    }

    /// Parse and run a call by name. Parse failures render as errors too.
    pub fn execute_named(&self, name: &str, args: Value) -> Value {
        match ToolCall::parse(name, args) {
            Ok(call) => self.execute(&call),
            Err(e) => error_value(format!("{:#}", e)),
        }
    }

    pub fn execute(&self, call: &ToolCall) -> Value {
        debug!(tool = call.name(), "Executing tool");
        match self.try_execute(call) {
            Ok(value) => value,
            Err(e) => error_value(format!("{:#}", e)),
        }
    }

    fn try_execute(&self, call: &ToolCall) -> Result<Value> {
        let top_k = |k: &Option<usize>| k.unwrap_or(self.defaults.top_k);

        let value = match call {
            ToolCall::ListFiles { path } => json!({ "files": self.docpack.list_files(path)? }),
            ToolCall::ReadFile { path } => json!({ "content": self.docpack.read_file(path)? }),
            ToolCall::WriteOutput { path, content } => {
                self.docpack.write_output(path, content)?;
                json!({ "success": true, "path": path })
            }
            ToolCall::SemanticSearch { query, top_k: k } => {
                let hits = self.engine.search(query, top_k(k))?;
                json!({ "query": query, "results": hits })
            }
            ToolCall::SemanticSearchAndRead { query, top_k: k } => {
                serde_json::to_value(self.engine.search_and_read(self.docpack, query, top_k(k))?)?
            }
            ToolCall::SemanticGrep {
                query,
                top_k: k,
                context_lines,
            } => {
                let context = context_lines.unwrap_or(self.defaults.context_lines);
                serde_json::to_value(self.engine.grep(self.docpack, query, top_k(k), context)?)?
            }
            ToolCall::SemanticNeighbors { file, top_k: k } => {
                let neighbors = self.engine.neighbors(file, top_k(k))?;
                json!({ "file": file, "neighbors": neighbors })
            }
            ToolCall::DocpackMetadata => {
                serde_json::to_value(self.docpack.metadata(self.engine.store())?)?
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_tools() {
        let call = ToolCall::parse("semantic_grep", json!({"query": "auth", "top_k": 3})).unwrap();
        assert_eq!(
            call,
            ToolCall::SemanticGrep {
                query: "auth".to_string(),
                top_k: Some(3),
                context_lines: None,
            }
        );
        assert_eq!(call.name(), "semantic_grep");

        let call = ToolCall::parse("list_files", Value::Null).unwrap();
        assert_eq!(call, ToolCall::ListFiles { path: ".".to_string() });

        let call = ToolCall::parse("docpack_metadata", json!({})).unwrap();
        assert_eq!(call, ToolCall::DocpackMetadata);
    }

    #[test]
    fn test_unknown_tool() {
        let err = ToolCall::parse("delete_everything", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: delete_everything");
    }

    #[test]
    fn test_bad_arguments() {
        assert!(ToolCall::parse("read_file", json!({})).is_err());
        assert!(ToolCall::parse("read_file", json!(["a.txt"])).is_err());
        assert!(ToolCall::parse("semantic_search", json!({"query": 7})).is_err());
    }

    #[test]
    fn test_every_name_round_trips() {
        for name in ToolCall::NAMES {
            let args = match *name {
                "read_file" => json!({"path": "a"}),
                "write_output" => json!({"path": "a", "content": "b"}),
                "semantic_neighbors" => json!({"file": "a"}),
                "semantic_search" | "semantic_search_and_read" | "semantic_grep" => {
                    json!({"query": "q"})
                }
                _ => json!({}),
            };
            assert_eq!(ToolCall::parse(name, args).unwrap().name(), *name);
        }
    }
}
