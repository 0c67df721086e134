//! docpack_search: semantic retrieval over docpack file trees
//!
//! Builds a chunked embedding index over a docpack's `files/` tree and
//! answers chunk-level search, file-level neighbor, line-snippet and
//! search-and-read queries against it.

pub mod config;
pub mod docpack;
pub mod error;
pub mod semantic;
pub mod telemetry;
pub mod tools;
pub mod utils;

pub use config::Config;
pub use docpack::{Docpack, FileSandbox};
pub use error::{RetrievalError, RetrievalResult};
pub use semantic::{EmbeddingGateway, IndexBuilder, IndexStore, RetrievalEngine};
pub use tools::{ToolCall, ToolExecutor};
