//! Retrieval engine
//!
//! Query-time core over a built index: chunk-level `search`, file-level
//! `neighbors`, and the snippet (`grep`) and whole-file (`search_and_read`)
//! views built on top of `search`. Scores are flat cosine similarity against
//! every indexed chunk.

use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::embeddings::EmbeddingGateway;
use super::index_store::{IndexData, IndexStore};
use super::location::{locate_span, snippet_with_context};
use crate::docpack::FileSandbox;
use crate::error::{RetrievalError, RetrievalResult};
use crate::utils::normalize_relative_path;

/// A chunk matching a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    #[serde(rename = "file")]
    pub source_file: String,
    #[serde(rename = "chunk")]
    pub chunk_text: String,
    pub score: f32,
    #[serde(rename = "start_pos")]
    pub start_offset: usize,
    #[serde(rename = "end_pos")]
    pub end_offset: usize,
}

/// A file similar to the query file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeighborHit {
    pub file: String,
    /// Mean of the file's chunk scores
    pub score: f32,
    /// Text of the file's single best-scoring chunk
    pub representative_chunk: String,
}

/// A search hit mapped back onto file lines
///
/// Line numbers are 1-based. They are `None` when the file can no longer be
/// read or the chunk cannot be found in it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrepSnippet {
    pub file: String,
    pub score: f32,
    pub line: Option<usize>,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrepResult {
    pub matches: usize,
    pub snippets: Vec<GrepSnippet>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevantChunk {
    pub chunk: String,
    pub score: f32,
}

/// One matched file with its current content
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileContext {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub relevant_chunks: Vec<RelevantChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchAndReadResult {
    pub files_found: usize,
    pub results: Vec<FileContext>,
}

/// Indices of `scores` ordered by descending score, ties in index order.
fn ranked(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order
}

fn centroid(vectors: &[&[f32]]) -> Vec<f32> {
    let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
    let mut mean = vec![0.0f32; dim];
    for vector in vectors {
        for (acc, value) in mean.iter_mut().zip(vector.iter()) {
            *acc += value;
        }
    }
    let n = vectors.len().max(1) as f32;
    for value in mean.iter_mut() {
        *value /= n;
    }
    mean
}

/// Whether a query vector can be scored against the index. Logs a warning
/// when it cannot, since every score then comes back as zero.
fn dimensions_match(query_dim: usize, data: &IndexData) -> bool {
    if query_dim == data.embedding_dim {
        return true;
    }
    warn!(
        query_dim,
        index_dim = data.embedding_dim,
        index_model = %data.model,
        "Query embedding dimension differs from the index; rebuild the index with the current model"
    );
    false
}

/// Query-time engine over one index and one embedding gateway
pub struct RetrievalEngine {
    store: Arc<IndexStore>,
    gateway: Arc<dyn EmbeddingGateway>,
}

impl RetrievalEngine {
    pub fn new(store: Arc<IndexStore>, gateway: Arc<dyn EmbeddingGateway>) -> Self {
        Self { store, gateway }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn gateway(&self) -> &dyn EmbeddingGateway {
        self.gateway.as_ref()
    }

    fn index(&self) -> RetrievalResult<Arc<IndexData>> {
        let data = self.store.load().map_err(RetrievalError::Store)?;
        if data.is_empty() {
            return Err(RetrievalError::NoEmbeddings);
        }
        Ok(data)
    }

    /// Top `k` chunks for a natural-language query.
    pub fn search(&self, query: &str, k: usize) -> RetrievalResult<Vec<SearchHit>> {
        let data = self.index()?;
        info!(query = %query, k, chunks = data.len(), "Semantic search");

        let query_vector = self
            .gateway
            .embed_query(query)
            .map_err(RetrievalError::Embedding)?;
        dimensions_match(query_vector.len(), &data);
        let scores = self.gateway.similarity(&query_vector, &data.embeddings);

        let hits: Vec<SearchHit> = ranked(&scores)
            .into_iter()
            .take(k)
            .map(|i| {
                let chunk = &data.chunks[i];
                SearchHit {
                    source_file: chunk.source_file.clone(),
                    chunk_text: chunk.text.clone(),
                    score: scores[i],
                    start_offset: chunk.start_offset,
                    end_offset: chunk.end_offset,
                }
            })
            .collect();

        debug!(results = hits.len(), "Semantic search complete");
        Ok(hits)
    }

    /// Top `k` files most similar to `file`, excluding `file` itself.
    pub fn neighbors(&self, file: &str, k: usize) -> RetrievalResult<Vec<NeighborHit>> {
        let data = self.index()?;
        let file = normalize_relative_path(file);

        let own: Vec<&[f32]> = data
            .chunk_indices_for(&file)
            .into_iter()
            .map(|i| data.embeddings[i].as_slice())
            .collect();
        if own.is_empty() {
            return Err(RetrievalError::FileNotFound { file });
        }

        let query_vector = centroid(&own);
        let scores = self.gateway.similarity(&query_vector, &data.embeddings);

        // (file, score sum, chunk count, best chunk index) in first-appearance order
        let mut order: Vec<(&str, f32, usize, usize)> = Vec::new();
        let mut slot: FxHashMap<&str, usize> = FxHashMap::default();
        for (i, chunk) in data.chunks.iter().enumerate() {
            let name = chunk.source_file.as_str();
            match slot.get(name) {
                Some(&pos) => {
                    let entry = &mut order[pos];
                    entry.1 += scores[i];
                    entry.2 += 1;
                    if scores[i] > scores[entry.3] {
                        entry.3 = i;
                    }
                }
                None => {
                    slot.insert(name, order.len());
                    order.push((name, scores[i], 1, i));
                }
            }
        }

        let candidates: Vec<(&str, f32, usize)> = order
            .into_iter()
            .filter(|(name, ..)| *name != file)
            .map(|(name, sum, count, best)| (name, sum / count as f32, best))
            .collect();
        let means: Vec<f32> = candidates.iter().map(|c| c.1).collect();

        let hits: Vec<NeighborHit> = ranked(&means)
            .into_iter()
            .take(k)
            .map(|i| {
                let (name, score, best) = candidates[i];
                NeighborHit {
                    file: name.to_string(),
                    score,
                    representative_chunk: data.chunks[best].text.clone(),
                }
            })
            .collect();

        info!(file = %file, k, results = hits.len(), "Semantic neighbors");
        Ok(hits)
    }

    /// Search, then map each hit back onto lines of its current file.
    pub fn grep(
        &self,
        sandbox: &dyn FileSandbox,
        query: &str,
        k: usize,
        context_lines: usize,
    ) -> RetrievalResult<GrepResult> {
        let hits = self.search(query, k)?;
        let mut contents: FxHashMap<String, Option<String>> = FxHashMap::default();

        let snippets: Vec<GrepSnippet> = hits
            .into_iter()
            .map(|hit| {
                let text = contents
                    .entry(hit.source_file.clone())
                    .or_insert_with(|| match sandbox.read_text(&hit.source_file) {
                        Ok(text) => Some(text),
                        Err(e) => {
                            warn!(file = %hit.source_file, error = %e, "Cannot read file for snippet");
                            None
                        }
                    });

                let located = text.as_deref().and_then(|text| {
                    let span = locate_span(text, &hit.chunk_text)?;
                    Some((span, text))
                });

                match located {
                    Some((span, text)) => {
                        let last_line = text.split('\n').count().saturating_sub(1);
                        let from = span.start_line.saturating_sub(context_lines).min(last_line);
                        let to = span.end_line.saturating_add(context_lines).min(last_line);
                        GrepSnippet {
                            file: hit.source_file,
                            score: hit.score,
                            line: Some(span.start_line + 1),
                            start_line: Some(from + 1),
                            end_line: Some(to + 1),
                            snippet: Some(snippet_with_context(
                                text,
                                span.start_line,
                                span.end_line,
                                context_lines,
                            )),
                        }
                    }
                    None => GrepSnippet {
                        file: hit.source_file,
                        score: hit.score,
                        line: None,
                        start_line: None,
                        end_line: None,
                        snippet: None,
                    },
                }
            })
            .collect();

        Ok(GrepResult {
            matches: snippets.len(),
            snippets,
        })
    }

    /// Search, then return each matched file once with its full content.
    ///
    /// Files appear in order of their best hit.
    pub fn search_and_read(
        &self,
        sandbox: &dyn FileSandbox,
        query: &str,
        k: usize,
    ) -> RetrievalResult<SearchAndReadResult> {
        let hits = self.search(query, k)?;

        let mut results: Vec<FileContext> = Vec::new();
        let mut slot: FxHashMap<String, usize> = FxHashMap::default();
        for hit in hits {
            let relevant = RelevantChunk {
                chunk: hit.chunk_text,
                score: hit.score,
            };
            if let Some(&pos) = slot.get(&hit.source_file) {
                results[pos].relevant_chunks.push(relevant);
                continue;
            }

            let (content, error) = match sandbox.read_text(&hit.source_file) {
                Ok(text) => (Some(text), None),
                Err(e) => {
                    warn!(file = %hit.source_file, error = %e, "Cannot read matched file");
                    (None, Some(format!("{:#}", e)))
                }
            };
            slot.insert(hit.source_file.clone(), results.len());
            results.push(FileContext {
                file: hit.source_file,
                content,
                error,
                relevant_chunks: vec![relevant],
            });
        }

        Ok(SearchAndReadResult {
            files_found: results.len(),
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::chunking::TextChunk;

    #[test]
    fn test_ranked_is_stable_descending() {
        let scores = [0.5, 0.9, 0.5, 0.1, 0.9];
        assert_eq!(ranked(&scores), vec![1, 4, 0, 2, 3]);
    }

    #[test]
    fn test_centroid_is_arithmetic_mean() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        assert_eq!(centroid(&[&a, &b]), vec![0.5, 0.5]);
    }

    #[test]
    fn test_search_on_missing_index_is_no_embeddings() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(IndexStore::new(temp.path().join("embeddings.json")));
        let engine = RetrievalEngine::new(
            store,
            Arc::new(crate::semantic::embeddings::HashEmbedder::new(8)),
        );

        assert!(matches!(
            engine.search("anything", 5),
            Err(RetrievalError::NoEmbeddings)
        ));
        assert!(matches!(
            engine.neighbors("a.md", 5),
            Err(RetrievalError::NoEmbeddings)
        ));
    }

    #[test]
    fn test_neighbors_unknown_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(IndexStore::new(temp.path().join("embeddings.json")));
        store
            .replace(
                IndexData::new(
                    vec![TextChunk {
                        text: "x".to_string(),
                        source_file: "a.md".to_string(),
                        start_offset: 0,
                        end_offset: 1,
                    }],
                    vec![vec![1.0, 0.0]],
                    1,
                    "m",
                )
                .unwrap(),
            )
            .unwrap();
        let engine = RetrievalEngine::new(
            store,
            Arc::new(crate::semantic::embeddings::HashEmbedder::new(2)),
        );

        match engine.neighbors("./b.md", 3) {
            Err(RetrievalError::FileNotFound { file }) => assert_eq!(file, "b.md"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(engine.neighbors("./a.md", 3).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch_scores_zero() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(IndexStore::new(temp.path().join("embeddings.json")));
        let data = store
            .replace(
                IndexData::new(
                    vec![TextChunk {
                        text: "hello world".to_string(),
                        source_file: "a.md".to_string(),
                        start_offset: 0,
                        end_offset: 11,
                    }],
                    vec![vec![1.0, 0.0]],
                    500,
                    "two-dim",
                )
                .unwrap(),
            )
            .unwrap();
        assert!(dimensions_match(2, &data));
        assert!(!dimensions_match(8, &data));

        let engine = RetrievalEngine::new(
            store,
            Arc::new(crate::semantic::embeddings::HashEmbedder::new(8)),
        );
        let hits = engine.search("hello world", 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, 0.0);
    }
}
