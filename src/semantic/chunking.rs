//! Fixed-width text chunking for semantic search
//!
//! Splits file content into non-overlapping windows of `chunk_size`
//! characters. Boundaries ignore words, lines and tokens: a chunk is a pure
//! character slice, so concatenating a file's chunks reproduces the file.

use serde::{Deserialize, Serialize};

/// Default window width in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// A window of a file with its provenance.
///
/// Offsets are character (not byte) positions into the content the chunk
/// was cut from, `start_offset < end_offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    pub source_file: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Fixed-size character chunker
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
}

impl Chunker {
    /// Create a chunker. A zero size is clamped to one character.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Chunk a file's content.
    ///
    /// Content that is empty or whitespace-only yields no chunks at all.
    pub fn chunk_file(&self, content: &str, source_file: &str) -> Vec<TextChunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start_offset = 0;
        let mut window = String::new();
        let mut window_chars = 0;

        for ch in content.chars() {
            window.push(ch);
            window_chars += 1;

            if window_chars == self.chunk_size {
                chunks.push(TextChunk {
                    text: std::mem::take(&mut window),
                    source_file: source_file.to_string(),
                    start_offset,
                    end_offset: start_offset + window_chars,
                });
                start_offset += window_chars;
                window_chars = 0;
            }
        }

        if window_chars > 0 {
            chunks.push(TextChunk {
                text: window,
                source_file: source_file.to_string(),
                start_offset,
                end_offset: start_offset + window_chars,
            });
        }

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_partition_content() {
        let chunker = Chunker::new(7);
        let content = "fn main() {\n    println!(\"hello\");\n}\n";
        let chunks = chunker.chunk_file(content, "main.rs");

        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, content);

        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(
            chunks.last().unwrap().end_offset,
            content.chars().count()
        );
    }

    #[test]
    fn test_only_last_chunk_is_short() {
        let chunker = Chunker::new(10);
        let content = "a".repeat(35);
        let chunks = chunker.chunk_file(&content, "a.txt");

        assert_eq!(chunks.len(), 4);
        assert!(chunks[..3].iter().all(|c| c.end_offset - c.start_offset == 10));
        assert_eq!(chunks[3].text.len(), 5);
        assert_eq!((chunks[3].start_offset, chunks[3].end_offset), (30, 35));
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let chunker = Chunker::new(4);
        let chunks = chunker.chunk_file("abcdefgh", "x.txt");
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| !c.text.is_empty()));
    }

    #[test]
    fn test_empty_and_whitespace_files_produce_nothing() {
        let chunker = Chunker::default();
        assert!(chunker.chunk_file("", "empty.txt").is_empty());
        assert!(chunker.chunk_file(" \n\t\n  ", "blank.txt").is_empty());
    }

    #[test]
    fn test_offsets_count_characters_not_bytes() {
        let chunker = Chunker::new(3);
        let chunks = chunker.chunk_file("héllo wörld", "u.txt");

        assert_eq!(chunks[0].text, "hél");
        assert_eq!(chunks[1].text, "lo ");
        assert_eq!(chunks[1].start_offset, 3);
        assert_eq!(chunks.last().unwrap().end_offset, 11);
    }

    #[test]
    fn test_provenance_carries_source_file() {
        let chunker = Chunker::new(500);
        let chunks = chunker.chunk_file("short file", "docs/readme.md");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_file, "docs/readme.md");
        assert_eq!((chunks[0].start_offset, chunks[0].end_offset), (0, 10));
    }
}
