//! Recovering the line position of a chunk inside its source file
//!
//! Chunks are cut on character boundaries, so a chunk's first line is
//! usually a fragment. Matching therefore anchors on the first chunk line
//! with non-whitespace content and accepts a file line as a candidate when
//! it *contains* that anchor. A candidate is verified when each following
//! chunk line is contained in the corresponding file line. The first
//! verified candidate wins; with none verified, the first candidate is used.

/// Where a chunk sits in its file, in 0-based line numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    /// File line holding the chunk's first line.
    pub start_line: usize,
    /// File line holding the chunk's last line.
    pub end_line: usize,
}

/// Find the 0-based file line where `chunk` begins.
///
/// Returns `None` when the chunk has no non-whitespace line or when no file
/// line contains its anchor.
pub fn locate_chunk(file_text: &str, chunk: &str) -> Option<usize> {
    let chunk_lines: Vec<&str> = chunk.split('\n').collect();
    let anchor_idx = chunk_lines.iter().position(|l| !l.trim().is_empty())?;
    let anchor = chunk_lines[anchor_idx].trim();

    let file_lines: Vec<&str> = file_text.split('\n').collect();
    let mut first_candidate = None;

    for (i, line) in file_lines.iter().enumerate() {
        if !line.contains(anchor) {
            continue;
        }
        first_candidate.get_or_insert(i);

        let verified = chunk_lines[anchor_idx + 1..]
            .iter()
            .enumerate()
            .all(|(offset, chunk_line)| {
                let needle = chunk_line.trim();
                match file_lines.get(i + offset + 1) {
                    Some(file_line) => file_line.trim().contains(needle),
                    None => false,
                }
            });

        if verified {
            return Some(i.saturating_sub(anchor_idx));
        }
    }

    first_candidate.map(|i| i.saturating_sub(anchor_idx))
}

/// Locate a chunk and report the span of file lines it covers.
pub fn locate_span(file_text: &str, chunk: &str) -> Option<ChunkLocation> {
    let start_line = locate_chunk(file_text, chunk)?;
    let line_count = chunk.split('\n').count();
    Some(ChunkLocation {
        start_line,
        end_line: start_line + line_count.saturating_sub(1),
    })
}

/// Render file lines `[start, end]` widened by `context` lines on each side,
/// clamped to the file.
pub fn snippet_with_context(file_text: &str, start: usize, end: usize, context: usize) -> String {
    let lines: Vec<&str> = file_text.split('\n').collect();
    if lines.is_empty() {
        return String::new();
    }
    let last = lines.len() - 1;
    let from = start.saturating_sub(context).min(last);
    let to = end.saturating_add(context).min(last);
    lines[from..=to].join("\n")
}
