//! Utility functions shared across modules

use std::borrow::Cow;
use std::collections::HashSet;
use std::path::Path;

/// Binary file extensions that never contain indexable text.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "exe", "dll", "so", "dylib", "bin", "o", "a", "lib", // Executables and libraries
    "png", "jpg", "jpeg", "gif", "ico", "bmp", "webp", // Images
    "zip", "tar", "gz", "7z", "rar", "xz", "bz2", // Archives
    "woff", "woff2", "ttf", "eot", "otf", // Fonts
    "pdf", "doc", "docx", "xls", "xlsx", // Documents
    "mp3", "mp4", "wav", "avi", "mkv", "mov", // Media
    "pyc", "pyo", "class", // Compiled bytecode
];

/// Returns a HashSet of binary extensions for efficient lookup.
pub fn get_binary_extensions() -> HashSet<&'static str> {
    BINARY_EXTENSIONS.iter().copied().collect()
}

/// Check if a file should be skipped based on its extension.
pub fn has_binary_extension(path: &Path) -> bool {
    if let Some(ext) = path.extension() {
        let ext = ext.to_string_lossy().to_lowercase();
        get_binary_extensions().contains(ext.as_str())
    } else {
        false
    }
}

/// Check if content appears to be binary (contains null bytes or high ratio of non-printable chars).
///
/// Only the first 8KB are inspected. Content with a Unicode BOM is text.
pub fn is_binary_content(content: &[u8]) -> bool {
    if encoding_rs::Encoding::for_bom(content).is_some() {
        return false;
    }

    let sample = &content[..content.len().min(8192)];

    let mut non_text_count = 0;
    for &byte in sample {
        if byte == 0 {
            return true;
        }
        if byte < 32 && !matches!(byte, b'\t' | b'\n' | b'\r' | 0x0c) {
            non_text_count += 1;
        }
    }

    non_text_count > sample.len() / 10
}

/// Decode raw file bytes as text, best effort.
///
/// Valid UTF-8 is borrowed as-is. Otherwise, when `transcode` is set, the
/// encoding is guessed with `chardetng` and decoded with `encoding_rs`
/// (BOM-sniffed UTF-16 included). Without transcoding, or when the guess
/// still produces malformed sequences, undecodable bytes are dropped rather
/// than failing the file.
pub fn decode_text(bytes: &[u8], transcode: bool) -> Cow<'_, str> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Cow::Borrowed(text);
    }

    if transcode {
        if let Some((encoding, _)) = encoding_rs::Encoding::for_bom(bytes) {
            let (decoded, _) = encoding.decode_with_bom_removal(bytes);
            return Cow::Owned(decoded.into_owned());
        }

        let mut detector = chardetng::EncodingDetector::new();
        detector.feed(bytes, true);
        let encoding = detector.guess(None, true);
        let (decoded, _, had_errors) = encoding.decode(bytes);
        if !had_errors {
            return Cow::Owned(decoded.into_owned());
        }
    }

    Cow::Owned(
        String::from_utf8_lossy(bytes)
            .chars()
            .filter(|&c| c != char::REPLACEMENT_CHARACTER)
            .collect(),
    )
}

/// Normalize a docpack-relative path for use as an index key.
///
/// Separators become `/` and leading `./` segments are dropped. Case is kept.
pub fn normalize_relative_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let mut rest = normalized.as_str();
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    rest.trim_start_matches('/').to_string()
}
