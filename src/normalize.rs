//! Document Normalizer: file bytes to a cleaned [`SourceDocument`].
//!
//! Extraction is per-format ([`crate::extract`]); this module adds the
//! per-document metadata, the code-file header, and the single text
//! cleaning pass every format goes through.

use std::path::Path;

use knowledge_harness_core::error::KbError;
use knowledge_harness_core::models::{
    extension_of, language_display_name, sha256_hex, DocumentKind, SourceDocument,
};

use crate::extract::{extract, ExtractError};

/// Documents with less normalized text than this are extraction failures.
pub const MIN_CONTENT_CHARS: usize = 10;

/// Clean extracted text.
///
/// - `\r\n` and lone `\r` become `\n`
/// - control characters other than newline and tab are dropped
/// - runs of spaces and tabs collapse to one space; trailing spaces go
/// - three or more consecutive newlines become exactly two
/// - leading and trailing whitespace is trimmed
pub fn clean_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    let mut newlines = 0usize;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        let c = match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    continue;
                }
                '\n'
            }
            c => c,
        };
        match c {
            '\n' => {
                pending_space = false;
                newlines += 1;
            }
            ' ' | '\t' => pending_space = true,
            c if c.is_control() => {}
            c => {
                if newlines > 0 {
                    if !out.is_empty() {
                        out.push_str(if newlines >= 2 { "\n\n" } else { "\n" });
                    }
                    newlines = 0;
                } else if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
            }
        }
    }
    out
}

/// Prefix code with a language/filename header to aid embedding.
fn with_code_header(language: &str, path: &str, text: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    format!("[{} file: {}]\n\n{}", language_display_name(language), name, text)
}

/// Raw file facts gathered by the caller.
#[derive(Debug, Clone, Copy)]
pub struct FileFacts {
    pub byte_size: u64,
    /// Unix seconds.
    pub modified_at: i64,
}

/// Normalize file bytes into a [`SourceDocument`].
///
/// Fails with [`KbError::ExtractionFailed`] for corrupt or empty files.
pub fn normalize(
    knowledge_base_id: &str,
    rel_path: &str,
    bytes: &[u8],
    facts: FileFacts,
) -> Result<SourceDocument, KbError> {
    let kind = DocumentKind::from_path(rel_path);
    let failed = |reason: String| KbError::ExtractionFailed {
        path: rel_path.to_string(),
        reason,
    };

    let raw = extract(bytes, &kind).map_err(|e| failed(e.to_string()))?;
    let cleaned = clean_text(&raw);
    if cleaned.chars().count() < MIN_CONTENT_CHARS {
        return Err(failed(ExtractError::Empty.to_string()));
    }
    let text = match &kind {
        DocumentKind::SourceCode { language } => with_code_header(language, rel_path, &cleaned),
        _ => cleaned,
    };

    Ok(SourceDocument {
        knowledge_base_id: knowledge_base_id.to_string(),
        path: rel_path.to_string(),
        content_hash: sha256_hex(bytes),
        byte_size: facts.byte_size,
        modified_at: facts.modified_at,
        declared_type: extension_of(rel_path),
        kind,
        text,
    })
}

/// File facts from filesystem metadata.
pub fn file_facts(meta: &std::fs::Metadata) -> FileFacts {
    let modified_at = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    FileFacts {
        byte_size: meta.len(),
        modified_at,
    }
}

/// Read and normalize one file under `root`. Blocking.
pub fn read_document(
    knowledge_base_id: &str,
    root: &Path,
    rel_path: &str,
) -> Result<SourceDocument, KbError> {
    let full = root.join(rel_path);
    let io_failed = |e: std::io::Error| KbError::ExtractionFailed {
        path: rel_path.to_string(),
        reason: ExtractError::Io(e).to_string(),
    };
    let meta = std::fs::metadata(&full).map_err(io_failed)?;
    let bytes = std::fs::read(&full).map_err(io_failed)?;
    normalize(knowledge_base_id, rel_path, &bytes, file_facts(&meta))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> FileFacts {
        FileFacts {
            byte_size: 0,
            modified_at: 0,
        }
    }

    #[test]
    fn test_clean_text_rules() {
        assert_eq!(clean_text("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_text("a  \t  b"), "a b");
        assert_eq!(clean_text("a\r\nb\rc"), "a\nb\nc");
        assert_eq!(clean_text("a\u{0}b\u{7}c"), "abc");
        assert_eq!(clean_text("  \n\nhello  \n  world\n\n"), "hello\nworld");
        assert_eq!(clean_text("para one.\n \n \npara two."), "para one.\n\npara two.");
    }

    #[test]
    fn test_code_header() {
        let doc = normalize("kb", "src/main.rs", b"fn main() {\n    run();\n}\n", facts()).unwrap();
        assert!(doc.text.starts_with("[Rust file: main.rs]\n\nfn main() {"));
        assert_eq!(doc.kind.language(), Some("rust"));
        assert_eq!(doc.declared_type, "rs");
    }

    #[test]
    fn test_empty_is_extraction_failure() {
        let err = normalize("kb", "empty.md", b"  \n\n ", facts()).unwrap_err();
        match err {
            KbError::ExtractionFailed { path, reason } => {
                assert_eq!(path, "empty.md");
                assert_eq!(reason, "no content extracted");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_corrupt_office_file_is_extraction_failure() {
        let err = normalize("kb", "broken.docx", b"definitely not a zip", facts()).unwrap_err();
        assert!(matches!(err, KbError::ExtractionFailed { .. }));
    }

    #[test]
    fn test_metadata() {
        let body = b"Some notes about the project plan.";
        let doc = normalize("kb", "notes/plan.md", body, FileFacts { byte_size: 34, modified_at: 7 })
            .unwrap();
        assert_eq!(doc.content_hash, sha256_hex(body));
        assert_eq!(doc.byte_size, 34);
        assert_eq!(doc.modified_at, 7);
        assert_eq!(doc.kind, DocumentKind::PlainText);
        assert_eq!(doc.word_count(), 6);
    }
}
