//! Core data models used throughout Knowledge Harness.
//!
//! These types describe what flows through indexing (documents, chunks,
//! vector records) and what a knowledge base partition looks like.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Extraction strategy for a file, selected once from its declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DocumentKind {
    PlainText,
    /// Word-processing document (`.docx`): paragraphs and tables.
    RichDocument,
    /// Presentation (`.pptx`): text per slide.
    SlideDeck,
    /// Workbook (`.xlsx`): pipe-joined rows per sheet.
    Spreadsheet,
    /// Jupyter notebook (`.ipynb`).
    Notebook,
    /// Source or config file; `language` is a lowercase tag like `rust`.
    SourceCode { language: String },
    Pdf,
}

const PLAIN_TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "rtf", "csv", "tsv", "log", "text",
];

/// `(extension, language tag, display name)` for recognised code files.
const CODE_LANGUAGES: &[(&str, &str, &str)] = &[
    ("py", "python", "Python"),
    ("js", "javascript", "JavaScript"),
    ("ts", "typescript", "TypeScript"),
    ("jsx", "jsx", "React JSX"),
    ("tsx", "tsx", "React TSX"),
    ("java", "java", "Java"),
    ("cpp", "cpp", "C++"),
    ("c", "c", "C"),
    ("h", "c", "C"),
    ("cs", "csharp", "C#"),
    ("go", "go", "Go"),
    ("rs", "rust", "Rust"),
    ("rb", "ruby", "Ruby"),
    ("php", "php", "PHP"),
    ("swift", "swift", "Swift"),
    ("kt", "kotlin", "Kotlin"),
    ("scala", "scala", "Scala"),
    ("html", "html", "HTML"),
    ("css", "css", "CSS"),
    ("scss", "scss", "SCSS"),
    ("sass", "sass", "Sass"),
    ("less", "less", "Less"),
    ("json", "json", "JSON"),
    ("yaml", "yaml", "YAML"),
    ("yml", "yaml", "YAML"),
    ("toml", "toml", "TOML"),
    ("xml", "xml", "XML"),
    ("ini", "ini", "INI"),
    ("cfg", "ini", "INI"),
    ("sh", "shell", "Shell"),
    ("bash", "shell", "Shell"),
    ("zsh", "shell", "Shell"),
    ("fish", "shell", "Shell"),
    ("ps1", "powershell", "PowerShell"),
    ("sql", "sql", "SQL"),
    ("graphql", "graphql", "GraphQL"),
];

impl DocumentKind {
    /// Select the extraction strategy for a lowercase file extension.
    ///
    /// Unknown extensions fall back to [`DocumentKind::PlainText`]; binary
    /// content is caught by the admission filter before extraction.
    pub fn from_extension(ext: &str) -> DocumentKind {
        let ext = ext.to_ascii_lowercase();
        match ext.as_str() {
            "docx" => return DocumentKind::RichDocument,
            "pptx" => return DocumentKind::SlideDeck,
            "xlsx" => return DocumentKind::Spreadsheet,
            "ipynb" => return DocumentKind::Notebook,
            "pdf" => return DocumentKind::Pdf,
            _ => {}
        }
        if PLAIN_TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return DocumentKind::PlainText;
        }
        match CODE_LANGUAGES.iter().find(|(e, _, _)| *e == ext) {
            Some((_, tag, _)) => DocumentKind::SourceCode {
                language: tag.to_string(),
            },
            None => DocumentKind::PlainText,
        }
    }

    /// Select the extraction strategy from a path's extension.
    pub fn from_path(path: &str) -> DocumentKind {
        DocumentKind::from_extension(&extension_of(path))
    }

    /// Stable name stored as chunk metadata (`doc_type`).
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::PlainText => "plain-text",
            DocumentKind::RichDocument => "rich-document",
            DocumentKind::SlideDeck => "slide-deck",
            DocumentKind::Spreadsheet => "spreadsheet",
            DocumentKind::Notebook => "notebook",
            DocumentKind::SourceCode { .. } => "source-code",
            DocumentKind::Pdf => "pdf",
        }
    }

    pub fn language(&self) -> Option<&str> {
        match self {
            DocumentKind::SourceCode { language } => Some(language),
            _ => None,
        }
    }

    /// Whether the raw bytes are text, so a content peek is meaningful.
    pub fn is_text_like(&self) -> bool {
        matches!(
            self,
            DocumentKind::PlainText | DocumentKind::Notebook | DocumentKind::SourceCode { .. }
        )
    }
}

/// Human-readable language name for a code header, e.g. `Rust`.
pub fn language_display_name(tag: &str) -> &'static str {
    CODE_LANGUAGES
        .iter()
        .find(|(_, t, _)| *t == tag)
        .map(|(_, _, name)| *name)
        .unwrap_or("Code")
}

/// Lowercase extension of a `/`-separated path, or `""`.
pub fn extension_of(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx + 1..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// A named partition isolating a set of documents, chunks and vectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}

impl KnowledgeBase {
    pub fn new(name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// A normalized file, ready for chunking.
///
/// `path` is relative to the indexed root, `/`-separated, and unique
/// within a knowledge base.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub knowledge_base_id: String,
    pub path: String,
    /// SHA-256 of the raw file bytes.
    pub content_hash: String,
    pub byte_size: u64,
    /// Unix seconds.
    pub modified_at: i64,
    /// Lowercase file extension (may be empty).
    pub declared_type: String,
    pub kind: DocumentKind,
    pub text: String,
}

impl SourceDocument {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Identity shared by every chunk id of this version of the document.
    ///
    /// Scoped by knowledge base and path so identical files at two paths
    /// never share chunk ids.
    pub fn identity(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.knowledge_base_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.content_hash.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..32].to_string()
    }

    /// Persisted summary of this document (everything but the text).
    pub fn summary(&self, chunk_count: usize) -> DocumentSummary {
        DocumentSummary {
            knowledge_base_id: self.knowledge_base_id.clone(),
            path: self.path.clone(),
            content_hash: self.content_hash.clone(),
            byte_size: self.byte_size,
            modified_at: self.modified_at,
            declared_type: self.declared_type.clone(),
            doc_type: self.kind.as_str().to_string(),
            char_count: self.char_count(),
            chunk_count,
            indexed_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Stored metadata for an indexed document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub knowledge_base_id: String,
    pub path: String,
    pub content_hash: String,
    pub byte_size: u64,
    pub modified_at: i64,
    pub declared_type: String,
    pub doc_type: String,
    pub char_count: usize,
    pub chunk_count: usize,
    pub indexed_at: i64,
}

/// Per-chunk metadata used by query predicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub doc_type: String,
    pub extension: String,
    pub language: Option<String>,
    pub knowledge_base_id: String,
}

/// A window of a normalized document.
///
/// Offsets are in characters (not bytes) into the normalized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_path: String,
    pub ordinal: usize,
    pub total: usize,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    /// SHA-256 of `text`.
    pub hash: String,
    pub metadata: ChunkMetadata,
}

/// A chunk together with its embedding.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

impl VectorRecord {
    pub fn chunk_id(&self) -> &str {
        &self.chunk.id
    }

    pub fn dims(&self) -> usize {
        self.embedding.len()
    }
}

/// A retrieved chunk and its similarity in `[0, 1]`.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(kb: &str, path: &str, hash: &str) -> SourceDocument {
        SourceDocument {
            knowledge_base_id: kb.to_string(),
            path: path.to_string(),
            content_hash: hash.to_string(),
            byte_size: 4,
            modified_at: 0,
            declared_type: extension_of(path),
            kind: DocumentKind::from_path(path),
            text: "body".to_string(),
        }
    }

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(DocumentKind::from_extension("MD"), DocumentKind::PlainText);
        assert_eq!(DocumentKind::from_extension("docx"), DocumentKind::RichDocument);
        assert_eq!(DocumentKind::from_extension("pptx"), DocumentKind::SlideDeck);
        assert_eq!(DocumentKind::from_extension("xlsx"), DocumentKind::Spreadsheet);
        assert_eq!(DocumentKind::from_extension("ipynb"), DocumentKind::Notebook);
        assert_eq!(DocumentKind::from_extension("pdf"), DocumentKind::Pdf);
        assert_eq!(
            DocumentKind::from_extension("rs"),
            DocumentKind::SourceCode {
                language: "rust".to_string()
            }
        );
        assert_eq!(DocumentKind::from_extension("weird"), DocumentKind::PlainText);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a/b/main.RS"), "rs");
        assert_eq!(extension_of("README"), "");
        assert_eq!(extension_of("dir.d/.bashrc"), "");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
    }

    #[test]
    fn test_language_display_name() {
        assert_eq!(language_display_name("rust"), "Rust");
        assert_eq!(language_display_name("jsx"), "React JSX");
        assert_eq!(language_display_name("brainfuck"), "Code");
    }

    #[test]
    fn test_identity_scoped_by_path_and_kb() {
        let a = doc("kb1", "a.md", "h");
        let b = doc("kb1", "b.md", "h");
        let c = doc("kb2", "a.md", "h");
        assert_ne!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
        assert_eq!(a.identity(), doc("kb1", "a.md", "h").identity());
        assert_eq!(a.identity().len(), 32);
    }
}
