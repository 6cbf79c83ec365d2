//! Overlapping character-window chunker.
//!
//! Splits normalized document text into windows of at most `chunk_size`
//! characters, each starting `overlap` characters before the previous
//! window's end.
//!
//! # Algorithm
//!
//! 1. Open a window at `start` and look `chunk_size` characters ahead.
//! 2. If that reaches the end of the text, emit the final window.
//! 3. Otherwise close the window at the last paragraph break (`\n\n`) in its
//!    back half, or hard-cut at the character limit when there is none.
//! 4. The next window opens `overlap` characters before the close. With
//!    `respect_boundaries`, the start moves back (at most `boundary_radius`
//!    characters) to the nearest paragraph break, then line or sentence end.
//!
//! With boundaries off, or in text without boundaries, window starts follow
//! `start[i + 1] = start[i] + chunk_size - overlap` exactly and the last
//! window ends at the text length.
//!
//! Offsets are character indices, not byte indices.
//!
//! # Example
//!
//! ```rust
//! use knowledge_harness_core::chunk::{split, ChunkParams};
//!
//! let text = "x".repeat(2400);
//! let spans = split(&text, &ChunkParams::default());
//! assert_eq!(spans.len(), 3);
//! assert_eq!(spans[2].end, 2400);
//! ```

use crate::error::{KbError, Result};
use crate::models::{sha256_hex, Chunk, ChunkMetadata, SourceDocument};

/// Chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub overlap: usize,
    /// How far back a restart may move to land on a boundary.
    pub boundary_radius: usize,
    pub respect_boundaries: bool,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
            boundary_radius: 100,
            respect_boundaries: true,
        }
    }
}

impl ChunkParams {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(KbError::InvalidInput("chunk_size must be > 0".to_string()));
        }
        if self.overlap >= self.chunk_size {
            return Err(KbError::InvalidInput(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// One window of the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub ordinal: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

fn is_paragraph_break(chars: &[char], pos: usize) -> bool {
    pos >= 2 && chars[pos - 1] == '\n' && chars[pos - 2] == '\n'
}

fn is_soft_break(chars: &[char], pos: usize) -> bool {
    if pos == 0 {
        return false;
    }
    let prev = chars[pos - 1];
    if prev == '\n' {
        return true;
    }
    pos >= 2 && prev.is_whitespace() && matches!(chars[pos - 2], '.' | '!' | '?')
}

/// Last paragraph break in `(floor, hard_end]`.
fn paragraph_close(chars: &[char], floor: usize, hard_end: usize) -> Option<usize> {
    (floor + 1..=hard_end)
        .rev()
        .find(|&p| is_paragraph_break(chars, p))
}

/// Nearest boundary at or before `ideal`, never at or below `floor`.
fn boundary_restart(chars: &[char], ideal: usize, radius: usize, floor: usize) -> Option<usize> {
    let lowest = ideal.saturating_sub(radius).max(floor + 1);
    if lowest > ideal {
        return None;
    }
    (lowest..=ideal)
        .rev()
        .find(|&p| is_paragraph_break(chars, p))
        .or_else(|| (lowest..=ideal).rev().find(|&p| is_soft_break(chars, p)))
}

/// Split `text` into ordered, overlapping windows.
///
/// Empty text yields no spans. `overlap` is clamped below `chunk_size` so
/// every step makes progress.
pub fn split(text: &str, params: &ChunkParams) -> Vec<Span> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    if n == 0 {
        return Vec::new();
    }

    let mut byte_at: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    byte_at.push(text.len());

    let size = params.chunk_size.max(1);
    let overlap = params.overlap.min(size - 1);

    let mut spans = Vec::new();
    let push = |start: usize, end: usize, spans: &mut Vec<Span>| {
        spans.push(Span {
            ordinal: spans.len(),
            start,
            end,
            text: text[byte_at[start]..byte_at[end]].to_string(),
        });
    };

    let mut start = 0;
    loop {
        let hard_end = (start + size).min(n);
        if hard_end == n {
            push(start, n, &mut spans);
            break;
        }

        let end = if params.respect_boundaries {
            // keep the close far enough out that the restart stays ahead of `start`
            let floor = start + (size / 2).max(overlap);
            paragraph_close(&chars, floor, hard_end).unwrap_or(hard_end)
        } else {
            hard_end
        };
        push(start, end, &mut spans);

        let ideal = end - overlap;
        start = if params.respect_boundaries {
            boundary_restart(&chars, ideal, params.boundary_radius, start).unwrap_or(ideal)
        } else {
            ideal
        };
    }

    spans
}

/// Chunk a normalized document into [`Chunk`] records.
///
/// Chunk ids are `<document identity>-<ordinal>`, so re-chunking the same
/// content at the same path reproduces the same ids.
pub fn chunk_document(doc: &SourceDocument, params: &ChunkParams) -> Vec<Chunk> {
    let spans = split(&doc.text, params);
    let total = spans.len();
    let identity = doc.identity();
    let metadata = ChunkMetadata {
        doc_type: doc.kind.as_str().to_string(),
        extension: doc.declared_type.clone(),
        language: doc.kind.language().map(str::to_string),
        knowledge_base_id: doc.knowledge_base_id.clone(),
    };

    spans
        .into_iter()
        .map(|span| Chunk {
            id: format!("{}-{}", identity, span.ordinal),
            document_path: doc.path.clone(),
            ordinal: span.ordinal,
            total,
            hash: sha256_hex(span.text.as_bytes()),
            text: span.text,
            char_start: span.start,
            char_end: span.end,
            metadata: metadata.clone(),
        })
        .collect()
}
