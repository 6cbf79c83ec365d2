//! Context assembly: turning ranked chunks into one bounded text payload
//! for a downstream generation call.

use serde::Serialize;

use crate::models::ScoredChunk;

pub const SEPARATOR: &str = "\n\n---\n\n";
pub const TRUNCATION_MARKER: &str = "\n\n[... context truncated ...]";

/// Limits applied when assembling context.
#[derive(Debug, Clone, Copy)]
pub struct ContextOptions {
    /// Chunks to include.
    pub max_chunks: usize,
    /// Hard ceiling on `max_chunks`.
    pub ceiling: usize,
    /// Maximum characters in the assembled text, marker included.
    pub char_budget: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_chunks: 5,
            ceiling: 20,
            char_budget: 50_000,
        }
    }
}

/// One source that contributed to an assembled context.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSource {
    pub path: String,
    pub ordinal: usize,
    pub score: f64,
}

/// Assembled, source-tagged context.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    pub text: String,
    pub sources: Vec<ContextSource>,
    pub truncated: bool,
}

/// Concatenate up to `max_chunks` ranked chunks (never more than
/// `ceiling`) as `Source: <path>` blocks.
///
/// If the result exceeds `char_budget` characters, the tail is cut and
/// [`TRUNCATION_MARKER`] appended so the total still fits the budget.
pub fn assemble_context(chunks: &[ScoredChunk], options: &ContextOptions) -> AssembledContext {
    let limit = options.max_chunks.min(options.ceiling);
    let selected = &chunks[..chunks.len().min(limit)];

    let blocks: Vec<String> = selected
        .iter()
        .map(|c| format!("Source: {}\n{}", c.chunk.document_path, c.chunk.text))
        .collect();
    let full = blocks.join(SEPARATOR);

    let mut sources: Vec<ContextSource> = selected
        .iter()
        .map(|c| ContextSource {
            path: c.chunk.document_path.clone(),
            ordinal: c.chunk.ordinal,
            score: c.score,
        })
        .collect();

    let total = full.chars().count();
    if total <= options.char_budget {
        return AssembledContext {
            text: full,
            sources,
            truncated: false,
        };
    }

    let marker_len = TRUNCATION_MARKER.chars().count();
    let keep = options.char_budget.saturating_sub(marker_len);
    let mut text: String = full.chars().take(keep).collect();
    if options.char_budget >= marker_len {
        text.push_str(TRUNCATION_MARKER);
    }

    // Drop sources whose block was cut away entirely.
    let mut offset = 0;
    let mut visible = 0;
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            offset += SEPARATOR.chars().count();
        }
        if offset >= keep {
            break;
        }
        visible += 1;
        offset += block.chars().count();
    }
    sources.truncate(visible);

    AssembledContext {
        text,
        sources,
        truncated: true,
    }
}
