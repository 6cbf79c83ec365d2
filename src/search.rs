//! Similarity search and context assembly front-ends.
//!
//! [`SearchRequest`] is shared by the CLI and the HTTP API: it names the
//! knowledge bases to search and the metadata filters to apply, and turns
//! into a core [`Query`].

use anyhow::Result;
use serde::{Deserialize, Serialize};

use knowledge_harness_core::context::{assemble_context, AssembledContext, ContextOptions};
use knowledge_harness_core::error::KbError;
use knowledge_harness_core::models::ScoredChunk;
use knowledge_harness_core::retrieval::{Query, RetrievalEngine};
use knowledge_harness_core::store::{Field, Predicate};

const EXCERPT_CHARS: usize = 240;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Knowledge base names; empty searches all of them.
    #[serde(default)]
    pub knowledge_bases: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// File extensions, with or without the leading dot.
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl SearchRequest {
    pub fn predicate(&self) -> Option<Predicate> {
        let mut parts = Vec::new();
        let types: Vec<String> = self
            .types
            .iter()
            .map(|t| t.trim_start_matches('.').to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        match types.len() {
            0 => {}
            1 => parts.push(Predicate::Eq(Field::Extension, types[0].clone())),
            _ => parts.push(Predicate::In(Field::Extension, types)),
        }
        if let Some(prefix) = self.path_prefix.as_deref().filter(|p| !p.is_empty()) {
            parts.push(Predicate::PathPrefix(prefix.trim_start_matches("./").to_string()));
        }
        if let Some(language) = self.language.as_deref().filter(|l| !l.is_empty()) {
            parts.push(Predicate::Eq(Field::Language, language.to_ascii_lowercase()));
        }
        Predicate::all(parts)
    }

    pub fn to_query(&self) -> Query {
        Query {
            text: self.query.clone(),
            top_k: self.limit,
            predicate: self.predicate(),
            knowledge_bases: self.knowledge_bases.clone(),
        }
    }
}

/// A search result as printed or returned over HTTP.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub chunk_id: String,
    pub ordinal: usize,
    pub total: usize,
    pub score: f64,
    pub doc_type: String,
    pub language: Option<String>,
    pub text: String,
}

impl From<&ScoredChunk> for SearchHit {
    fn from(scored: &ScoredChunk) -> Self {
        let chunk = &scored.chunk;
        SearchHit {
            path: chunk.document_path.clone(),
            chunk_id: chunk.id.clone(),
            ordinal: chunk.ordinal,
            total: chunk.total,
            score: scored.score,
            doc_type: chunk.metadata.doc_type.clone(),
            language: chunk.metadata.language.clone(),
            text: chunk.text.clone(),
        }
    }
}

pub async fn search(
    engine: &RetrievalEngine,
    request: &SearchRequest,
) -> std::result::Result<Vec<SearchHit>, KbError> {
    let results = engine.query(&request.to_query()).await?;
    Ok(results.iter().map(SearchHit::from).collect())
}

/// Retrieve and assemble context. `request.limit` overrides the configured
/// chunk count, never beyond the ceiling.
pub async fn context(
    engine: &RetrievalEngine,
    request: &SearchRequest,
    options: &ContextOptions,
) -> std::result::Result<AssembledContext, KbError> {
    let mut options = *options;
    if let Some(limit) = request.limit {
        options.max_chunks = limit;
    }
    let wanted = options.max_chunks.clamp(1, options.ceiling.max(1));

    let mut query = request.to_query();
    query.top_k = Some(wanted);
    let results = engine.query(&query).await?;
    Ok(assemble_context(&results, &options))
}

pub async fn run_search(engine: &RetrievalEngine, request: &SearchRequest, json: bool) -> Result<()> {
    let hits = search(engine, request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} (chunk {}/{})",
            i + 1,
            hit.score,
            hit.path,
            hit.ordinal + 1,
            hit.total
        );
        println!("    type: {}", hit.doc_type);
        println!("    excerpt: \"{}\"", excerpt(&hit.text));
        println!("    id: {}", hit.chunk_id);
        println!();
    }
    Ok(())
}

pub async fn run_context(
    engine: &RetrievalEngine,
    request: &SearchRequest,
    options: &ContextOptions,
    json: bool,
) -> Result<()> {
    let assembled = context(engine, request, options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&assembled)?);
        return Ok(());
    }
    if assembled.sources.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!("{}", assembled.text);
    println!();
    println!("--- Sources ({}) ---", assembled.sources.len());
    for source in &assembled.sources {
        println!("[{:.2}] {} #{}", source.score, source.path, source.ordinal);
    }
    if assembled.truncated {
        println!("(context truncated to budget)");
    }
    Ok(())
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}…", &flat[..idx]),
        None => flat,
    }
}
