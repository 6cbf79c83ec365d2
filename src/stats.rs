//! Store statistics and health overview.
//!
//! Provides a quick summary of what's indexed: knowledge bases, document
//! and chunk counts, vector coverage and dimensionality, and a breakdown by
//! declared file type. Used by `kh stats` and `GET /stats`.

use anyhow::Result;
use serde::Serialize;

use knowledge_harness_core::retrieval::RetrievalEngine;
use knowledge_harness_core::store::{KnowledgeBaseInfo, StoreStats};

/// Everything `kh stats` reports.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    #[serde(flatten)]
    pub totals: StoreStats,
    pub embedding_model: String,
    pub knowledge_base_details: Vec<KnowledgeBaseInfo>,
}

pub async fn collect(engine: &RetrievalEngine) -> Result<StatsReport> {
    let totals = engine.store().stats().await?;
    let knowledge_base_details = engine.store().list_knowledge_bases().await?;
    Ok(StatsReport {
        totals,
        embedding_model: engine.embedder().model_name().to_string(),
        knowledge_base_details,
    })
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(engine: &RetrievalEngine, db_size: Option<u64>, json: bool) -> Result<()> {
    let report = collect(engine).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let t = &report.totals;
    println!("Knowledge Harness: Store Stats");
    println!("===============================");
    println!();
    if let Some(size) = db_size {
        println!("  Size:        {}", format_bytes(size));
    }
    println!("  Model:       {}", report.embedding_model);
    println!(
        "  Dimensions:  {}",
        t.dimensions
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!();
    println!("  Knowledge bases: {}", t.knowledge_bases);
    println!("  Documents:       {}", t.documents);
    println!("  Chunks:          {}", t.chunks);
    println!(
        "  Vectors:         {} / {} ({}%)",
        t.vectors,
        t.chunks,
        if t.chunks > 0 {
            (t.vectors * 100) / t.chunks
        } else {
            0
        }
    );

    if !report.knowledge_base_details.is_empty() {
        println!();
        println!("  By knowledge base:");
        println!(
            "  {:<24} {:>6} {:>8}   {}",
            "NAME", "DOCS", "CHUNKS", "CREATED"
        );
        println!("  {}", "-".repeat(60));
        for kb in &report.knowledge_base_details {
            println!(
                "  {:<24} {:>6} {:>8}   {}",
                kb.knowledge_base.name,
                kb.documents,
                kb.chunks,
                format_ts_relative(kb.knowledge_base.created_at)
            );
        }
    }

    if !t.documents_by_type.is_empty() {
        println!();
        println!("  By type:");
        for (ext, count) in &t.documents_by_type {
            let label = if ext.is_empty() { "(none)" } else { ext.as_str() };
            println!("  {:<24} {:>6}", label, count);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
pub fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
