//! # Knowledge Harness CLI (`kh`)
//!
//! The `kh` binary indexes local directories into named knowledge bases and
//! answers similarity queries over them.
//!
//! ## Usage
//!
//! ```bash
//! kh --config ./config/kh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kh init` | Create the SQLite database and the `default` knowledge base |
//! | `kh kb create/list/delete` | Manage knowledge bases |
//! | `kh preview <root>` | Show what an index run would admit and skip |
//! | `kh index <root>` | Index a directory into a knowledge base |
//! | `kh reindex <file>` | Re-evaluate and re-index a single file |
//! | `kh search "<query>"` | Similarity search |
//! | `kh context "<query>"` | Search and assemble a source-tagged context |
//! | `kh docs list/remove` | Inspect or remove indexed documents |
//! | `kh stats` | Store statistics |
//! | `kh serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! kh init
//! kh preview ~/notes
//! kh index ~/notes --kb notes
//! kh search "borrow checker" --kb notes --type md
//! kh context "how do I bake bread" --limit 3
//! kh serve
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use knowledge_harness::config::{self, Config};
use knowledge_harness::ingest::{CancelFlag, FileOutcome, IndexOptions, IndexSummary, Indexer};
use knowledge_harness::search::SearchRequest;
use knowledge_harness::server::DEFAULT_KNOWLEDGE_BASE;
use knowledge_harness::sqlite_store::SqliteStore;
use knowledge_harness::{db, logging, preview, search, server, stats};
use knowledge_harness_core::filter::Preset;
use knowledge_harness_core::models::KnowledgeBase;
use knowledge_harness_core::store::VectorStore;

/// Knowledge Harness CLI: local-file knowledge bases with similarity
/// search.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kh",
    about = "Knowledge Harness: index local files into knowledge bases and search them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and the `default` knowledge base.
    ///
    /// Idempotent; running it again is safe.
    Init,

    /// Manage knowledge bases.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Show what indexing a directory would admit and skip. Writes nothing.
    Preview {
        root: PathBuf,

        /// Filter preset: auto, code, notes, research, default, none.
        #[arg(long)]
        preset: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Index a directory into a knowledge base.
    Index {
        root: PathBuf,

        #[arg(long, default_value = DEFAULT_KNOWLEDGE_BASE)]
        kb: String,

        /// Re-embed every file, even when unchanged.
        #[arg(long)]
        full: bool,

        /// Remove stored documents that are no longer admitted.
        #[arg(long)]
        prune: bool,

        /// Filter preset: auto, code, notes, research, default, none.
        #[arg(long)]
        preset: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Re-evaluate and re-index one file. A missing or rejected file is
    /// removed from the knowledge base.
    Reindex {
        /// File path, relative to `--root` (or absolute, inside it).
        file: PathBuf,

        #[arg(long, default_value = ".")]
        root: PathBuf,

        #[arg(long, default_value = DEFAULT_KNOWLEDGE_BASE)]
        kb: String,
    },

    /// Similarity search over one or more knowledge bases.
    Search {
        query: String,
        #[command(flatten)]
        filters: QueryFilters,
    },

    /// Search and assemble a source-tagged context string.
    Context {
        query: String,
        #[command(flatten)]
        filters: QueryFilters,
    },

    /// Inspect or remove indexed documents.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Show store statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum KbAction {
    Create { name: String },
    List {
        #[arg(long)]
        json: bool,
    },
    /// Delete a knowledge base with all of its documents.
    Delete { name: String },
}

#[derive(Subcommand)]
enum DocsAction {
    List {
        #[arg(long, default_value = DEFAULT_KNOWLEDGE_BASE)]
        kb: String,
        #[arg(long)]
        json: bool,
    },
    Remove {
        /// Stored document path, relative to the indexed root.
        path: String,
        #[arg(long, default_value = DEFAULT_KNOWLEDGE_BASE)]
        kb: String,
    },
}

#[derive(clap::Args)]
struct QueryFilters {
    /// Knowledge base to search (repeatable). Defaults to all.
    #[arg(long = "kb")]
    knowledge_bases: Vec<String>,

    /// Number of results (search) or chunks (context).
    #[arg(long)]
    limit: Option<usize>,

    /// Only files with this extension (repeatable).
    #[arg(long = "type")]
    types: Vec<String>,

    /// Only files under this relative path prefix.
    #[arg(long)]
    path_prefix: Option<String>,

    /// Only source code in this language (e.g. `rust`).
    #[arg(long)]
    language: Option<String>,

    #[arg(long)]
    json: bool,
}

impl QueryFilters {
    fn request(&self, query: &str) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            knowledge_bases: self.knowledge_bases.clone(),
            limit: self.limit,
            types: self.types.clone(),
            path_prefix: self.path_prefix.clone(),
            language: self.language.clone(),
        }
    }
}

fn parse_preset(preset: Option<&str>) -> Result<Option<Preset>> {
    preset
        .map(|p| p.parse::<Preset>().map_err(anyhow::Error::msg))
        .transpose()
}

fn warn_if_high_risk(config: &Config, preset: Option<Preset>) {
    let high_risk = match preset {
        Some(p) => p.is_high_risk(),
        None => config.filter.preset.eq_ignore_ascii_case("none"),
    };
    if high_risk {
        warn!("filter preset 'none' is high risk: only sensitive file names are blocked");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&cfg).await?,
        Commands::Kb { action } => run_kb(&cfg, action).await?,
        Commands::Preview { root, preset, json } => {
            let preset = parse_preset(preset.as_deref())?;
            warn_if_high_risk(&cfg, preset);
            preview::run_preview(&root, &cfg.filter, preset, json).await?;
        }
        Commands::Index {
            root,
            kb,
            full,
            prune,
            preset,
            json,
        } => {
            let options = IndexOptions {
                full,
                prune,
                preset: parse_preset(preset.as_deref())?,
            };
            warn_if_high_risk(&cfg, options.preset);
            let engine = db::open_engine(&cfg).await?;
            let indexer = Indexer::from_config(&cfg, engine);

            let cancel = CancelFlag::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; finishing in-flight files");
                    on_signal.cancel();
                }
            });

            let summary = indexer.run_index(&root, &kb, &options, &cancel).await?;
            print_index_summary(&root, &summary, json)?;
        }
        Commands::Reindex { file, root, kb } => {
            let rel = relative_to_root(&root, &file)?;
            let engine = db::open_engine(&cfg).await?;
            let indexer = Indexer::from_config(&cfg, engine);
            let outcome = indexer.reindex(&root, &kb, &rel).await?;
            print_reindex_outcome(&rel, &outcome);
        }
        Commands::Search { query, filters } => {
            let engine = db::open_engine(&cfg).await?;
            search::run_search(&engine, &filters.request(&query), filters.json).await?;
        }
        Commands::Context { query, filters } => {
            let engine = db::open_engine(&cfg).await?;
            let options = cfg.retrieval.context_options();
            search::run_context(&engine, &filters.request(&query), &options, filters.json)
                .await?;
        }
        Commands::Docs { action } => run_docs(&cfg, action).await?,
        Commands::Stats { json } => {
            let engine = db::open_engine(&cfg).await?;
            let size = std::fs::metadata(&cfg.db.path).map(|m| m.len()).ok();
            stats::run_stats(&engine, size, json).await?;
        }
        Commands::Serve => {
            let engine = db::open_engine(&cfg).await?;
            let indexer = Indexer::from_config(&cfg, engine);
            server::run_server(&cfg, indexer).await?;
        }
    }

    Ok(())
}

async fn run_init(cfg: &Config) -> Result<()> {
    let store = db::open_store(cfg).await?;
    if store.get_knowledge_base(DEFAULT_KNOWLEDGE_BASE).await?.is_none() {
        store.create_knowledge_base(DEFAULT_KNOWLEDGE_BASE).await?;
    }
    println!("Database initialized at {}", cfg.db.path.display());
    println!("Knowledge base '{}' ready", DEFAULT_KNOWLEDGE_BASE);
    Ok(())
}

async fn run_kb(cfg: &Config, action: KbAction) -> Result<()> {
    let store = db::open_store(cfg).await?;
    match action {
        KbAction::Create { name } => {
            let name = name.trim();
            if name.is_empty() {
                bail!("Knowledge base name must not be empty");
            }
            let kb = store.create_knowledge_base(name).await?;
            println!("created knowledge base '{}' ({})", kb.name, kb.id);
        }
        KbAction::List { json } => {
            let kbs = store.list_knowledge_bases().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&kbs)?);
            } else if kbs.is_empty() {
                println!("No knowledge bases. Run `kh init` or `kh kb create <name>`.");
            } else {
                println!("{:<24} {:>6} {:>8}   CREATED", "NAME", "DOCS", "CHUNKS");
                for kb in &kbs {
                    println!(
                        "{:<24} {:>6} {:>8}   {}",
                        kb.knowledge_base.name,
                        kb.documents,
                        kb.chunks,
                        stats::format_ts_iso(kb.knowledge_base.created_at)
                    );
                }
            }
        }
        KbAction::Delete { name } => {
            if !store.delete_knowledge_base(&name).await? {
                bail!("Knowledge base not found: {}", name);
            }
            println!("deleted knowledge base '{}'", name);
        }
    }
    Ok(())
}

async fn run_docs(cfg: &Config, action: DocsAction) -> Result<()> {
    let store = db::open_store(cfg).await?;

    match action {
        DocsAction::List { kb, json } => {
            let kb = find_kb(store.as_ref(), &kb).await?;
            let docs = store.list_documents(&kb.id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
            } else if docs.is_empty() {
                println!("No documents in '{}'.", kb.name);
            } else {
                for doc in &docs {
                    println!(
                        "{:<48} {:<14} {:>4} chunks  {}",
                        doc.path,
                        doc.doc_type,
                        doc.chunk_count,
                        stats::format_ts_iso(doc.indexed_at)
                    );
                }
                println!();
                println!("{} document(s)", docs.len());
            }
        }
        DocsAction::Remove { path, kb } => {
            let kb = find_kb(store.as_ref(), &kb).await?;
            if !store.remove_document(&kb.id, &path).await? {
                bail!("Document not found in '{}': {}", kb.name, path);
            }
            println!("removed {}", path);
        }
    }
    Ok(())
}

async fn find_kb(store: &SqliteStore, name: &str) -> Result<KnowledgeBase> {
    store
        .get_knowledge_base(name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Knowledge base not found: {}", name))
}

/// Express `file` relative to `root`. Relative paths are taken as already
/// relative to the root.
fn relative_to_root(root: &Path, file: &Path) -> Result<String> {
    let rel = if file.is_absolute() {
        match file.strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => {
                let canonical_root = root.canonicalize()?;
                file.strip_prefix(&canonical_root)
                    .map(Path::to_path_buf)
                    .map_err(|_| {
                        anyhow::anyhow!(
                            "{} is not inside {}",
                            file.display(),
                            root.display()
                        )
                    })?
            }
        }
    } else {
        file.to_path_buf()
    };
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

fn print_index_summary(root: &Path, summary: &IndexSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!(
        "index {} → {} (preset: {})",
        root.display(),
        summary.knowledge_base,
        summary.preset
    );
    println!("  scanned:        {}", summary.scanned);
    println!("  admitted:       {}", summary.admitted);
    for (reason, count) in &summary.rejected_by_reason {
        println!("  rejected ({}): {}", reason, count);
    }
    println!("  indexed:        {}", summary.indexed);
    println!("  unchanged:      {}", summary.unchanged);
    println!("  removed:        {}", summary.removed);
    println!("  chunks written: {}", summary.chunks_written);
    for failure in summary
        .extraction_failures
        .iter()
        .chain(&summary.embedding_failures)
    {
        println!("  failed: {} ({})", failure.path, failure.error);
    }
    if summary.cancelled {
        println!("cancelled");
    } else {
        println!("ok");
    }
    Ok(())
}

fn print_reindex_outcome(path: &str, outcome: &FileOutcome) {
    match outcome {
        FileOutcome::Indexed { chunks } => println!("indexed {} ({} chunks)", path, chunks),
        FileOutcome::Unchanged => println!("unchanged {}", path),
        FileOutcome::Removed { removed: true } => println!("removed {}", path),
        FileOutcome::Removed { removed: false } => println!("not indexed {}", path),
        FileOutcome::Rejected { reason, rule } => println!(
            "rejected {} ({}{})",
            path,
            reason,
            rule.as_deref().map(|r| format!(": {}", r)).unwrap_or_default()
        ),
        FileOutcome::ExtractionFailed { error } | FileOutcome::EmbeddingFailed { error } => {
            println!("failed {} ({})", path, error)
        }
        FileOutcome::Cancelled => println!("cancelled {}", path),
    }
}
