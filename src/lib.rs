//! # Knowledge Harness
//!
//! Local-file knowledge bases with similarity search.
//!
//! Knowledge Harness walks a directory, keeps secrets, dependencies, build
//! output and binary noise out through a content admission filter,
//! normalizes each admitted file into plain text, chunks and embeds it, and
//! stores the vectors in SQLite under a named knowledge base. Queries embed
//! the question, rank stored chunks by cosine similarity, and can assemble
//! a bounded, source-tagged context for a downstream model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────────┐   ┌──────────┐
//! │ Scanner  │──▶│ Normalize │──▶│ Chunk + Embed │──▶│  SQLite  │
//! │ + Filter │   │ pdf/docx… │   │   (batched)   │   │ vectors  │
//! └──────────┘   └───────────┘   └───────────────┘   └────┬─────┘
//!                                                         │
//!                                  ┌──────────────────────┤
//!                                  ▼                      ▼
//!                            ┌──────────┐           ┌──────────┐
//!                            │   CLI    │           │   HTTP   │
//!                            │   (kh)   │           │  (axum)  │
//!                            └──────────┘           └──────────┘
//! ```
//!
//! The filter, chunker, retrieval engine and context assembly live in the
//! `knowledge-harness-core` crate; this crate supplies I/O around them.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection and engine wiring |
//! | [`embedding`] | Embedding providers (OpenAI, OpenRouter, Ollama, hash, local) |
//! | [`extract`] | Text extraction for PDF, Office and notebook formats |
//! | [`ingest`] | Indexing pipeline, reindex and change queue |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`migrate`] | Schema migrations |
//! | [`normalize`] | File → normalized document |
//! | [`preview`] | Dry-run admission report |
//! | [`scanner`] | Directory traversal with the admission filter |
//! | [`search`] | Search and context front-ends |
//! | [`server`] | HTTP API |
//! | [`sqlite_store`] | SQLite `VectorStore` |
//! | [`stats`] | Store statistics |

pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod normalize;
pub mod preview;
pub mod scanner;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
