//! # Knowledge Harness Core
//!
//! Ingestion and retrieval logic for Knowledge Harness, free of any
//! database, async runtime or filesystem dependency.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`filter`] | Content admission: rule tables, presets, ignore patterns |
//! | [`chunk`] | Overlapping character windows with position metadata |
//! | [`embedding`] | Embedding capability trait, hash embedder, vector helpers |
//! | [`store`] | `VectorStore` trait and an in-memory implementation |
//! | [`retrieval`] | Indexing and similarity queries over a store |
//! | [`context`] | Budgeted context assembly from ranked chunks |
//! | [`models`] | Documents, chunks, vector records, knowledge bases |
//! | [`error`] | Shared error taxonomy |
//!
//! The `knowledge-harness` crate supplies the SQLite store, document
//! normalization, network embedding providers, CLI and HTTP server.

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod models;
pub mod retrieval;
pub mod store;

pub use error::{KbError, Result};
