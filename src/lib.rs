//! # fusion-rag
//!
//! A hybrid retrieval assistant that answers questions from two sources at
//! once: unstructured documents held in a persistent vector index, and a
//! relational company database queried by an agent that writes its own SQL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  PDF / URL  │──▶│  Ingestion  │──▶│ Vector Store │
//! │  DOCX/PPTX  │   │ Extract+Emb │   │ index+payload│
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │ top-k documents
//!                   ┌─────────────┐   ┌──────▼───────┐   ┌───────────┐
//!   SQLite ◀───────▶│  SQL Agent  │──▶│    Fusion    │──▶│ Generator │
//!                   │ (tool loop) │   │   context    │   │  answer   │
//!                   └─────────────┘   └──────────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag init                          # create the vector store
//! rag ingest ./docs https://example.com/about
//! rag search "parental leave policy"
//! rag sql "How many employees work in Sales?"
//! rag ask "Who manages the Apollo project and what is it about?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy shared by all components |
//! | [`models`] | Documents and metadata |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Persistent flat L2 vector store |
//! | [`extract`] | Text extraction from PDFs, office files and web pages |
//! | [`chunk`] | Optional paragraph chunking |
//! | [`ingest`] | Ingestion pipeline |
//! | [`db`] | SQLite connection |
//! | [`sql`] | Schema descriptor, query executor and SQL agent |
//! | [`generation`] | Chat completion client |
//! | [`fusion`] | Context fusion engine |
//! | [`app`] | Component wiring from a [`config::Config`] |

pub mod app;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fusion;
pub mod generation;
mod http;
pub mod ingest;
pub mod models;
pub mod sql;
pub mod store;

pub use error::{RagError, RagResult};
