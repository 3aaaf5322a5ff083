//! # ragline
//!
//! Retrieval-augmented answering over your own documents: ingest files into
//! a local SQLite-backed index, then ask questions answered from — and cited
//! against — what was indexed.
//!
//! ```text
//!              ingest path                           query path
//!  ┌────────┐  ┌─────────┐  ┌───────┐  ┌───────┐    ┌─────────┐
//!  │ source │→ │ extract │→ │ chunk │→ │ embed │    │  embed  │
//!  └────────┘  └─────────┘  └───────┘  └───┬───┘    └────┬────┘
//!                                          ▼             ▼
//!                                   ┌─────────────────────────┐
//!                                   │       vector store      │
//!                                   └────────────┬────────────┘
//!                                                ▼
//!                                  ┌────────┐  ┌─────────┐  ┌──────────┐
//!                                  │ filter │→ │ prompt  │→ │ generate │
//!                                  └────────┘  └─────────┘  └──────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`config`] | TOML configuration with validated defaults |
//! | [`error`] | Upstream model-service error taxonomy |
//! | [`models`] | Documents, chunks, retrieval results, query responses |
//! | [`source`] | Document sources (filesystem walker) |
//! | [`extract`] | Content-type dispatch to text extractors |
//! | [`chunk`] | Structure-aware text splitting with overlap |
//! | [`embedding`] | Embedding client (OpenAI-compatible) |
//! | [`generate`] | Completion client (OpenAI-compatible) |
//! | [`store`] | Vector store trait, schemas, similarity metrics |
//! | [`store_memory`] / [`store_sqlite`] | Store backends |
//! | [`ingest`] | Ingestion pipeline, worker queue, document registry |
//! | [`retrieve`] | Query-time retrieval with relevance floor |
//! | [`prompt`] | Budgeted prompt assembly with citations |
//! | [`answer`] | Query orchestration and no-context policy |
//! | [`server`] | JSON HTTP API |
//! | [`db`] / [`migrate`] | SQLite pool and schema migrations |
//! | [`status`] | CLI status report |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod server;
pub mod source;
pub mod status;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
