//! # fsindex
//!
//! Keeps a vector search index in sync with a watched file tree.
//!
//! A file watcher turns file-system notifications into normalized change
//! events. The indexing pipeline extracts text from each changed file,
//! summarizes it with a language model, embeds the summary, and upserts one
//! vector per file into a vector store, keyed by a stable file identity
//! that survives renames. A query service embeds search text and returns
//! the closest files above a similarity threshold.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────┐   ┌────────────────────────────────┐   ┌──────────────┐
//! │ Watcher  │──▶│ Queue │──▶│ Pipeline                       │──▶│ Vector store │
//! │ + scan   │   └───────┘   │ extract→chunk→summarize→embed  │   │ Qdrant / mem │
//! └──────────┘               └──────────────┬─────────────────┘   └──────┬───────┘
//!                                           ▼                            │
//!                                    ┌──────────────┐   ┌────────────┐   │
//!                                    │ Record store │◀──│   Query    │◀──┘
//!                                    │   (SQLite)   │   │  service   │
//!                                    └──────────────┘   └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy and outcome mapping |
//! | [`filter`] | Include/exclude path eligibility |
//! | [`watcher`] | Debounced file-system watcher |
//! | [`scan`] | Startup reconciliation |
//! | [`queue`] | Bounded change-event queue |
//! | [`slots`] | Per-path run serialization |
//! | [`pipeline`] | Extract, chunk, summarize, embed, upsert |
//! | [`extract`] | Text, PDF, DOCX, and image extraction |
//! | [`chunk`] | Boundary-aware chunking |
//! | [`provider`] | Local and online model providers |
//! | [`vector_store`] | Qdrant and in-memory vector stores |
//! | [`records`] | File identity and lifecycle records |
//! | [`query`] | Semantic search |
//! | [`daemon`] | Composition root and watch loop |
//! | [`admin`] | Administrative commands |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod admin;
pub mod chunk;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod extract;
pub mod filter;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod query;
pub mod queue;
pub mod records;
pub mod scan;
pub mod slots;
pub mod vector_store;
pub mod watcher;
