//! # HelloRAG Pack
//!
//! Retrieval-augmented question answering over HelloRAG document exports.
//!
//! A HelloRAG export is a zip archive holding per-page text, tables as HTML
//! fragments, and page images described by an `image.json` manifest. The
//! pack discovers exports under a base directory, turns each one into text,
//! table and image nodes, writes them to an index, and answers questions
//! against that index with an LLM.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │  *.zip      │──▶│  Parse+Chunk │──▶│  Index backend    │
//! │  base_path  │   │  +Embed      │   │  SQLite / Qdrant  │
//! └─────────────┘   └──────────────┘   └────────┬─────────┘
//!                                               │
//!                                               ▼
//!                                        ┌─────────────┐
//!                                        │ QueryEngine │──▶ LLM
//!                                        └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hellorag --config pack.toml build              # ingest ./exports
//! hellorag --config pack.toml retrieve "revenue"  # top-k nodes
//! hellorag --config pack.toml query "What was Q1 revenue?"
//! hellorag --config pack.toml stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`source`] | Export discovery |
//! | [`archive`] | Export archive parsing |
//! | [`table`] | HTML table extraction |
//! | [`chunk`] | Text chunking |
//! | [`image_url`] | Image-to-URL resolvers |
//! | [`ingest`] | Archive ingestion and refresh reports |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Answer generation providers |
//! | [`store`] | Index backends |
//! | [`backend`] | Backend selection and attachment |
//! | [`lifecycle`] | Build-or-load index management |
//! | [`query`] | Retrieval and QA prompting |
//! | [`chat`] | Multi-turn chat sessions |
//! | [`pack`] | The pack façade |
//! | [`progress`] | Refresh progress reporting |
//! | [`stats`] | Index statistics |
//! | [`logging`] | Diagnostic logging setup |

pub mod archive;
pub mod backend;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod image_url;
pub mod ingest;
pub mod lifecycle;
pub mod llm;
pub mod logging;
pub mod models;
pub mod pack;
pub mod progress;
pub mod query;
pub mod source;
pub mod stats;
pub mod store;
pub mod table;

pub use backend::{IndexHandle, IndexLocation, StorageContext};
pub use chat::ChatSession;
pub use error::{PackError, PackResult};
pub use ingest::RefreshReport;
pub use lifecycle::PackOptions;
pub use models::{Node, NodeKind, QueryResult, ScoredNode};
pub use pack::HelloRagPack;
