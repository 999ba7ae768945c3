//! Index storage abstraction.
//!
//! The [`IndexBackend`] trait defines every storage operation the lifecycle
//! manager and query façade need, so that a local SQLite index and an
//! external vector database are interchangeable behind one handle.
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | [`SqliteIndex`] | [`sqlite`] | local persisted index directory |
//! | [`QdrantStore`] | [`qdrant`] | external vector database collection |
//! | [`InMemoryIndex`] | [`memory`] | tests and throwaway sessions |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod qdrant;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ArchiveRecord, IndexStats, Node, ScoredNode};

pub use memory::InMemoryIndex;
pub use qdrant::QdrantStore;
pub use sqlite::SqliteIndex;

/// Abstract storage backend for the pack.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_archive`](IndexBackend::replace_archive) | Atomically swap one archive's node set |
/// | [`remove_archive`](IndexBackend::remove_archive) | Prune an archive and its nodes |
/// | [`archives`](IndexBackend::archives) | List ingested archives |
/// | [`vector_search`](IndexBackend::vector_search) | Cosine similarity search |
/// | [`keyword_search`](IndexBackend::keyword_search) | Full-text search |
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Human-readable location, e.g. the index directory or collection URL.
    fn name(&self) -> &str;

    /// Cheap round-trip proving the backend is reachable.
    async fn health_check(&self) -> Result<()>;

    /// Replace every node of `record.id` with `nodes`.
    ///
    /// `vectors`, when given, is parallel to `nodes`.
    async fn replace_archive(
        &self,
        record: &ArchiveRecord,
        nodes: &[Node],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<()>;

    async fn remove_archive(&self, archive_id: &str) -> Result<()>;

    /// Ingested archives, sorted by id.
    async fn archives(&self) -> Result<Vec<ArchiveRecord>>;

    /// Node ids of one archive, sorted.
    async fn node_ids(&self, archive_id: &str) -> Result<Vec<String>>;

    async fn stats(&self) -> Result<IndexStats>;

    /// Nodes closest to `query_vec`, best first.
    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredNode>>;

    /// Nodes matching the query terms, best first.
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ScoredNode>>;

    /// Embedding model recorded by the last refresh, if any.
    async fn embedding_model(&self) -> Result<Option<String>>;

    /// Record the model the stored vectors came from; `None` clears it.
    async fn set_embedding_model(&self, model: Option<&str>) -> Result<()>;

    /// Release connections. The backend is not used afterwards.
    async fn close(&self) {}
}

/// Lowercased alphanumeric terms of a free-text query.
pub(crate) fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_terms_drop_punctuation() {
        assert_eq!(
            query_terms("What was Q4 revenue?  (FY-2023)"),
            vec!["what", "was", "q4", "revenue", "fy", "2023"]
        );
        assert!(query_terms("?!").is_empty());
    }
}
