//! Core data models used throughout the pack.
//!
//! These types represent the archives, nodes, and query results that flow
//! through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// One exported archive discovered under the base path.
#[derive(Debug, Clone)]
pub struct ExportedArchive {
    /// Path relative to the base path, `/`-separated. Stable archive id.
    pub id: String,
    /// File stem, e.g. `annual-report` for `annual-report.zip`.
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// What a node was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A chunk of page text.
    Text,
    /// A table export (title, description, flattened cells).
    Table,
    /// An annotated image.
    Image,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Text => "text",
            NodeKind::Table => "table",
            NodeKind::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(NodeKind::Text),
            "table" => Some(NodeKind::Table),
            "image" => Some(NodeKind::Image),
            _ => None,
        }
    }

    /// Text and table nodes are document nodes.
    pub fn is_document(&self) -> bool {
        !matches!(self, NodeKind::Image)
    }
}

/// Image content carried by an image node. Exactly one representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ImagePayload {
    /// Raster bytes embedded as base64.
    Inline { base64: String, mime: String },
    /// Reference produced by an image-to-URL resolver.
    Url { url: String },
}

/// A retrievable unit stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub archive_id: String,
    pub file_name: String,
    pub page_label: String,
    pub kind: NodeKind,
    /// Text used for embedding, keyword search, and generation context.
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImagePayload>,
}

impl Node {
    pub fn is_image(&self) -> bool {
        self.kind == NodeKind::Image
    }
}

/// Deterministic node id: the same archive content always yields the same ids,
/// which keeps repeated refreshes free of duplicates.
pub fn node_id(archive_id: &str, kind: NodeKind, page_label: &str, ordinal: usize) -> String {
    let key = format!("{}|{}|{}|{}", archive_id, kind.as_str(), page_label, ordinal);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// A node returned by retrieval, with its backend relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredNode {
    pub node: Node,
    pub score: f64,
}

/// Answer plus the nodes that supported it, in retrieval rank order.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub answer: String,
    pub source_nodes: Vec<ScoredNode>,
}

impl QueryResult {
    pub fn image_nodes(&self) -> impl Iterator<Item = &ScoredNode> {
        self.source_nodes.iter().filter(|n| n.node.is_image())
    }
}

/// Per-archive bookkeeping kept by every index backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: String,
    pub file_name: String,
    pub content_hash: String,
    pub node_count: i64,
    pub ingested_at: i64,
}

/// Node counts by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub archives: i64,
    pub text_nodes: i64,
    pub table_nodes: i64,
    pub image_nodes: i64,
    pub embedded_nodes: i64,
}

impl IndexStats {
    pub fn total_nodes(&self) -> i64 {
        self.text_nodes + self.table_nodes + self.image_nodes
    }
}
