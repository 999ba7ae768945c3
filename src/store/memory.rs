//! In-memory [`IndexBackend`] for tests and throwaway sessions.
//!
//! Vector search is brute-force cosine similarity over all stored vectors.
//! Keyword search scores nodes by how often the query terms occur.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use super::{query_terms, IndexBackend};
use crate::embedding::cosine_similarity;
use crate::models::{ArchiveRecord, IndexStats, Node, NodeKind, ScoredNode};

struct StoredNode {
    node: Node,
    vector: Option<Vec<f32>>,
}

#[derive(Default)]
struct State {
    archives: BTreeMap<String, ArchiveRecord>,
    nodes: Vec<StoredNode>,
    embedding_model: Option<String>,
}

#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<State>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn rank(mut scored: Vec<ScoredNode>, limit: usize) -> Vec<ScoredNode> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

#[async_trait]
impl IndexBackend for InMemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn replace_archive(
        &self,
        record: &ArchiveRecord,
        nodes: &[Node],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<()> {
        let mut state = self.state.write();
        state.nodes.retain(|s| s.node.archive_id != record.id);
        for (i, node) in nodes.iter().enumerate() {
            state.nodes.push(StoredNode {
                node: node.clone(),
                vector: vectors.and_then(|v| v.get(i)).cloned(),
            });
        }
        state.archives.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn remove_archive(&self, archive_id: &str) -> Result<()> {
        let mut state = self.state.write();
        state.nodes.retain(|s| s.node.archive_id != archive_id);
        state.archives.remove(archive_id);
        Ok(())
    }

    async fn archives(&self) -> Result<Vec<ArchiveRecord>> {
        Ok(self.state.read().archives.values().cloned().collect())
    }

    async fn node_ids(&self, archive_id: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        let mut ids: Vec<String> = state
            .nodes
            .iter()
            .filter(|s| s.node.archive_id == archive_id)
            .map(|s| s.node.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let state = self.state.read();
        let mut stats = IndexStats {
            archives: state.archives.len() as i64,
            ..IndexStats::default()
        };
        for stored in &state.nodes {
            match stored.node.kind {
                NodeKind::Text => stats.text_nodes += 1,
                NodeKind::Table => stats.table_nodes += 1,
                NodeKind::Image => stats.image_nodes += 1,
            }
            if stored.vector.is_some() {
                stats.embedded_nodes += 1;
            }
        }
        Ok(stats)
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredNode>> {
        let state = self.state.read();
        let scored = state
            .nodes
            .iter()
            .filter_map(|s| {
                s.vector.as_ref().map(|v| ScoredNode {
                    node: s.node.clone(),
                    score: cosine_similarity(query_vec, v) as f64,
                })
            })
            .collect();
        Ok(rank(scored, limit))
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ScoredNode>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.read();
        let scored = state
            .nodes
            .iter()
            .filter_map(|s| {
                let node_terms = query_terms(&s.node.text);
                let hits = node_terms.iter().filter(|t| terms.contains(t)).count();
                (hits > 0).then(|| ScoredNode {
                    node: s.node.clone(),
                    score: hits as f64,
                })
            })
            .collect();
        Ok(rank(scored, limit))
    }

    async fn embedding_model(&self) -> Result<Option<String>> {
        Ok(self.state.read().embedding_model.clone())
    }

    async fn set_embedding_model(&self, model: Option<&str>) -> Result<()> {
        self.state.write().embedding_model = model.map(str::to_string);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::node_id;

    fn node(archive: &str, ordinal: usize, text: &str) -> Node {
        Node {
            id: node_id(archive, NodeKind::Text, "1", ordinal),
            archive_id: archive.to_string(),
            file_name: "f".to_string(),
            page_label: "1".to_string(),
            kind: NodeKind::Text,
            text: text.to_string(),
            hash: String::new(),
            table_html: None,
            image: None,
        }
    }

    fn record(id: &str) -> ArchiveRecord {
        ArchiveRecord {
            id: id.to_string(),
            file_name: "f".to_string(),
            content_hash: String::new(),
            node_count: 0,
            ingested_at: 0,
        }
    }

    #[tokio::test]
    async fn keyword_search_counts_term_hits() {
        let index = InMemoryIndex::new();
        index
            .replace_archive(
                &record("a.zip"),
                &[
                    node("a.zip", 0, "revenue"),
                    node("a.zip", 1, "revenue and more revenue"),
                    node("a.zip", 2, "nothing relevant"),
                ],
                None,
            )
            .await
            .unwrap();

        let hits = index.keyword_search("Revenue?", 10).await.unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.node.text.as_str()).collect();
        assert_eq!(texts, vec!["revenue and more revenue", "revenue"]);
    }

    #[tokio::test]
    async fn replace_drops_previous_vectors() {
        let index = InMemoryIndex::new();
        let nodes = [node("a.zip", 0, "x")];
        index
            .replace_archive(&record("a.zip"), &nodes, Some(vec![vec![1.0, 0.0]].as_slice()))
            .await
            .unwrap();
        index.replace_archive(&record("a.zip"), &nodes, None).await.unwrap();

        assert!(index.vector_search(&[1.0, 0.0], 5).await.unwrap().is_empty());
        assert_eq!(index.stats().await.unwrap().text_nodes, 1);
    }
}
