//! Qdrant-backed external index, spoken to over its REST API.
//!
//! Nodes live in the configured collection as points whose id is the node
//! id and whose payload is the serialized [`Node`]. Per-archive records and
//! the embedding model are kept in a companion `{collection}_meta`
//! collection with one-dimensional placeholder vectors. Both collections
//! are created lazily on the first write, so attaching for a load never
//! writes.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::IndexBackend;
use crate::backend::StorageContext;
use crate::models::{ArchiveRecord, IndexStats, Node, NodeKind, ScoredNode};

const SCROLL_PAGE: usize = 256;
const UPSERT_BATCH: usize = 128;
const EMBEDDING_MODEL_POINT: &str = "embedding_model";

pub struct QdrantStore {
    client: reqwest::Client,
    url: String,
    collection: String,
    meta_collection: String,
    api_key_env: Option<String>,
    location: String,
}

impl QdrantStore {
    /// Build a client. Performs no I/O.
    pub fn new(ctx: &StorageContext) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(ctx.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: ctx.url.trim_end_matches('/').to_string(),
            collection: ctx.collection.clone(),
            meta_collection: format!("{}_meta", ctx.collection),
            api_key_env: ctx.api_key_env.clone(),
            location: ctx.to_string(),
        })
    }

    /// Send one request and return its `result` field.
    /// `Ok(None)` means the collection does not exist (HTTP 404).
    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Option<Value>> {
        let mut request = self.client.request(method, format!("{}{}", self.url, path));
        if let Some(var) = &self.api_key_env {
            let key = std::env::var(var).map_err(|_| anyhow!("{} not set", var))?;
            request = request.header("api-key", key);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Qdrant request to {} failed", self.url))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Qdrant API error {}: {}", status, body_text);
        }

        let json: Value = response.json().await?;
        Ok(Some(json.get("result").cloned().unwrap_or(Value::Null)))
    }

    async fn ensure_collection(&self, name: &str, dims: usize) -> Result<()> {
        let path = format!("/collections/{}", name);
        if self.call(Method::GET, &path, None).await?.is_some() {
            return Ok(());
        }
        debug!(collection = name, dims, "creating Qdrant collection");
        self.call(
            Method::PUT,
            &path,
            Some(json!({ "vectors": { "size": dims, "distance": "Cosine" } })),
        )
        .await?;
        Ok(())
    }

    async fn upsert_points(&self, collection: &str, points: Vec<Value>) -> Result<()> {
        for batch in points.chunks(UPSERT_BATCH) {
            self.call(
                Method::PUT,
                &format!("/collections/{}/points?wait=true", collection),
                Some(json!({ "points": batch })),
            )
            .await?;
        }
        Ok(())
    }

    async fn delete_by_archive(&self, collection: &str, archive_id: &str) -> Result<()> {
        self.call(
            Method::POST,
            &format!("/collections/{}/points/delete?wait=true", collection),
            Some(json!({ "filter": archive_filter(archive_id) })),
        )
        .await?;
        Ok(())
    }

    /// Every payload in a collection matching `filter`, following scroll pages.
    async fn scroll_payloads(&self, collection: &str, filter: Option<Value>) -> Result<Vec<Value>> {
        let mut payloads = Vec::new();
        let mut offset = Value::Null;
        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": true,
                "with_vector": false,
            });
            if let Some(f) = &filter {
                body["filter"] = f.clone();
            }
            if !offset.is_null() {
                body["offset"] = offset.clone();
            }
            let Some(result) = self
                .call(
                    Method::POST,
                    &format!("/collections/{}/points/scroll", collection),
                    Some(body),
                )
                .await?
            else {
                return Ok(payloads);
            };

            if let Some(points) = result.get("points").and_then(|p| p.as_array()) {
                payloads.extend(points.iter().filter_map(|p| p.get("payload").cloned()));
            }
            offset = result.get("next_page_offset").cloned().unwrap_or(Value::Null);
            if offset.is_null() {
                return Ok(payloads);
            }
        }
    }

    async fn count(&self, filter: Value) -> Result<i64> {
        let result = self
            .call(
                Method::POST,
                &format!("/collections/{}/points/count", self.collection),
                Some(json!({ "filter": filter, "exact": true })),
            )
            .await?;
        Ok(result
            .and_then(|r| r.get("count").and_then(|c| c.as_i64()))
            .unwrap_or(0))
    }
}

fn archive_filter(archive_id: &str) -> Value {
    json!({ "must": [{ "key": "archive_id", "match": { "value": archive_id } }] })
}

fn meta_point_id(key: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

#[async_trait]
impl IndexBackend for QdrantStore {
    fn name(&self) -> &str {
        &self.location
    }

    async fn health_check(&self) -> Result<()> {
        self.call(Method::GET, "/collections", None)
            .await?
            .ok_or_else(|| anyhow!("{} does not look like a Qdrant server", self.url))?;
        Ok(())
    }

    async fn replace_archive(
        &self,
        record: &ArchiveRecord,
        nodes: &[Node],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<()> {
        let vectors = match vectors {
            Some(v) if v.len() == nodes.len() => v,
            Some(_) => bail!("vector count does not match node count"),
            None if nodes.is_empty() => &[][..],
            None => bail!("the Qdrant backend stores embeddings; configure an embedding provider"),
        };

        if let Some(first) = vectors.first() {
            self.ensure_collection(&self.collection, first.len()).await?;
        }
        self.ensure_collection(&self.meta_collection, 1).await?;

        self.delete_by_archive(&self.collection, &record.id).await?;

        let points = nodes
            .iter()
            .zip(vectors)
            .map(|(node, vector)| {
                Ok(json!({
                    "id": node.id,
                    "vector": vector,
                    "payload": serde_json::to_value(node)?,
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        self.upsert_points(&self.collection, points).await?;

        let mut payload = serde_json::to_value(record)?;
        payload["archive_id"] = json!(record.id);
        self.upsert_points(
            &self.meta_collection,
            vec![json!({
                "id": meta_point_id(&format!("archive:{}", record.id)),
                "vector": [1.0],
                "payload": payload,
            })],
        )
        .await?;

        debug!(archive = %record.id, nodes = nodes.len(), "replaced archive points");
        Ok(())
    }

    async fn remove_archive(&self, archive_id: &str) -> Result<()> {
        self.delete_by_archive(&self.collection, archive_id).await?;
        self.delete_by_archive(&self.meta_collection, archive_id).await?;
        Ok(())
    }

    async fn archives(&self) -> Result<Vec<ArchiveRecord>> {
        let mut records = self
            .scroll_payloads(&self.meta_collection, None)
            .await?
            .into_iter()
            .filter(|p| p.get("content_hash").is_some())
            .map(serde_json::from_value::<ArchiveRecord>)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn node_ids(&self, archive_id: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .scroll_payloads(&self.collection, Some(archive_filter(archive_id)))
            .await?
            .iter()
            .filter_map(|p| p.get("id").and_then(|id| id.as_str()).map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let kind_filter =
            |kind: NodeKind| json!({ "must": [{ "key": "kind", "match": { "value": kind.as_str() } }] });
        let text_nodes = self.count(kind_filter(NodeKind::Text)).await?;
        let table_nodes = self.count(kind_filter(NodeKind::Table)).await?;
        let image_nodes = self.count(kind_filter(NodeKind::Image)).await?;
        Ok(IndexStats {
            archives: self.archives().await?.len() as i64,
            text_nodes,
            table_nodes,
            image_nodes,
            // Every point carries a vector.
            embedded_nodes: text_nodes + table_nodes + image_nodes,
        })
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredNode>> {
        let Some(result) = self
            .call(
                Method::POST,
                &format!("/collections/{}/points/search", self.collection),
                Some(json!({ "vector": query_vec, "limit": limit, "with_payload": true })),
            )
            .await?
        else {
            return Ok(Vec::new());
        };

        result
            .as_array()
            .map(|hits| hits.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|hit| {
                let payload = hit
                    .get("payload")
                    .cloned()
                    .ok_or_else(|| anyhow!("Qdrant hit without payload"))?;
                Ok(ScoredNode {
                    node: serde_json::from_value(payload).context("invalid node payload")?,
                    score: hit.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0),
                })
            })
            .collect()
    }

    async fn keyword_search(&self, _query: &str, _limit: usize) -> Result<Vec<ScoredNode>> {
        bail!("the Qdrant backend only supports vector search; configure an embedding provider")
    }

    async fn embedding_model(&self) -> Result<Option<String>> {
        let filter = json!({ "must": [{ "key": "key", "match": { "value": EMBEDDING_MODEL_POINT } }] });
        Ok(self
            .scroll_payloads(&self.meta_collection, Some(filter))
            .await?
            .into_iter()
            .find_map(|p| p.get("model").and_then(|m| m.as_str()).map(str::to_string)))
    }

    async fn set_embedding_model(&self, model: Option<&str>) -> Result<()> {
        self.ensure_collection(&self.meta_collection, 1).await?;
        self.upsert_points(
            &self.meta_collection,
            vec![json!({
                "id": meta_point_id(EMBEDDING_MODEL_POINT),
                "vector": [1.0],
                "payload": { "key": EMBEDDING_MODEL_POINT, "model": model },
            })],
        )
        .await
    }
}
