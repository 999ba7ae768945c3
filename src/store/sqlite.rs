//! SQLite-backed local index.
//!
//! A local index is a directory holding a single `index.sqlite` database:
//!
//! | Table | Contents |
//! |-------|----------|
//! | `archives` | one row per ingested archive |
//! | `nodes` | text, table, and image nodes |
//! | `nodes_fts` | FTS5 index over node text |
//! | `node_vectors` | little-endian f32 embedding blobs |
//! | `index_meta` | key/value settings (embedding model) |
//!
//! The database uses rollback-journal mode, and loads open it read-only,
//! so loading a persisted index never modifies it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{query_terms, IndexBackend};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{ArchiveRecord, ImagePayload, IndexStats, Node, NodeKind, ScoredNode};

/// File name of the database inside an index directory.
pub const INDEX_FILE: &str = "index.sqlite";

const EMBEDDING_MODEL_KEY: &str = "embedding_model";

pub struct SqliteIndex {
    pool: SqlitePool,
    location: String,
}

impl SqliteIndex {
    pub fn index_file(dir: &Path) -> PathBuf {
        dir.join(INDEX_FILE)
    }

    /// Open or create the index under `dir` for writing.
    pub async fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index dir: {}", dir.display()))?;

        let options = SqliteConnectOptions::new()
            .filename(Self::index_file(dir))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open index at {}", dir.display()))?;

        run_migrations(&pool).await?;

        Ok(Self {
            pool,
            location: dir.display().to_string(),
        })
    }

    /// Open an existing index read-only. The caller checks existence first.
    pub async fn open_existing(dir: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(Self::index_file(dir))
            .create_if_missing(false)
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open index at {}", dir.display()))?;

        Ok(Self {
            pool,
            location: dir.display().to_string(),
        })
    }
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS archives (
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            node_count INTEGER NOT NULL,
            ingested_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            archive_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            page_label TEXT NOT NULL,
            kind TEXT NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            table_html TEXT,
            image_json TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS node_vectors (
            node_id TEXT PRIMARY KEY,
            archive_id TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='nodes_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE nodes_fts USING fts5(
                node_id UNINDEXED,
                archive_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_nodes_archive_id ON nodes(archive_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_node_vectors_archive_id ON node_vectors(archive_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

const NODE_COLUMNS: &str =
    "n.id, n.archive_id, n.file_name, n.page_label, n.kind, n.text, n.hash, n.table_html, n.image_json";

fn row_to_node(row: &SqliteRow) -> Result<Node> {
    let kind: String = row.get("kind");
    let image_json: Option<String> = row.get("image_json");
    let image = match image_json {
        Some(json) => Some(
            serde_json::from_str::<ImagePayload>(&json).context("corrupt image payload")?,
        ),
        None => None,
    };
    Ok(Node {
        id: row.get("id"),
        archive_id: row.get("archive_id"),
        file_name: row.get("file_name"),
        page_label: row.get("page_label"),
        kind: NodeKind::parse(&kind).with_context(|| format!("unknown node kind: {}", kind))?,
        text: row.get("text"),
        hash: row.get("hash"),
        table_html: row.get("table_html"),
        image,
    })
}

/// Quote each term so FTS5 operators in user input are taken literally.
fn fts_match_expr(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

async fn delete_archive_rows(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    archive_id: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM node_vectors WHERE archive_id = ?")
        .bind(archive_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM nodes_fts WHERE archive_id = ?")
        .bind(archive_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM nodes WHERE archive_id = ?")
        .bind(archive_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl IndexBackend for SqliteIndex {
    fn name(&self) -> &str {
        &self.location
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn replace_archive(
        &self,
        record: &ArchiveRecord,
        nodes: &[Node],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        delete_archive_rows(&mut tx, &record.id).await?;

        for (i, node) in nodes.iter().enumerate() {
            let image_json = node.image.as_ref().map(serde_json::to_string).transpose()?;
            sqlx::query(
                r#"
                INSERT INTO nodes (id, archive_id, file_name, page_label, kind, text, hash, table_html, image_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&node.id)
            .bind(&node.archive_id)
            .bind(&node.file_name)
            .bind(&node.page_label)
            .bind(node.kind.as_str())
            .bind(&node.text)
            .bind(&node.hash)
            .bind(&node.table_html)
            .bind(&image_json)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO nodes_fts (node_id, archive_id, text) VALUES (?, ?, ?)")
                .bind(&node.id)
                .bind(&node.archive_id)
                .bind(&node.text)
                .execute(&mut *tx)
                .await?;

            if let Some(vec) = vectors.and_then(|v| v.get(i)) {
                sqlx::query(
                    "INSERT INTO node_vectors (node_id, archive_id, embedding) VALUES (?, ?, ?)",
                )
                .bind(&node.id)
                .bind(&node.archive_id)
                .bind(vec_to_blob(vec))
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO archives (id, file_name, content_hash, node_count, ingested_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                file_name = excluded.file_name,
                content_hash = excluded.content_hash,
                node_count = excluded.node_count,
                ingested_at = excluded.ingested_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.file_name)
        .bind(&record.content_hash)
        .bind(record.node_count)
        .bind(record.ingested_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(archive = %record.id, nodes = nodes.len(), "replaced archive nodes");
        Ok(())
    }

    async fn remove_archive(&self, archive_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_archive_rows(&mut tx, archive_id).await?;
        sqlx::query("DELETE FROM archives WHERE id = ?")
            .bind(archive_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(archive = %archive_id, "removed archive");
        Ok(())
    }

    async fn archives(&self) -> Result<Vec<ArchiveRecord>> {
        let rows = sqlx::query(
            "SELECT id, file_name, content_hash, node_count, ingested_at FROM archives ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ArchiveRecord {
                id: row.get("id"),
                file_name: row.get("file_name"),
                content_hash: row.get("content_hash"),
                node_count: row.get("node_count"),
                ingested_at: row.get("ingested_at"),
            })
            .collect())
    }

    async fn node_ids(&self, archive_id: &str) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM nodes WHERE archive_id = ? ORDER BY id")
                .bind(archive_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let mut stats = IndexStats {
            archives: sqlx::query_scalar("SELECT COUNT(*) FROM archives")
                .fetch_one(&self.pool)
                .await?,
            embedded_nodes: sqlx::query_scalar("SELECT COUNT(*) FROM node_vectors")
                .fetch_one(&self.pool)
                .await?,
            ..IndexStats::default()
        };

        let rows = sqlx::query("SELECT kind, COUNT(*) AS cnt FROM nodes GROUP BY kind")
            .fetch_all(&self.pool)
            .await?;
        for row in &rows {
            let kind: String = row.get("kind");
            let count: i64 = row.get("cnt");
            match NodeKind::parse(&kind) {
                Some(NodeKind::Text) => stats.text_nodes = count,
                Some(NodeKind::Table) => stats.table_nodes = count,
                Some(NodeKind::Image) => stats.image_nodes = count,
                None => {}
            }
        }

        Ok(stats)
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredNode>> {
        let sql = format!(
            "SELECT {}, v.embedding FROM node_vectors v JOIN nodes n ON n.id = v.node_id ORDER BY n.rowid",
            NODE_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
            scored.push(ScoredNode {
                node: row_to_node(row)?,
                score,
            });
        }

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ScoredNode>> {
        let Some(expr) = fts_match_expr(query) else {
            return Ok(Vec::new());
        };

        let sql = format!(
            r#"
            SELECT {}, nodes_fts.rank AS rank
            FROM nodes_fts
            JOIN nodes n ON n.id = nodes_fts.node_id
            WHERE nodes_fts MATCH ?
            ORDER BY nodes_fts.rank
            LIMIT ?
            "#,
            NODE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(&expr)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                Ok(ScoredNode {
                    node: row_to_node(row)?,
                    score: -rank,
                })
            })
            .collect()
    }

    async fn embedding_model(&self) -> Result<Option<String>> {
        let model: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
                .bind(EMBEDDING_MODEL_KEY)
                .fetch_optional(&self.pool)
                .await?;
        Ok(model)
    }

    async fn set_embedding_model(&self, model: Option<&str>) -> Result<()> {
        let Some(model) = model else {
            sqlx::query("DELETE FROM index_meta WHERE key = ?")
                .bind(EMBEDDING_MODEL_KEY)
                .execute(&self.pool)
                .await?;
            return Ok(());
        };
        sqlx::query(
            r#"
            INSERT INTO index_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(EMBEDDING_MODEL_KEY)
        .bind(model)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::node_id;

    fn node(archive: &str, ordinal: usize, kind: NodeKind, text: &str) -> Node {
        Node {
            id: node_id(archive, kind, "1", ordinal),
            archive_id: archive.to_string(),
            file_name: archive.trim_end_matches(".zip").to_string(),
            page_label: "1".to_string(),
            kind,
            text: text.to_string(),
            hash: crate::chunk::sha256_hex(text.as_bytes()),
            table_html: None,
            image: None,
        }
    }

    fn record(id: &str, node_count: i64) -> ArchiveRecord {
        ArchiveRecord {
            id: id.to_string(),
            file_name: id.trim_end_matches(".zip").to_string(),
            content_hash: "abc".to_string(),
            node_count,
            ingested_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn replace_is_per_archive_and_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = SqliteIndex::create(tmp.path()).await.unwrap();

        let a = vec![
            node("a.zip", 0, NodeKind::Text, "revenue grew"),
            node("a.zip", 1, NodeKind::Text, "costs fell"),
        ];
        let b = vec![node("b.zip", 0, NodeKind::Text, "headcount flat")];

        index.replace_archive(&record("a.zip", 2), &a, None).await.unwrap();
        index.replace_archive(&record("b.zip", 1), &b, None).await.unwrap();
        index.replace_archive(&record("a.zip", 2), &a, None).await.unwrap();

        let stats = index.stats().await.unwrap();
        assert_eq!(stats.archives, 2);
        assert_eq!(stats.text_nodes, 3);
        assert_eq!(index.node_ids("b.zip").await.unwrap(), vec![b[0].id.clone()]);

        index.remove_archive("a.zip").await.unwrap();
        let ids: Vec<String> = index.archives().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b.zip"]);
        assert_eq!(index.stats().await.unwrap().total_nodes(), 1);
    }

    #[tokio::test]
    async fn keyword_search_ignores_fts_syntax() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = SqliteIndex::create(tmp.path()).await.unwrap();
        let nodes = vec![
            node("a.zip", 0, NodeKind::Text, "quarterly revenue grew strongly"),
            node("a.zip", 1, NodeKind::Text, "office relocation finished"),
        ];
        index.replace_archive(&record("a.zip", 2), &nodes, None).await.unwrap();

        let hits = index.keyword_search("revenue AND \"NEAR(", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.text, "quarterly revenue grew strongly");
        assert!(index.keyword_search("???", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn vector_search_ranks_by_cosine() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = SqliteIndex::create(tmp.path()).await.unwrap();
        let mut image = node("a.zip", 0, NodeKind::Image, "chart\nrevenue bars");
        image.image = Some(ImagePayload::Url {
            url: "https://img.test/chart.png".to_string(),
        });
        let nodes = vec![node("a.zip", 0, NodeKind::Text, "x"), image.clone()];
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        index
            .replace_archive(&record("a.zip", 2), &nodes, Some(vectors.as_slice()))
            .await
            .unwrap();

        let hits = index.vector_search(&[0.1, 0.9], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node, image);
        assert_eq!(index.stats().await.unwrap().embedded_nodes, 2);
    }

    #[tokio::test]
    async fn embedding_model_is_replaced_or_cleared() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = SqliteIndex::create(tmp.path()).await.unwrap();
        index.set_embedding_model(Some("model-a")).await.unwrap();
        index.set_embedding_model(Some("model-b")).await.unwrap();
        assert_eq!(index.embedding_model().await.unwrap().as_deref(), Some("model-b"));

        index.set_embedding_model(None).await.unwrap();
        assert_eq!(index.embedding_model().await.unwrap(), None);
        // Clearing twice is fine.
        index.set_embedding_model(None).await.unwrap();
    }

    #[tokio::test]
    async fn read_only_open_sees_persisted_state() {
        let tmp = tempfile::TempDir::new().unwrap();
        {
            let index = SqliteIndex::create(tmp.path()).await.unwrap();
            index
                .replace_archive(
                    &record("a.zip", 1),
                    &[node("a.zip", 0, NodeKind::Text, "persisted")],
                    None,
                )
                .await
                .unwrap();
            index.set_embedding_model(Some("test-model")).await.unwrap();
            index.close().await;
        }

        let index = SqliteIndex::open_existing(tmp.path()).await.unwrap();
        assert_eq!(index.embedding_model().await.unwrap().as_deref(), Some("test-model"));
        assert_eq!(index.stats().await.unwrap().text_nodes, 1);
        assert!(index.remove_archive("a.zip").await.is_err());
    }
}
