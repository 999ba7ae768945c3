//! Index statistics for `hellorag stats`.
//!
//! Summarises what an attached index holds: node counts by kind, embedding
//! coverage, the recorded embedding model, and one line per archive.

use serde::Serialize;

use crate::backend::IndexHandle;
use crate::error::PackResult;
use crate::models::{ArchiveRecord, IndexStats};

#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub location: String,
    pub embedding_model: Option<String>,
    pub stats: IndexStats,
    pub archives: Vec<ArchiveRecord>,
}

pub async fn gather(handle: &IndexHandle) -> PackResult<IndexSummary> {
    let backend = handle.backend();
    Ok(IndexSummary {
        location: handle.location().to_string(),
        embedding_model: backend.embedding_model().await?,
        stats: backend.stats().await?,
        archives: backend.archives().await?,
    })
}

pub fn render(summary: &IndexSummary) -> String {
    let stats = &summary.stats;
    let total = stats.total_nodes();
    let mut out = String::new();

    out.push_str("HelloRAG Index Stats\n");
    out.push_str("====================\n\n");
    out.push_str(&format!("  Location:    {}\n", summary.location));
    out.push_str(&format!(
        "  Embedding:   {}\n\n",
        summary.embedding_model.as_deref().unwrap_or("none")
    ));
    out.push_str(&format!("  Archives:    {}\n", stats.archives));
    out.push_str(&format!(
        "  Nodes:       {} (text {}, table {}, image {})\n",
        total, stats.text_nodes, stats.table_nodes, stats.image_nodes
    ));
    out.push_str(&format!(
        "  Embedded:    {} / {} ({}%)\n",
        stats.embedded_nodes,
        total,
        if total > 0 {
            (stats.embedded_nodes * 100) / total
        } else {
            0
        }
    ));

    if !summary.archives.is_empty() {
        out.push_str("\n  By archive:\n");
        out.push_str(&format!(
            "  {:<32} {:>6}   {}\n",
            "ARCHIVE", "NODES", "INGESTED"
        ));
        out.push_str(&format!("  {}\n", "-".repeat(60)));
        for a in &summary.archives {
            out.push_str(&format!(
                "  {:<32} {:>6}   {}\n",
                a.id,
                a.node_count,
                format_ts(a.ingested_at)
            ));
        }
    }
    out
}

/// Print the summary of `handle`, as text or as one JSON document.
pub async fn run_stats(handle: &IndexHandle, json: bool) -> PackResult<()> {
    let summary = gather(handle).await?;
    if json {
        let text = serde_json::to_string_pretty(&summary).map_err(anyhow::Error::from)?;
        println!("{}", text);
    } else {
        print!("{}", render(&summary));
    }
    Ok(())
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
