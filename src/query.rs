//! Retrieval and answer generation over an attached index.
//!
//! Retrieval embeds the question and runs a vector search when an
//! embedding provider is enabled, and falls back to keyword search when it
//! is not. The backend's ranking is kept as-is; there is no re-ranking.
//!
//! Generation fills a QA template with the retrieved context. Table nodes
//! contribute their raw table HTML so the model sees the figures that the
//! indexed text leaves out; image nodes contribute their title and
//! description.

use std::sync::Arc;

use tracing::debug;

use crate::backend::IndexHandle;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{PackError, PackResult};
use crate::llm::LlmProvider;
use crate::models::{NodeKind, QueryResult, ScoredNode};

/// Table-aware QA prompt. Exports are table heavy, so the model is told to
/// walk every table cell by cell instead of summarising it.
pub const DEFAULT_QA_TEMPLATE: &str = "\
Context information is below.
You are a helpful assistant. Read the tables row by row and column by column. \
DO NOT SUMMARIZE; list every relevant detail clearly. Then answer the question \
without guessing and without relying on implicit information. Do not add \
anything that is not directly relevant to the question, and do not miss \
anything that is. Do not return the first entry of the first table unless it \
answers the question.
---------------------
{context}
---------------------
Question: {question}
Only return the answer to the question.
Ignore the first entry of the first table if it is not relevant.
Make sure the last entry of the last table is included if it is relevant.
";

pub fn validate_qa_template(template: &str) -> PackResult<()> {
    for placeholder in ["{context}", "{question}"] {
        if !template.contains(placeholder) {
            return Err(PackError::config(format!(
                "qa_template must contain {}",
                placeholder
            )));
        }
    }
    Ok(())
}

/// Render retrieved nodes as numbered context blocks, in rank order.
pub fn format_context(nodes: &[ScoredNode]) -> String {
    nodes
        .iter()
        .enumerate()
        .map(|(i, scored)| {
            let node = &scored.node;
            let body = match (node.kind, &node.table_html) {
                (NodeKind::Table, Some(html)) => html.as_str(),
                _ => node.text.as_str(),
            };
            format!(
                "[{}] {} (page {}, {})\n{}",
                i + 1,
                node.file_name,
                node.page_label,
                node.kind.as_str(),
                body
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn fill_template(template: &str, context: &str, question: &str) -> String {
    template
        .replace("{context}", context)
        .replace("{question}", question)
}

pub struct QueryEngine {
    handle: IndexHandle,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    top_k: usize,
    template: String,
}

impl QueryEngine {
    pub fn new(
        handle: IndexHandle,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        top_k: usize,
        template: Option<String>,
    ) -> PackResult<Self> {
        let template = template.unwrap_or_else(|| DEFAULT_QA_TEMPLATE.to_string());
        validate_qa_template(&template)?;
        Ok(Self {
            handle,
            embedder,
            llm,
            top_k,
            template,
        })
    }

    pub fn handle(&self) -> &IndexHandle {
        &self.handle
    }

    pub(crate) fn llm(&self) -> &dyn LlmProvider {
        self.llm.as_ref()
    }

    /// Top-k nodes for `question`, best first.
    pub async fn retrieve(&self, question: &str) -> PackResult<Vec<ScoredNode>> {
        let backend = self.handle.backend();
        let nodes = if self.embedder.is_enabled() {
            let query_vec = embed_query(self.embedder.as_ref(), question).await?;
            backend.vector_search(&query_vec, self.top_k).await?
        } else {
            backend.keyword_search(question, self.top_k).await?
        };
        debug!(hits = nodes.len(), "retrieved nodes");
        Ok(nodes)
    }

    /// Retrieve, then generate an answer from the retrieved context.
    pub async fn run(&self, question: &str) -> PackResult<QueryResult> {
        let source_nodes = self.retrieve(question).await?;
        let prompt = fill_template(&self.template, &format_context(&source_nodes), question);
        let answer = self.llm.complete(&prompt).await?;
        Ok(QueryResult {
            answer,
            source_nodes,
        })
    }
}
