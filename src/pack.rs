//! The HelloRAG pack: one object that owns the index lifecycle and answers
//! questions against the result.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use hellorag_pack::{HelloRagPack, PackOptions};
//! # use hellorag_pack::embedding::DisabledProvider;
//! # use hellorag_pack::llm::DisabledLlm;
//! # async fn demo() -> hellorag_pack::PackResult<()> {
//! let options = PackOptions {
//!     base_path: Some("./exports".into()),
//!     index_path: Some("./index".into()),
//!     need_refresh: true,
//!     ..PackOptions::default()
//! };
//! let pack = HelloRagPack::open(options, Arc::new(DisabledProvider), Arc::new(DisabledLlm)).await?;
//! let hits = pack.retrieve("revenue by region").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::backend::IndexHandle;
use crate::chat::ChatSession;
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{PackError, PackResult};
use crate::ingest::RefreshReport;
use crate::lifecycle::{IndexManager, PackOptions};
use crate::llm::{create_llm, LlmProvider};
use crate::models::{QueryResult, ScoredNode};
use crate::progress::RefreshProgressReporter;
use crate::query::QueryEngine;

pub struct HelloRagPack {
    manager: IndexManager,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    engine: Option<QueryEngine>,
    last_refresh: Option<RefreshReport>,
}

impl HelloRagPack {
    /// Validate options and wire providers. No index is attached yet.
    pub fn new(
        options: PackOptions,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> PackResult<Self> {
        Ok(Self {
            manager: IndexManager::new(options, embedder.clone())?,
            embedder,
            llm,
            engine: None,
            last_refresh: None,
        })
    }

    /// Build providers from `[embedding]` and `[llm]` and options from the rest.
    pub fn from_config(config: &Config) -> PackResult<Self> {
        let embedder = create_provider(&config.embedding)
            .map_err(|e| PackError::config(format!("{:#}", e)))?;
        let llm = create_llm(&config.llm).map_err(|e| PackError::config(format!("{:#}", e)))?;
        Self::new(PackOptions::from_config(config), embedder, llm)
    }

    pub fn with_progress(mut self, progress: Box<dyn RefreshProgressReporter>) -> Self {
        self.manager = self.manager.with_progress(progress);
        self
    }

    /// Construct and initialize in one step.
    pub async fn open(
        options: PackOptions,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> PackResult<Self> {
        let mut pack = Self::new(options, embedder, llm)?;
        pack.initialize().await?;
        Ok(pack)
    }

    /// Refresh or load the index, as `need_refresh` says, and attach it.
    pub async fn initialize(&mut self) -> PackResult<()> {
        let (handle, report) = self.manager.prepare().await?;
        self.attach(handle)?;
        if report.is_some() {
            self.last_refresh = report;
        }
        Ok(())
    }

    /// Re-ingest the base path, then swap in the refreshed index. On error
    /// the previously attached index stays attached.
    pub async fn refresh(&mut self) -> PackResult<&RefreshReport> {
        let (handle, report) = self.manager.refresh().await?;
        self.close().await;
        self.attach(handle)?;
        Ok(self.last_refresh.insert(report))
    }

    fn attach(&mut self, handle: IndexHandle) -> PackResult<()> {
        let options = self.manager.options();
        self.engine = Some(QueryEngine::new(
            handle,
            self.embedder.clone(),
            self.llm.clone(),
            options.top_k,
            options.qa_template.clone(),
        )?);
        Ok(())
    }

    fn engine(&self) -> PackResult<&QueryEngine> {
        self.engine.as_ref().ok_or_else(|| {
            PackError::Query("no index is attached; call initialize() first".to_string())
        })
    }

    pub fn index(&self) -> Option<&IndexHandle> {
        self.engine.as_ref().map(QueryEngine::handle)
    }

    pub fn last_refresh(&self) -> Option<&RefreshReport> {
        self.last_refresh.as_ref()
    }

    pub async fn retrieve(&self, question: &str) -> PackResult<Vec<ScoredNode>> {
        self.engine()?.retrieve(question).await
    }

    pub async fn run(&self, question: &str) -> PackResult<QueryResult> {
        self.engine()?.run(question).await
    }

    /// Start a conversation against the attached index.
    pub fn chat(&self) -> PackResult<ChatSession<'_>> {
        Ok(ChatSession::new(self.engine()?))
    }

    /// Detach and release the index. Queries fail until the next
    /// `initialize` or `refresh`.
    pub async fn close(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.handle().backend().close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledProvider;
    use crate::llm::DisabledLlm;

    #[tokio::test]
    async fn run_before_initialize_is_a_query_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let options = PackOptions {
            index_path: Some(tmp.path().join("index")),
            ..PackOptions::default()
        };
        let pack = HelloRagPack::new(options, Arc::new(DisabledProvider), Arc::new(DisabledLlm))
            .unwrap();
        assert!(pack.index().is_none());
        assert!(matches!(pack.run("anything").await, Err(PackError::Query(_))));
        assert!(matches!(pack.retrieve("anything").await, Err(PackError::Query(_))));
        assert!(matches!(pack.chat(), Err(PackError::Query(_))));
    }

    #[test]
    fn from_config_reports_provider_errors_as_configuration() {
        let mut config = Config::default();
        config.pack.index_path = Some("index".into());
        config.embedding.provider = "openai".to_string();
        assert!(matches!(
            HelloRagPack::from_config(&config),
            Err(PackError::Configuration(_))
        ));
    }
}
