//! Index lifecycle management.
//!
//! [`IndexManager`] decides between building/refreshing an index from the
//! exported archives and loading one that already exists, and hands back
//! an [`IndexHandle`] either way.
//!
//! # Refresh
//!
//! ```text
//! discover *.zip ──► ArchiveIngestor ──► embed (batched) ──► replace_archive
//!                         │ (per archive)
//!                         └─ malformed ──► warn + RefreshReport.skipped
//! then: prune archives that left the base path, record the embedding model
//! ```
//!
//! Node ids are deterministic and each archive's node set is replaced as a
//! whole, so refreshing an unchanged base path leaves the index unchanged.
//! A skipped archive keeps whatever nodes a previous refresh wrote for it.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::archive::{ArchiveSettings, DEFAULT_MAX_ENTRY_BYTES};
use crate::backend::{AttachMode, BackendSpec, IndexHandle, StorageContext};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{PackError, PackResult};
use crate::image_url::{DirectoryImagePublisher, ImageUrlResolver};
use crate::ingest::{ArchiveIngestor, RefreshReport};
use crate::models::{ArchiveRecord, Node};
use crate::progress::{NoProgress, RefreshProgressEvent, RefreshProgressReporter};
use crate::query::validate_qa_template;
use crate::source::discover_archives;

/// Everything a pack is constructed from.
#[derive(Clone)]
pub struct PackOptions {
    /// Directory scanned recursively for exported `*.zip` archives.
    pub base_path: Option<PathBuf>,
    /// Ingest on startup instead of loading a persisted index.
    pub need_refresh: bool,
    /// Local index directory. Mutually exclusive with `storage_context`.
    pub index_path: Option<PathBuf>,
    /// External vector database. Mutually exclusive with `index_path`.
    pub storage_context: Option<StorageContext>,
    /// Drop every image node.
    pub no_use_image_in_rag: bool,
    /// Store image URLs instead of inline base64.
    pub image_to_url_function: Option<Arc<dyn ImageUrlResolver>>,
    pub font_path: Option<PathBuf>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub embed_batch_size: usize,
    pub max_entry_bytes: u64,
    pub exclude_globs: Vec<String>,
    pub qa_template: Option<String>,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            base_path: None,
            need_refresh: false,
            index_path: None,
            storage_context: None,
            no_use_image_in_rag: false,
            image_to_url_function: None,
            font_path: None,
            chunk_size: 512,
            chunk_overlap: 200,
            top_k: 3,
            embed_batch_size: 64,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            exclude_globs: Vec::new(),
            qa_template: None,
        }
    }
}

impl fmt::Debug for PackOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackOptions")
            .field("base_path", &self.base_path)
            .field("need_refresh", &self.need_refresh)
            .field("index_path", &self.index_path)
            .field("storage_context", &self.storage_context)
            .field("no_use_image_in_rag", &self.no_use_image_in_rag)
            .field("image_to_url_function", &self.image_to_url_function.is_some())
            .field("font_path", &self.font_path)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("top_k", &self.top_k)
            .field("embed_batch_size", &self.embed_batch_size)
            .finish_non_exhaustive()
    }
}

impl PackOptions {
    pub fn from_config(config: &Config) -> Self {
        let storage_context = config.vector_store.as_ref().map(StorageContext::from);
        let image_to_url_function = match (&config.pack.image_publish_dir, &config.pack.image_base_url) {
            (Some(dir), Some(base_url)) => Some(
                Arc::new(DirectoryImagePublisher::new(dir, base_url)) as Arc<dyn ImageUrlResolver>
            ),
            _ => None,
        };
        Self {
            base_path: config.pack.base_path.clone(),
            need_refresh: config.pack.need_refresh,
            index_path: config.pack.index_path.clone(),
            storage_context,
            no_use_image_in_rag: config.pack.no_use_image_in_rag,
            image_to_url_function,
            font_path: config.pack.font_path.clone(),
            chunk_size: config.ingest.chunk_size,
            chunk_overlap: config.ingest.chunk_overlap,
            top_k: config.retrieval.top_k,
            embed_batch_size: config.embedding.batch_size,
            max_entry_bytes: config.ingest.max_entry_bytes,
            exclude_globs: config.ingest.exclude_globs.clone(),
            qa_template: config.retrieval.qa_template.clone(),
        }
    }

    fn archive_settings(&self) -> ArchiveSettings {
        ArchiveSettings {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            include_images: !self.no_use_image_in_rag,
            max_entry_bytes: self.max_entry_bytes,
            image_resolver: self.image_to_url_function.clone(),
        }
    }
}

pub struct IndexManager {
    spec: BackendSpec,
    options: PackOptions,
    embedder: Arc<dyn EmbeddingProvider>,
    progress: Box<dyn RefreshProgressReporter>,
}

impl IndexManager {
    /// Validate options. Performs no I/O.
    pub fn new(options: PackOptions, embedder: Arc<dyn EmbeddingProvider>) -> PackResult<Self> {
        let spec = BackendSpec::resolve(options.index_path.clone(), options.storage_context.clone())?;

        if options.need_refresh && options.base_path.is_none() {
            return Err(PackError::config("need_refresh requires base_path"));
        }
        if options.chunk_size == 0 {
            return Err(PackError::config("chunk_size must be > 0"));
        }
        if options.chunk_overlap >= options.chunk_size {
            return Err(PackError::config(
                "chunk_overlap must be smaller than chunk_size",
            ));
        }
        if options.top_k == 0 {
            return Err(PackError::config("top_k must be >= 1"));
        }
        if options.embed_batch_size == 0 {
            return Err(PackError::config("embed_batch_size must be > 0"));
        }
        if let Some(template) = &options.qa_template {
            validate_qa_template(template)?;
        }

        Ok(Self {
            spec,
            options,
            embedder,
            progress: Box::new(NoProgress),
        })
    }

    pub fn with_progress(mut self, progress: Box<dyn RefreshProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn spec(&self) -> &BackendSpec {
        &self.spec
    }

    pub fn options(&self) -> &PackOptions {
        &self.options
    }

    /// Refresh when `need_refresh` is set, otherwise load.
    pub async fn prepare(&self) -> PackResult<(IndexHandle, Option<RefreshReport>)> {
        if self.options.need_refresh {
            let (handle, report) = self.refresh().await?;
            Ok((handle, Some(report)))
        } else {
            Ok((self.load().await?, None))
        }
    }

    /// Attach to an existing index without ingesting anything.
    pub async fn load(&self) -> PackResult<IndexHandle> {
        let handle = self.spec.attach(AttachMode::Load).await?;

        if let Some(mismatch) = self.embedding_mismatch(&handle).await? {
            handle.backend().close().await;
            return Err(PackError::config(format!(
                "index at {} {}; rebuild the index",
                handle.location(),
                mismatch
            )));
        }

        info!(location = %handle.location(), "loaded index");
        Ok(handle)
    }

    /// Why the attached index cannot serve vector search with the
    /// configured embedder, if it cannot.
    async fn embedding_mismatch(&self, handle: &IndexHandle) -> PackResult<Option<String>> {
        if !self.embedder.is_enabled() {
            return Ok(None);
        }
        let backend = handle.backend();
        let configured = self.embedder.model_name();
        Ok(match backend.embedding_model().await? {
            Some(recorded) if recorded != configured => Some(format!(
                "was built with embedding model '{}' but '{}' is configured",
                recorded, configured
            )),
            Some(_) => None,
            None if backend.stats().await?.total_nodes() > 0 => Some(format!(
                "was built without embeddings but '{}' is configured",
                configured
            )),
            None => None,
        })
    }

    /// Ingest every archive under the base path into the backend.
    pub async fn refresh(&self) -> PackResult<(IndexHandle, RefreshReport)> {
        let base_path = self
            .options
            .base_path
            .as_ref()
            .ok_or_else(|| PackError::config("refresh requires base_path"))?;
        if !base_path.is_dir() {
            return Err(PackError::config(format!(
                "base_path is not a directory: {}",
                base_path.display()
            )));
        }
        if let Some(font) = &self.options.font_path {
            if !font.is_file() || std::fs::File::open(font).is_err() {
                return Err(PackError::config(format!(
                    "font_path is not a readable file: {}",
                    font.display()
                )));
            }
            info!(font = %font.display(), "using font for page text");
        }

        let handle = self.spec.attach(AttachMode::Build).await?;
        let backend = handle.backend();

        let current_model = self
            .embedder
            .is_enabled()
            .then(|| self.embedder.model_name());
        let previous_model = backend.embedding_model().await?;
        let model_changed = previous_model.as_deref() != current_model;
        if model_changed {
            if let Some(previous) = &previous_model {
                warn!(
                    previous = %previous,
                    current = current_model.unwrap_or("none"),
                    "embedding model changed; re-embedding every archive"
                );
            }
        }

        self.progress.report(RefreshProgressEvent::Discovering {
            base_path: base_path.display().to_string(),
        });
        let archives = discover_archives(base_path, &self.options.exclude_globs)?;
        let present: HashSet<String> = archives.iter().map(|a| a.id.clone()).collect();

        let mut report = RefreshReport {
            discovered: archives.len(),
            ..RefreshReport::default()
        };
        let total = archives.len() as u64;
        let ingestor = ArchiveIngestor::new(archives, self.options.archive_settings());

        for (i, outcome) in ingestor.enumerate() {
            let n = i as u64 + 1;
            match outcome {
                Ok(parsed) => {
                    let vectors = if self.embedder.is_enabled() {
                        Some(self.embed_nodes(&parsed.nodes).await?)
                    } else {
                        None
                    };
                    let record = ArchiveRecord {
                        id: parsed.archive.id.clone(),
                        file_name: parsed.archive.file_name.clone(),
                        content_hash: parsed.content_hash.clone(),
                        node_count: parsed.nodes.len() as i64,
                        ingested_at: chrono::Utc::now().timestamp(),
                    };
                    backend
                        .replace_archive(&record, &parsed.nodes, vectors.as_deref())
                        .await?;

                    info!(archive = %record.id, nodes = parsed.nodes.len(), "ingested archive");
                    report.record_ingested(&parsed, vectors.as_ref().map_or(0, Vec::len));
                    self.progress.report(RefreshProgressEvent::Ingesting {
                        archive: record.id,
                        n,
                        total,
                    });
                }
                Err(err) => {
                    warn!(archive = %err.archive, error = %err.reason, "skipping archive");
                    report.record_skipped(&err);
                    self.progress.report(RefreshProgressEvent::Skipped {
                        archive: err.archive.clone(),
                        reason: err.reason.to_string(),
                        n,
                        total,
                    });
                }
            }
        }

        for record in backend.archives().await? {
            if !present.contains(&record.id) {
                backend.remove_archive(&record.id).await?;
                info!(archive = %record.id, "pruned archive no longer under base_path");
                report.pruned.push(record.id);
            }
        }

        // Skipped archives still hold vectors from the previous model.
        if model_changed && current_model.is_some() && !report.skipped.is_empty() {
            let skipped: HashSet<String> = report.skipped.iter().map(|s| s.id.clone()).collect();
            for record in backend.archives().await? {
                if skipped.contains(&record.id) {
                    backend.remove_archive(&record.id).await?;
                    warn!(archive = %record.id, "dropped nodes embedded by a different model");
                    report.stale.push(record.id);
                }
            }
        }

        backend.set_embedding_model(current_model).await?;

        info!(
            ingested = report.ingested.len(),
            skipped = report.skipped.len(),
            pruned = report.pruned.len(),
            nodes = report.total_nodes(),
            "refresh complete"
        );
        Ok((handle, report))
    }

    async fn embed_nodes(&self, nodes: &[Node]) -> PackResult<Vec<Vec<f32>>> {
        let texts: Vec<String> = nodes.iter().map(|n| n.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.options.embed_batch_size) {
            vectors.extend(self.embedder.embed(batch).await?);
        }
        Ok(vectors)
    }
}
