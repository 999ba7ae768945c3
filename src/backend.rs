//! Storage backend selection.
//!
//! A pack stores its index either in a local directory or in an external
//! vector database. The two options are mutually exclusive: [`BackendSpec`]
//! makes that explicit, and [`BackendSpec::attach`] turns the chosen shape
//! into an [`IndexHandle`] that the rest of the pack uses uniformly.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::config::VectorStoreConfig;
use crate::error::{PackError, PackResult};
use crate::store::{IndexBackend, QdrantStore, SqliteIndex};

/// Connection details for an external vector database collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageContext {
    pub url: String,
    pub collection: String,
    /// Environment variable holding the API key, read at call time.
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
}

impl StorageContext {
    pub fn qdrant(url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            api_key_env: None,
            timeout_secs: 30,
        }
    }
}

impl From<&VectorStoreConfig> for StorageContext {
    fn from(config: &VectorStoreConfig) -> Self {
        Self {
            api_key_env: config.api_key_env.clone(),
            timeout_secs: config.timeout_secs,
            ..Self::qdrant(&config.url, &config.collection)
        }
    }
}

impl fmt::Display for StorageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/collections/{}", self.url, self.collection)
    }
}

/// Where the index lives. Exactly one per pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSpec {
    Local { index_path: PathBuf },
    External(StorageContext),
}

/// Whether the caller is about to write the index or only read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachMode {
    Build,
    Load,
}

impl BackendSpec {
    /// Normalize the two optional inputs. Performs no I/O.
    pub fn resolve(
        index_path: Option<PathBuf>,
        storage_context: Option<StorageContext>,
    ) -> PackResult<Self> {
        match (index_path, storage_context) {
            (Some(_), Some(_)) => Err(PackError::config(
                "index_path and storage_context are mutually exclusive; set exactly one",
            )),
            (None, None) => Err(PackError::config(
                "either index_path or storage_context must be set",
            )),
            (Some(index_path), None) => Ok(BackendSpec::Local { index_path }),
            (None, Some(ctx)) => Ok(BackendSpec::External(ctx)),
        }
    }

    pub fn location(&self) -> IndexLocation {
        match self {
            BackendSpec::Local { index_path } => IndexLocation::Local(index_path.clone()),
            BackendSpec::External(ctx) => IndexLocation::External(ctx.to_string()),
        }
    }

    /// Open the backend.
    ///
    /// A local load requires a persisted index ([`PackError::NotFound`]
    /// otherwise) and opens it read-only. An external context is
    /// health-checked; an unreachable one is a configuration error.
    pub async fn attach(&self, mode: AttachMode) -> PackResult<IndexHandle> {
        let backend: Arc<dyn IndexBackend> = match (self, mode) {
            (BackendSpec::Local { index_path }, AttachMode::Build) => {
                Arc::new(SqliteIndex::create(index_path).await?)
            }
            (BackendSpec::Local { index_path }, AttachMode::Load) => {
                if !SqliteIndex::index_file(index_path).is_file() {
                    return Err(PackError::NotFound(index_path.clone()));
                }
                Arc::new(SqliteIndex::open_existing(index_path).await?)
            }
            (BackendSpec::External(ctx), _) => {
                let store = QdrantStore::new(ctx)?;
                store.health_check().await.map_err(|e| {
                    PackError::config(format!("storage context {} is unreachable: {:#}", ctx, e))
                })?;
                Arc::new(store)
            }
        };
        debug!(backend = backend.name(), ?mode, "attached index backend");
        Ok(IndexHandle::new(backend, self.location()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLocation {
    Local(PathBuf),
    External(String),
}

impl fmt::Display for IndexLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexLocation::Local(path) => write!(f, "{}", path.display()),
            IndexLocation::External(name) => write!(f, "{}", name),
        }
    }
}

/// A ready-to-query index. Cheap to clone.
#[derive(Clone)]
pub struct IndexHandle {
    backend: Arc<dyn IndexBackend>,
    location: IndexLocation,
}

impl IndexHandle {
    pub fn new(backend: Arc<dyn IndexBackend>, location: IndexLocation) -> Self {
        Self { backend, location }
    }

    pub fn backend(&self) -> &dyn IndexBackend {
        self.backend.as_ref()
    }

    pub fn location(&self) -> &IndexLocation {
        &self.location
    }
}

impl fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexHandle")
            .field("location", &self.location)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_backend_is_required() {
        let ctx = StorageContext::qdrant("http://localhost:6333/", "reports");
        let both = BackendSpec::resolve(Some(PathBuf::from("idx")), Some(ctx.clone()));
        assert!(both.unwrap_err().is_configuration());
        assert!(BackendSpec::resolve(None, None).unwrap_err().is_configuration());

        assert_eq!(
            BackendSpec::resolve(None, Some(ctx.clone())).unwrap(),
            BackendSpec::External(ctx)
        );
        assert_eq!(
            BackendSpec::resolve(Some(PathBuf::from("idx")), None)
                .unwrap()
                .location(),
            IndexLocation::Local(PathBuf::from("idx"))
        );
    }

    #[test]
    fn context_display_names_the_collection() {
        let ctx = StorageContext::qdrant("http://localhost:6333/", "reports");
        assert_eq!(ctx.to_string(), "http://localhost:6333/collections/reports");
    }

    #[tokio::test]
    async fn loading_a_missing_local_index_is_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let spec = BackendSpec::resolve(Some(tmp.path().join("index")), None).unwrap();
        let err = spec.attach(AttachMode::Load).await.unwrap_err();
        assert!(matches!(err, PackError::NotFound(_)));
        assert!(!tmp.path().join("index").exists());
    }

    #[tokio::test]
    async fn unreachable_context_is_a_configuration_error() {
        let mut ctx = StorageContext::qdrant("http://127.0.0.1:1", "reports");
        ctx.timeout_secs = 2;
        let spec = BackendSpec::External(ctx);
        let err = spec.attach(AttachMode::Load).await.unwrap_err();
        assert!(err.is_configuration());
    }
}
