//! Error taxonomy for the pack.
//!
//! Construction and query-precondition failures are raised synchronously as
//! [`PackError`]. Per-archive failures during a refresh are *not* raised:
//! they are collected as [`IngestionError`]s in the
//! [`RefreshReport`](crate::ingest::RefreshReport) so a refresh can finish
//! with partial success.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used by the public pack API.
pub type PackResult<T> = std::result::Result<T, PackError>;

/// Errors surfaced to callers of the pack.
#[derive(Debug, Error)]
pub enum PackError {
    /// Invalid or contradictory options (both or neither backend, refresh
    /// without a base path, unreachable storage context, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A local index load was requested but nothing is persisted there.
    #[error("no index found at {}", .0.display())]
    NotFound(PathBuf),

    /// A query was attempted without an attached index.
    #[error("query error: {0}")]
    Query(String),

    /// Opaque failure from a storage backend, embedding or LLM provider.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl PackError {
    pub fn config(msg: impl Into<String>) -> Self {
        PackError::Configuration(msg.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, PackError::Configuration(_))
    }
}

/// Why a single archive could not be parsed.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot read archive: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid zip: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid image.json: {0}")]
    ImageManifest(#[from] serde_json::Error),

    #[error("entry {entry} is not valid UTF-8")]
    Encoding { entry: String },

    #[error("entry {entry} exceeds size limit ({limit} bytes)")]
    TooLarge { entry: String, limit: u64 },

    #[error("image {path} referenced by image.json is missing")]
    MissingImage { path: String },

    #[error("malformed table in {entry}: {reason}")]
    Table { entry: String, reason: String },

    #[error("image URL resolver failed for {path}: {reason}")]
    ImageUrl { path: String, reason: String },
}

/// A skipped archive, reported after a refresh.
#[derive(Debug, Error)]
#[error("archive {archive} skipped: {reason}")]
pub struct IngestionError {
    /// Archive id (path relative to the base path).
    pub archive: String,
    pub reason: ArchiveError,
}
