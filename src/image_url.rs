//! Image-to-URL resolution.
//!
//! By default image nodes embed their raster as base64. When an
//! [`ImageUrlResolver`] is configured, the bytes are handed to it instead
//! and the node stores only the returned URL.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::chunk::sha256_hex;

/// An image found in an archive, as passed to a resolver.
#[derive(Debug, Clone, Copy)]
pub struct ImageAsset<'a> {
    /// Archive id the image came from.
    pub archive_id: &'a str,
    /// Path of the image inside the archive.
    pub path: &'a str,
    pub page_label: &'a str,
    pub bytes: &'a [u8],
}

impl ImageAsset<'_> {
    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.path.rsplit('/').next().unwrap_or(self.path);
        name.rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    /// MIME type guessed from the extension.
    pub fn mime(&self) -> &'static str {
        match self.extension().as_deref() {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            Some("bmp") => "image/bmp",
            Some("svg") => "image/svg+xml",
            _ => "application/octet-stream",
        }
    }
}

/// Uploads or publishes an image and returns where it can be fetched.
pub trait ImageUrlResolver: Send + Sync {
    fn resolve(&self, image: &ImageAsset<'_>) -> Result<String>;
}

impl<F> ImageUrlResolver for F
where
    F: Fn(&ImageAsset<'_>) -> Result<String> + Send + Sync,
{
    fn resolve(&self, image: &ImageAsset<'_>) -> Result<String> {
        self(image)
    }
}

/// Writes images into a directory, named by content hash, and returns
/// `{base_url}/{hash}.{ext}`. Suited to a directory served by a static
/// file server or synced to object storage.
pub struct DirectoryImagePublisher {
    dir: PathBuf,
    base_url: String,
}

impl DirectoryImagePublisher {
    pub fn new(dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl ImageUrlResolver for DirectoryImagePublisher {
    fn resolve(&self, image: &ImageAsset<'_>) -> Result<String> {
        let hash = sha256_hex(image.bytes);
        let file_name = match image.extension() {
            Some(ext) => format!("{}.{}", hash, ext),
            None => hash,
        };
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create image dir: {}", self.dir.display()))?;
        let target = self.dir.join(&file_name);
        if !target.exists() {
            std::fs::write(&target, image.bytes)
                .with_context(|| format!("Failed to write image: {}", target.display()))?;
        }
        Ok(format!("{}/{}", self.base_url, file_name))
    }
}
