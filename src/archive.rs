//! Export archive parsing.
//!
//! An export is a zip laid out by page:
//!
//! ```text
//! image.json            [{ "title", "description", "path", "page" }, ...]
//! images/chart-1.png
//! 1/page.txt            page text
//! 3/table-0.html        table export (h1, p, table)
//! ```
//!
//! Parsing yields the complete node set of one archive or an
//! [`ArchiveError`]; an archive never contributes a partial node set.

use base64::Engine;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::chunk::{chunk_text, sha256_hex};
use crate::error::ArchiveError;
use crate::image_url::{ImageAsset, ImageUrlResolver};
use crate::models::{node_id, ExportedArchive, ImagePayload, Node, NodeKind};
use crate::table::extract_table;

/// Name of the root-level image annotation manifest.
pub const IMAGE_MANIFEST: &str = "image.json";

/// Maximum decompressed bytes read from a single zip entry (zip-bomb protection).
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Knobs that shape the node set of an archive.
#[derive(Clone)]
pub struct ArchiveSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// When false no image nodes are produced at all.
    pub include_images: bool,
    pub max_entry_bytes: u64,
    pub image_resolver: Option<Arc<dyn ImageUrlResolver>>,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 200,
            include_images: true,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            image_resolver: None,
        }
    }
}

impl std::fmt::Debug for ArchiveSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveSettings")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("include_images", &self.include_images)
            .field("max_entry_bytes", &self.max_entry_bytes)
            .field("image_resolver", &self.image_resolver.is_some())
            .finish()
    }
}

/// All nodes extracted from one archive.
#[derive(Debug, Clone)]
pub struct ParsedArchive {
    pub archive: ExportedArchive,
    /// SHA-256 of the archive bytes.
    pub content_hash: String,
    pub nodes: Vec<Node>,
}

/// One entry of `image.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageAnnotation {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub path: String,
    #[serde(default)]
    pub page: serde_json::Value,
}

impl ImageAnnotation {
    fn title(&self) -> &str {
        self.title.as_deref().map(str::trim).unwrap_or("")
    }

    fn description(&self) -> &str {
        self.description.as_deref().map(str::trim).unwrap_or("")
    }

    /// Only fully annotated images become nodes.
    pub fn is_complete(&self) -> bool {
        !self.title().is_empty() && !self.description().is_empty()
    }

    pub fn page_label(&self) -> String {
        match &self.page {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => String::new(),
        }
    }

    /// Path inside the archive, without the exporter's `./` prefix.
    pub fn entry_path(&self) -> &str {
        self.path.trim_start_matches("./").trim_start_matches('/')
    }
}

/// Read and parse an archive from disk.
pub fn parse_archive(
    archive: &ExportedArchive,
    settings: &ArchiveSettings,
) -> Result<ParsedArchive, ArchiveError> {
    let bytes = std::fs::read(&archive.path)?;
    parse_archive_bytes(archive, &bytes, settings)
}

pub fn parse_archive_bytes(
    archive: &ExportedArchive,
    bytes: &[u8],
    settings: &ArchiveSettings,
) -> Result<ParsedArchive, ArchiveError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;

    let mut pages: BTreeMap<String, String> = BTreeMap::new();
    let mut tables: Vec<(String, String, String)> = Vec::new(); // (page, entry, html)
    let mut manifest: Vec<ImageAnnotation> = Vec::new();

    for i in 0..zip.len() {
        let (name, is_dir) = {
            let entry = zip.by_index(i)?;
            (entry.name().to_string(), entry.is_dir())
        };
        if is_dir || name.contains("__MACOSX") {
            continue;
        }

        let Some((page_label, _)) = name.split_once('/') else {
            if name == IMAGE_MANIFEST && settings.include_images {
                let raw = read_bounded(zip.by_index(i)?, &name, settings.max_entry_bytes)?;
                manifest = serde_json::from_slice::<Option<Vec<ImageAnnotation>>>(&raw)?
                    .unwrap_or_default();
            }
            continue;
        };

        match extension(&name).as_deref() {
            Some("txt") => {
                let raw = read_bounded(zip.by_index(i)?, &name, settings.max_entry_bytes)?;
                let text = decode_utf8(raw, &name)?;
                let page = pages.entry(page_label.to_string()).or_default();
                if !page.is_empty() {
                    page.push_str("\n\n");
                }
                page.push_str(&text);
            }
            Some("html") | Some("htm") => {
                let raw = read_bounded(zip.by_index(i)?, &name, settings.max_entry_bytes)?;
                let html = decode_utf8(raw, &name)?;
                tables.push((page_label.to_string(), name.clone(), html));
            }
            _ => {}
        }
    }

    let mut nodes = Vec::new();

    let mut page_labels: Vec<&String> = pages.keys().collect();
    page_labels.sort_by_key(|label| page_order(label));
    for label in page_labels {
        for chunk in chunk_text(&pages[label], settings.chunk_size, settings.chunk_overlap) {
            nodes.push(Node {
                id: node_id(&archive.id, NodeKind::Text, label, chunk.index),
                archive_id: archive.id.clone(),
                file_name: archive.file_name.clone(),
                page_label: label.clone(),
                kind: NodeKind::Text,
                text: chunk.text,
                hash: chunk.hash,
                table_html: None,
                image: None,
            });
        }
    }

    tables.sort_by(|a, b| page_order(&a.0).cmp(&page_order(&b.0)).then(a.1.cmp(&b.1)));
    let mut ordinal_in_page: BTreeMap<&str, usize> = BTreeMap::new();
    for (label, entry, html) in &tables {
        let extract = extract_table(html).map_err(|reason| ArchiveError::Table {
            entry: entry.clone(),
            reason,
        })?;
        let ordinal = ordinal_in_page.entry(label.as_str()).or_insert(0);
        let text = extract.node_text();
        nodes.push(Node {
            id: node_id(&archive.id, NodeKind::Table, label, *ordinal),
            archive_id: archive.id.clone(),
            file_name: archive.file_name.clone(),
            page_label: label.clone(),
            kind: NodeKind::Table,
            hash: sha256_hex(text.as_bytes()),
            text,
            table_html: Some(extract.table_html),
            image: None,
        });
        *ordinal += 1;
    }

    for (ordinal, annotation) in manifest.iter().enumerate() {
        if !annotation.is_complete() {
            continue;
        }
        let path = annotation.entry_path();
        let image_bytes = match zip.by_name(path) {
            Ok(entry) => read_bounded(entry, path, settings.max_entry_bytes)?,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(ArchiveError::MissingImage {
                    path: path.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let page_label = annotation.page_label();
        let asset = ImageAsset {
            archive_id: &archive.id,
            path,
            page_label: &page_label,
            bytes: &image_bytes,
        };
        let payload = match &settings.image_resolver {
            Some(resolver) => ImagePayload::Url {
                url: resolver.resolve(&asset).map_err(|e| ArchiveError::ImageUrl {
                    path: path.to_string(),
                    reason: format!("{:#}", e),
                })?,
            },
            None => ImagePayload::Inline {
                base64: base64::engine::general_purpose::STANDARD.encode(&image_bytes),
                mime: asset.mime().to_string(),
            },
        };
        let text = format!("{}\n{}", annotation.title(), annotation.description());
        nodes.push(Node {
            id: node_id(&archive.id, NodeKind::Image, &page_label, ordinal),
            archive_id: archive.id.clone(),
            file_name: archive.file_name.clone(),
            page_label,
            kind: NodeKind::Image,
            hash: sha256_hex(text.as_bytes()),
            text,
            table_html: None,
            image: Some(payload),
        });
    }

    Ok(ParsedArchive {
        archive: archive.clone(),
        content_hash: sha256_hex(bytes),
        nodes,
    })
}

fn read_bounded(entry: impl Read, name: &str, max_bytes: u64) -> Result<Vec<u8>, ArchiveError> {
    let mut out = Vec::new();
    entry.take(max_bytes + 1).read_to_end(&mut out)?;
    if out.len() as u64 > max_bytes {
        return Err(ArchiveError::TooLarge {
            entry: name.to_string(),
            limit: max_bytes,
        });
    }
    Ok(out)
}

fn decode_utf8(raw: Vec<u8>, name: &str) -> Result<String, ArchiveError> {
    let text = String::from_utf8(raw).map_err(|_| ArchiveError::Encoding {
        entry: name.to_string(),
    })?;
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn extension(name: &str) -> Option<String> {
    let file = name.rsplit('/').next().unwrap_or(name);
    file.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Numeric page labels first, in numeric order; others after, lexically.
fn page_order(label: &str) -> (u8, u64, String) {
    match label.parse::<u64>() {
        Ok(n) => (0, n, String::new()),
        Err(_) => (1, 0, label.to_string()),
    }
}
