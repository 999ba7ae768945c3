//! Per-archive ingestion.
//!
//! [`ArchiveIngestor`] turns a discovered archive list into a lazy stream
//! of per-archive outcomes. Each archive is read and parsed only when the
//! iterator reaches it, so a refresh over thousands of exports holds at
//! most one archive's nodes in memory. The stream is finite and cannot be
//! restarted; a new refresh builds a new ingestor.

use serde::Serialize;

use crate::archive::{parse_archive, ArchiveSettings, ParsedArchive};
use crate::error::IngestionError;
use crate::models::{ExportedArchive, NodeKind};

pub struct ArchiveIngestor {
    archives: std::vec::IntoIter<ExportedArchive>,
    settings: ArchiveSettings,
}

impl ArchiveIngestor {
    pub fn new(archives: Vec<ExportedArchive>, settings: ArchiveSettings) -> Self {
        Self {
            archives: archives.into_iter(),
            settings,
        }
    }
}

impl Iterator for ArchiveIngestor {
    type Item = Result<ParsedArchive, IngestionError>;

    fn next(&mut self) -> Option<Self::Item> {
        let archive = self.archives.next()?;
        Some(
            parse_archive(&archive, &self.settings).map_err(|reason| IngestionError {
                archive: archive.id.clone(),
                reason,
            }),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.archives.size_hint()
    }
}

impl ExactSizeIterator for ArchiveIngestor {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestedArchive {
    pub id: String,
    pub nodes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedArchive {
    pub id: String,
    pub reason: String,
}

impl From<&IngestionError> for SkippedArchive {
    fn from(err: &IngestionError) -> Self {
        Self {
            id: err.archive.clone(),
            reason: err.reason.to_string(),
        }
    }
}

/// Outcome of one refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshReport {
    pub discovered: usize,
    pub ingested: Vec<IngestedArchive>,
    pub skipped: Vec<SkippedArchive>,
    /// Archives removed from the index because they left the base path.
    pub pruned: Vec<String>,
    /// Skipped archives whose previous nodes were dropped because they were
    /// embedded by a different model.
    pub stale: Vec<String>,
    pub text_nodes: usize,
    pub table_nodes: usize,
    pub image_nodes: usize,
    pub embedded_nodes: usize,
}

impl RefreshReport {
    pub fn record_ingested(&mut self, parsed: &ParsedArchive, embedded: usize) {
        for node in &parsed.nodes {
            match node.kind {
                NodeKind::Text => self.text_nodes += 1,
                NodeKind::Table => self.table_nodes += 1,
                NodeKind::Image => self.image_nodes += 1,
            }
        }
        self.embedded_nodes += embedded;
        self.ingested.push(IngestedArchive {
            id: parsed.archive.id.clone(),
            nodes: parsed.nodes.len(),
        });
    }

    pub fn record_skipped(&mut self, err: &IngestionError) {
        self.skipped.push(SkippedArchive::from(err));
    }

    pub fn total_nodes(&self) -> usize {
        self.text_nodes + self.table_nodes + self.image_nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::build_zip;
    use crate::error::ArchiveError;

    fn write_archive(dir: &std::path::Path, name: &str, bytes: &[u8]) -> ExportedArchive {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        ExportedArchive {
            id: name.to_string(),
            file_name: name.trim_end_matches(".zip").to_string(),
            size: bytes.len() as u64,
            path,
        }
    }

    #[test]
    fn yields_one_outcome_per_archive_in_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let good = build_zip(&[("1/p.txt", b"Quarterly revenue grew.".as_slice())]);
        let archives = vec![
            write_archive(tmp.path(), "a.zip", &good),
            write_archive(tmp.path(), "b.zip", b"not a zip"),
            write_archive(tmp.path(), "c.zip", &good),
        ];

        let ingestor = ArchiveIngestor::new(archives, ArchiveSettings::default());
        assert_eq!(ingestor.len(), 3);

        let outcomes: Vec<_> = ingestor.collect();
        assert!(outcomes[0].is_ok());
        let err = outcomes[1].as_ref().unwrap_err();
        assert_eq!(err.archive, "b.zip");
        assert!(matches!(err.reason, ArchiveError::Zip(_)));
        assert_eq!(outcomes[2].as_ref().unwrap().archive.id, "c.zip");
    }

    #[test]
    fn unreadable_archive_is_an_outcome_not_a_panic() {
        let archive = ExportedArchive {
            id: "gone.zip".to_string(),
            file_name: "gone".to_string(),
            path: std::path::PathBuf::from("/nonexistent/gone.zip"),
            size: 0,
        };
        let mut ingestor = ArchiveIngestor::new(vec![archive], ArchiveSettings::default());
        let err = ingestor.next().unwrap().unwrap_err();
        assert!(matches!(err.reason, ArchiveError::Io(_)));
        assert!(ingestor.next().is_none());
    }

    #[test]
    fn report_counts_nodes_by_kind() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bytes = build_zip(&[
            ("1/p.txt", b"Some text.".as_slice()),
            ("1/t.html", b"<h1>T</h1><table><tr><td>x</td></tr></table>".as_slice()),
        ]);
        let archive = write_archive(tmp.path(), "a.zip", &bytes);
        let parsed = ArchiveIngestor::new(vec![archive], ArchiveSettings::default())
            .next()
            .unwrap()
            .unwrap();

        let mut report = RefreshReport::default();
        report.record_ingested(&parsed, 0);
        assert_eq!(report.text_nodes, 1);
        assert_eq!(report.table_nodes, 1);
        assert_eq!(report.total_nodes(), 2);
        assert_eq!(
            report.ingested,
            vec![IngestedArchive {
                id: "a.zip".to_string(),
                nodes: 2
            }]
        );
    }
}
