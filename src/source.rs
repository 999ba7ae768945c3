//! Archive discovery.
//!
//! Walks the base path recursively and returns every `*.zip` export in
//! sorted relative-path order. Only file-system metadata is read here;
//! archive bytes are read lazily by the ingestor so that an unreadable
//! archive is skipped and reported rather than failing discovery.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::models::ExportedArchive;

/// Always excluded, on top of `exclude_globs`.
const DEFAULT_EXCLUDES: &[&str] = &["**/__MACOSX/**", "**/.git/**"];

pub fn discover_archives(base_path: &Path, exclude_globs: &[String]) -> Result<Vec<ExportedArchive>> {
    if !base_path.is_dir() {
        bail!("base path is not a directory: {}", base_path.display());
    }

    let include_set = build_globset(&["**/*.zip".to_string()])?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut archives = Vec::new();

    for entry in WalkDir::new(base_path).follow_links(true) {
        let entry = entry.with_context(|| format!("Failed to walk {}", base_path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(base_path).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let file_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        archives.push(ExportedArchive {
            id: rel_str,
            file_name,
            path: path.to_path_buf(),
            size,
        });
    }

    // Sort for deterministic ordering
    archives.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(archives)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_zip_files_recursively_in_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("b/nested")).unwrap();
        fs::create_dir_all(root.join("__MACOSX")).unwrap();
        fs::write(root.join("z.zip"), b"z").unwrap();
        fs::write(root.join("b/nested/a.zip"), b"a").unwrap();
        fs::write(root.join("notes.txt"), b"n").unwrap();
        fs::write(root.join("__MACOSX/z.zip"), b"junk").unwrap();

        let archives = discover_archives(root, &[]).unwrap();
        let ids: Vec<&str> = archives.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["b/nested/a.zip", "z.zip"]);
        assert_eq!(archives[0].file_name, "a");
        assert_eq!(archives[1].size, 1);
    }

    #[test]
    fn honours_exclude_globs() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        fs::write(tmp.path().join("drafts/old.zip"), b"x").unwrap();
        fs::write(tmp.path().join("final.zip"), b"x").unwrap();

        let archives = discover_archives(tmp.path(), &["drafts/**".to_string()]).unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].id, "final.zip");
    }

    #[test]
    fn missing_base_path_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(discover_archives(&tmp.path().join("nope"), &[]).is_err());
    }
}
