//! Filesystem source: walks a directory and snapshots matching files.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::FilesystemSourceConfig;

/// One file from a source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceItem {
    /// Path relative to the source root, `/`-separated.
    pub path: String,
    pub content: String,
    pub modified_at: DateTime<Utc>,
}

/// The full contents of a source at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSnapshot {
    /// SyncState key.
    pub name: String,
    /// Content-version marker: changes whenever any item's path or content does.
    pub version: String,
    /// Sorted by path.
    pub items: Vec<SourceItem>,
}

impl SourceSnapshot {
    /// Build a snapshot from items, sorting them and computing the version.
    pub fn new(name: impl Into<String>, mut items: Vec<SourceItem>) -> Self {
        items.sort_by(|a, b| a.path.cmp(&b.path));
        let version = snapshot_version(&items);
        Self {
            name: name.into(),
            version,
            items,
        }
    }
}

/// SHA-256 over `(path, content)` pairs; `items` must already be sorted.
fn snapshot_version(items: &[SourceItem]) -> String {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(item.content.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

pub fn scan_directory(config: &FilesystemSourceConfig) -> Result<SourceSnapshot> {
    let root = &config.root;
    if !root.is_dir() {
        bail!("Filesystem source root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut items = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match read_item(path, rel_str) {
            Ok(item) => items.push(item),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }

    let snapshot = SourceSnapshot::new(config.name.clone(), items);
    tracing::debug!(
        source = %snapshot.name,
        files = snapshot.items.len(),
        version = %snapshot.version,
        "scanned filesystem source"
    );
    Ok(snapshot)
}

fn read_item(path: &Path, relative_path: String) -> Result<SourceItem> {
    let metadata = std::fs::metadata(path)?;
    let modified_at = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_default();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} as UTF-8", path.display()))?;
    Ok(SourceItem {
        path: relative_path,
        content,
        modified_at,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config(root: &Path) -> FilesystemSourceConfig {
        FilesystemSourceConfig {
            name: "docs".into(),
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".into()],
            exclude_globs: vec!["drafts/**".into()],
            follow_symlinks: false,
        }
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("guide")).unwrap();
        fs::create_dir_all(root.join("drafts")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("b.md"), "# B").unwrap();
        fs::write(root.join("guide/a.md"), "# A").unwrap();
        fs::write(root.join("notes.txt"), "skip").unwrap();
        fs::write(root.join("drafts/wip.md"), "skip").unwrap();
        fs::write(root.join("node_modules/pkg/readme.md"), "skip").unwrap();

        let snapshot = scan_directory(&config(root)).unwrap();
        let paths: Vec<&str> = snapshot.items.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["b.md", "guide/a.md"]);
        assert_eq!(snapshot.name, "docs");
    }

    #[test]
    fn test_version_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "one").unwrap();
        let first = scan_directory(&config(dir.path())).unwrap().version;
        assert_eq!(first, scan_directory(&config(dir.path())).unwrap().version);

        fs::write(dir.path().join("a.md"), "two").unwrap();
        assert_ne!(first, scan_directory(&config(dir.path())).unwrap().version);
    }

    #[test]
    fn test_missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_directory(&config(&dir.path().join("missing"))).is_err());
    }

    #[test]
    fn test_version_ignores_input_order() {
        let item = |p: &str| SourceItem {
            path: p.into(),
            content: p.into(),
            modified_at: Utc::now(),
        };
        let a = SourceSnapshot::new("s", vec![item("x.md"), item("y.md")]);
        let b = SourceSnapshot::new("s", vec![item("y.md"), item("x.md")]);
        assert_eq!(a.version, b.version);
    }
}
