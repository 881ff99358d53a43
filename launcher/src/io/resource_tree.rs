//! In-memory tree of packaged resources.
//!
//! Models the contents of an application archive: absolute `/`-separated
//! paths mapped to file bytes. Loaded from an exploded archive directory.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;
use walkdir::WalkDir;

/// Read-only view of packaged resources keyed by absolute path (`/conf/x`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTree {
    entries: BTreeMap<String, Vec<u8>>,
}

impl ResourceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every regular file under `root`. Paths are relative to `root`.
    pub fn from_dir(root: &Path) -> Result<Self> {
        let mut tree = Self::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walk {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .with_context(|| format!("strip prefix {}", root.display()))?;
            let path = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let bytes = std::fs::read(entry.path())
                .with_context(|| format!("read {}", entry.path().display()))?;
            tree.insert(&path, bytes);
        }
        debug!(root = %root.display(), entries = tree.entries.len(), "resource tree loaded");
        Ok(tree)
    }

    pub fn insert(&mut self, path: &str, bytes: impl Into<Vec<u8>>) {
        self.entries.insert(normalize(path), bytes.into());
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(&normalize(path)).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(&normalize(path))
    }

    /// Files directly inside `directory`, as absolute paths, in lexicographic order.
    pub fn list(&self, directory: &str) -> Vec<String> {
        let mut prefix = normalize(directory);
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        self.entries
            .keys()
            .filter(|path| {
                path.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .cloned()
            .collect()
    }
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}
