//! Module sources: where auto-deploy finds module packages.

use std::fs::File;
use std::io::{Cursor, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::io::resource_tree::ResourceTree;
use crate::runtime::{ModuleStream, RuntimeError};

/// File extension of module packages.
pub const PACKAGE_EXTENSION: &str = "jar";

/// Lists and opens module packages.
pub trait ModuleSource: Send + Sync {
    /// Module locations under `directory`, lexicographically ordered.
    /// A missing directory lists nothing.
    fn list(&self, directory: &str) -> Vec<String>;

    fn open(&self, location: &str) -> Result<ModuleStream, RuntimeError>;
}

/// Module packages on the local filesystem.
///
/// Relative directories are resolved against `base`. Locations are absolute
/// paths.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    base: PathBuf,
}

impl DirectorySource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl ModuleSource for DirectorySource {
    fn list(&self, directory: &str) -> Vec<String> {
        let dir = self.base.join(directory);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), err = %err, "unable to list deploy directory");
                return Vec::new();
            }
        };

        let mut locations: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| path.extension().is_some_and(|ext| ext == PACKAGE_EXTENSION))
            .map(|path| std::path::absolute(&path).unwrap_or(path))
            .map(|path| path.to_string_lossy().into_owned())
            .collect();
        locations.sort();
        debug!(dir = %dir.display(), count = locations.len(), "listed module packages");
        locations
    }

    fn open(&self, location: &str) -> Result<ModuleStream, RuntimeError> {
        let file = File::open(self.base.join(location)).map_err(|source| RuntimeError::Open {
            location: location.to_string(),
            source,
        })?;
        Ok(Box::new(file))
    }
}

/// Module packages inside a [`ResourceTree`].
#[derive(Debug, Clone)]
pub struct ResourceTreeSource {
    tree: Arc<ResourceTree>,
}

impl ResourceTreeSource {
    pub fn new(tree: Arc<ResourceTree>) -> Self {
        Self { tree }
    }
}

impl ModuleSource for ResourceTreeSource {
    fn list(&self, directory: &str) -> Vec<String> {
        let suffix = format!(".{PACKAGE_EXTENSION}");
        self.tree
            .list(directory)
            .into_iter()
            .filter(|path| path.ends_with(&suffix))
            .collect()
    }

    fn open(&self, location: &str) -> Result<ModuleStream, RuntimeError> {
        match self.tree.get(location) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.to_vec()))),
            None => Err(RuntimeError::Open {
                location: location.to_string(),
                source: std::io::Error::new(ErrorKind::NotFound, "no such resource"),
            }),
        }
    }
}
