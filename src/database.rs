//! Path-addressed store for external input files.
//!
//! A `(database, target)` pair resolves to `<root>/<database>/<target>`.
//! Nothing is downloaded; a missing file is a `ResourceNotFound` error at
//! execution time.
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ResourceStore {
    root: PathBuf,
}

impl ResourceStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// `dirs::cache_dir()/ocean-tasks/databases`, or a relative fallback
    /// when the platform has no cache dir.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .map(|dir| dir.join("ocean-tasks").join("databases"))
            .unwrap_or_else(|| PathBuf::from("ocean-tasks-databases"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, database: &str, target: &str) -> PathBuf {
        self.root.join(database).join(target)
    }

    pub fn resolve(&self, database: &str, target: &str) -> Result<PathBuf> {
        let path = self.path_for(database, target);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::ResourceNotFound {
                database: database.to_string(),
                target: target.to_string(),
            })
        }
    }
}
