use std::path::{Path, PathBuf};

/// Locations derived from a depot root directory.
#[derive(Debug, Clone)]
pub struct DepotConfig {
    pub root: PathBuf,
}

impl DepotConfig {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.root.join("depot.db")
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".lock")
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
