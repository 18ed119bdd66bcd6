use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// ContentStore maps a path relative to the depot root to a byte stream.
///
/// It performs no locking of its own; exclusivity is the coordinator's
/// responsibility.
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Opens a file under the store root. Write mode creates any missing
    /// parent directories.
    pub fn open(&self, rel_path: &str, mode: OpenMode) -> Result<FileHandle> {
        let dest = self.root.join(rel_path);
        debug!(path = %dest.display(), ?mode, "opening content file");

        match mode {
            OpenMode::Read => Ok(FileHandle::new(File::open(&dest)?)),
            OpenMode::Write => {
                if let Some(dir) = dest.parent() {
                    if !dir.is_dir() {
                        create_private_dirs(dir)?;
                    }
                }
                Ok(FileHandle::new(File::create(&dest)?))
            }
        }
    }
}

#[cfg(unix)]
fn create_private_dirs(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dirs(dir: &Path) -> io::Result<()> {
    fs::DirBuilder::new().recursive(true).create(dir)
}

/// A handle to one stored file. All I/O fails once `close` has been called.
pub struct FileHandle {
    file: Option<File>,
}

impl FileHandle {
    fn new(file: File) -> Self {
        Self { file: Some(file) }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn close(&mut self) -> Result<()> {
        match self.file.take() {
            Some(file) => {
                file.sync_all()?;
                Ok(())
            }
            None => Err(closed_error().into()),
        }
    }

    fn inner(&mut self) -> io::Result<&mut File> {
        self.file.as_mut().ok_or_else(closed_error)
    }
}

fn closed_error() -> io::Error {
    io::Error::other("file handle is closed")
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner()?.read(buf)
    }
}

impl Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner()?.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentStore::new(temp_dir.path());

        let mut handle = store.open("deploy/requirements.txt", OpenMode::Write).unwrap();
        handle.write_all(b"the file contents").unwrap();
        handle.close().unwrap();

        let mut handle = store.open("deploy/requirements.txt", OpenMode::Read).unwrap();
        let mut contents = Vec::new();
        handle.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"the file contents");
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentStore::new(temp_dir.path());

        let mut handle = store.open("a/b/c/file.bin", OpenMode::Write).unwrap();
        handle.write_all(b"x").unwrap();
        handle.close().unwrap();

        assert!(temp_dir.path().join("a/b/c/file.bin").is_file());
    }

    #[test]
    fn test_read_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentStore::new(temp_dir.path());

        assert!(store.open("nope/missing.txt", OpenMode::Read).is_err());
    }

    #[test]
    fn test_closed_handle_rejects_io() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentStore::new(temp_dir.path());

        let mut handle = store.open("file.bin", OpenMode::Write).unwrap();
        handle.write_all(b"data").unwrap();
        handle.close().unwrap();
        assert!(!handle.is_open());

        let mut buf = [0u8; 4];
        assert!(handle.read(&mut buf).is_err());
        assert!(handle.write(b"more").is_err());
        assert!(handle.close().is_err());
    }

    #[test]
    fn test_chunked_read() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentStore::new(temp_dir.path());

        let mut handle = store.open("chunks.bin", OpenMode::Write).unwrap();
        handle.write_all(b"My name is depot").unwrap();
        handle.close().unwrap();

        let mut handle = store.open("chunks.bin", OpenMode::Read).unwrap();
        let mut buf = [0u8; 5];
        handle.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"My na");
    }
}
