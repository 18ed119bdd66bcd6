use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Advisory exclusive marker for an opened depot.
///
/// The marker is a file created with `create_new`, so acquisition is atomic;
/// its content records who holds the depot and is only read to report a
/// conflict. A crashed process leaves the marker behind and the depot stays
/// unopenable until it is removed by hand.
#[derive(Debug)]
pub struct LockMarker {
    path: PathBuf,
}

impl LockMarker {
    pub fn acquire(path: &Path) -> Result<LockMarker> {
        let owner = owner_string();
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                file.write_all(owner.as_bytes())?;
                Ok(LockMarker {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path).unwrap_or_default();
                Err(Error::RepoInUse(holder))
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    pub fn release(self) -> Result<()> {
        fs::remove_file(&self.path)?;
        std::mem::forget(self);
        Ok(())
    }
}

impl Drop for LockMarker {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// `hostname-pid-uid=username`, recorded inside the lock marker.
fn owner_string() -> String {
    format!(
        "{}-{}-{}={}",
        hostname(),
        std::process::id(),
        process_uid(),
        username()
    )
}

#[cfg(target_os = "linux")]
fn hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(not(target_os = "linux"))]
fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn username() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

/// The uid of the current process, used as the default acting user by the
/// CLI and recorded in the lock marker.
#[cfg(unix)]
#[must_use]
pub fn process_uid() -> i64 {
    use std::os::unix::fs::MetadataExt;
    fs::metadata("/proc/self")
        .map(|m| i64::from(m.uid()))
        .unwrap_or(0)
}

#[cfg(not(unix))]
#[must_use]
pub fn process_uid() -> i64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".lock");

        let lock = LockMarker::acquire(&path).unwrap();
        assert!(path.exists());
        lock.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_second_acquire_reports_holder() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".lock");

        let _lock = LockMarker::acquire(&path).unwrap();
        let err = LockMarker::acquire(&path).unwrap_err();
        match err {
            Error::RepoInUse(holder) => {
                assert!(holder.contains(&std::process::id().to_string()));
            }
            other => panic!("expected RepoInUse, got {other:?}"),
        }
    }

    #[test]
    fn test_drop_releases_marker() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".lock");

        {
            let _lock = LockMarker::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
