//! Per-fingerprint build lock.
//!
//! Two invocations that resolve to the same fingerprint must not build
//! concurrently; the second waits and then re-checks for the artifact the
//! first one produced. The lock is advisory (`flock`) and released on drop.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use nixbox_common::error::{NixboxError, Result};
use nixbox_common::types::Fingerprint;

/// Exclusive lock on one fingerprint's build.
#[derive(Debug)]
pub struct BuildLock {
    file: File,
    path: PathBuf,
}

impl BuildLock {
    /// Acquires the lock for `fingerprint` under `data_dir/locks`, blocking
    /// while another process holds it.
    ///
    /// # Errors
    ///
    /// Returns `NixboxError::Io` if the lock file cannot be created or locked.
    pub fn acquire(data_dir: &Path, fingerprint: &Fingerprint) -> Result<Self> {
        let dir = data_dir.join("locks");
        std::fs::create_dir_all(&dir).map_err(|e| NixboxError::io(&dir, e))?;
        let path = dir.join(format!("{}.lock", fingerprint.as_hex()));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| NixboxError::io(&path, e))?;

        if file.try_lock_exclusive().is_err() {
            tracing::info!(fingerprint = fingerprint.short(), "another build of this environment is running; waiting");
            file.lock_exclusive().map_err(|e| NixboxError::io(&path, e))?;
        }
        tracing::debug!(path = %path.display(), "build lock acquired");
        Ok(Self { file, path })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    fn fingerprint() -> Fingerprint {
        Fingerprint::from_hex("0f".repeat(32)).expect("fingerprint")
    }

    #[test]
    fn lock_file_is_named_after_fingerprint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = BuildLock::acquire(dir.path(), &fingerprint()).expect("acquire");
        assert_eq!(lock.path(), dir.path().join("locks").join(format!("{}.lock", "0f".repeat(32))));
        assert!(lock.path().exists());
    }

    #[test]
    fn second_holder_waits_for_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = BuildLock::acquire(dir.path(), &fingerprint()).expect("acquire");

        let (tx, rx) = mpsc::channel();
        let data_dir = dir.path().to_path_buf();
        let waiter = std::thread::spawn(move || {
            let _lock = BuildLock::acquire(&data_dir, &fingerprint()).expect("acquire");
            tx.send(()).expect("send");
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(first);
        assert!(rx.recv_timeout(Duration::from_secs(10)).is_ok());
        waiter.join().expect("join");
    }
}
