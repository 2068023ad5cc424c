//! Single-writer guard for append-only outputs.
//!
//! The cleaner's correctness depends on reading the complete output before it
//! appends, so two cleaners (or a cleaner and a shuffler) must never work on
//! the same file at once. The guard is a sidecar `<file>.lock` created with
//! `create_new`; it is removed when the guard drops. A crashed process leaves
//! the lock behind and an operator has to delete it.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use crate::io::ensure_parent_dir;
use crate::{PipelineError, Result};

#[derive(Debug)]
pub struct WriterLock {
    lock_path: PathBuf,
    _file: File,
}

pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

impl WriterLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        ensure_parent_dir(path)?;
        let lock_path = lock_path_for(path);
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(PipelineError::Locked {
                    path: path.to_path_buf(),
                    lock: lock_path,
                });
            }
            Err(e) => return Err(e.into()),
        };

        writeln!(
            file,
            "pid={} acquired={}",
            std::process::id(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        )?;
        file.flush()?;

        tracing::debug!("acquired writer lock {}", lock_path.display());
        Ok(Self {
            lock_path,
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            tracing::warn!("failed to release lock {}: {}", self.lock_path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_writer_is_rejected_until_release() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("final_cleaned.jsonl");

        let first = WriterLock::acquire(&target).unwrap();
        assert!(first.path().exists());
        assert!(matches!(
            WriterLock::acquire(&target),
            Err(PipelineError::Locked { .. })
        ));

        drop(first);
        assert!(!lock_path_for(&target).exists());
        assert!(WriterLock::acquire(&target).is_ok());
    }
}
