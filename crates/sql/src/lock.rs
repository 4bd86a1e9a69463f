// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Advisory file locks for single-file databases.
//!
//! Repeat acquires from the same process consult the in-memory lock
//! table before touching the file, so a second acquisition fails with a
//! "locked" error instead of relying on OS lock re-entrancy.

use crate::error::SqlError;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn lock_table() -> &'static Mutex<HashSet<PathBuf>> {
    static TABLE: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// An exclusive lock on `<db>.lock`; released deterministically on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<std::fs::File>,
}

impl FileLock {
    /// Lock-file path for a database path.
    pub fn lock_path(db_path: &Path) -> PathBuf {
        let mut s = db_path.as_os_str().to_os_string();
        s.push(".lock");
        PathBuf::from(s)
    }

    /// Acquire exclusively; a second concurrent acquisition (same
    /// process or another) errors without retrying.
    pub fn acquire(db_path: &Path) -> Result<Self, SqlError> {
        let path = Self::lock_path(db_path);
        {
            let mut table = lock_table().lock();
            if !table.insert(path.clone()) {
                return Err(SqlError::Locked(path.display().to_string()));
            }
        }

        let file = match std::fs::OpenOptions::new().create(true).write(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                lock_table().lock().remove(&path);
                return Err(SqlError::Io(e));
            }
        };
        if let Err(e) = file.try_lock_exclusive() {
            lock_table().lock().remove(&path);
            tracing::debug!(path = %path.display(), error = %e, "file lock contention");
            return Err(SqlError::Locked(path.display().to_string()));
        }
        Ok(Self { path, file: Some(file) })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = fs2::FileExt::unlock(&file);
        }
        lock_table().lock().remove(&self.path);
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod lock_tests;
