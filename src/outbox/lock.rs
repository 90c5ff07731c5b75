//! Cross-process ownership of an outbox.
//!
//! Only the process holding the owner lock may move messages to `sending` or
//! recover interrupted ones. The lock is an advisory exclusive lock on
//! `<db>.lock`; the OS drops it when the holder exits, crashed or not.

use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Held by the one process allowed to drain an outbox. Released on drop.
#[derive(Debug)]
pub struct OwnerLock {
    // `None` for an in-memory outbox, which no other process can see.
    file: Option<File>,
}

impl OwnerLock {
    /// Ownership of an outbox that lives only in this process.
    pub(crate) fn private() -> Self {
        Self { file: None }
    }

    /// Try to take the lock for the database at `db_path`.
    /// `Ok(None)` when another process holds it.
    pub fn try_acquire(db_path: &Path) -> Result<Option<Self>, StoreError> {
        let lock_path = lock_path(db_path);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Ok(None);
            }
            return Err(e.into());
        }

        // Owner pid for diagnostics only.
        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        tracing::debug!(path = %lock_path.display(), "outbox ownership acquired");

        Ok(Some(Self { file: Some(file) }))
    }

    /// Whether some process currently owns the outbox at `db_path`.
    pub fn is_held(db_path: &Path) -> Result<bool, StoreError> {
        Ok(Self::try_acquire(db_path)?.is_none())
    }
}

impl Drop for OwnerLock {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            let _ = file.unlock();
        }
    }
}

/// `outbox.db` → `outbox.db.lock`.
pub fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = OsString::from(db_path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}
