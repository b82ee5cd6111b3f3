//! Small helpers shared across modules

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

/// Maximum number of suffixed names tried before giving up on a collision
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Bytes represented by one work unit of a file download
pub const BYTES_PER_UNIT: u64 = 1_000_000;

/// Lock a mutex, recovering the data if a previous holder panicked
///
/// Progress state stays meaningful after a panicking observer, so poisoning is not
/// treated as fatal.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Work units a file of `size` bytes contributes to an estimation
///
/// Every file weighs at least one unit so that empty files still move progress.
#[must_use]
pub fn weight_for_size(size: u64) -> u64 {
    (size / BYTES_PER_UNIT).max(1)
}

/// Create a new file at `path`, or at `name (1).ext`, `name (2).ext`, ... if taken
///
/// Creation is exclusive, so concurrent downloads of items sharing a name each get
/// their own file. Returns the path actually created together with the open handle.
pub async fn create_unique(path: &Path) -> Result<(PathBuf, tokio::fs::File)> {
    match create_new(path).await {
        Ok(file) => return Ok((path.to_path_buf(), file)),
        Err(e) if e.kind() != std::io::ErrorKind::AlreadyExists => return Err(e.into()),
        Err(_) => {}
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Layout {
            path: path.to_path_buf(),
            message: "cannot extract file stem".to_string(),
        })?;
    let extension = path.extension().and_then(|e| e.to_str());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let candidate = parent.join(match extension {
            Some(ext) => format!("{stem} ({i}).{ext}"),
            None => format!("{stem} ({i})"),
        });
        match create_new(&candidate).await {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::Layout {
        path: path.to_path_buf(),
        message: format!("no free name after {MAX_RENAME_ATTEMPTS} attempts"),
    })
}

async fn create_new(path: &Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}
