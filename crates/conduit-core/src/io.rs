//! Atomic file replacement.

use std::io::Write;
use std::path::Path;

/// Write `bytes` to `path` through a temp file in the same directory, then
/// rename it into place. Readers see either the old or the new content.
///
/// # Errors
///
/// Returns any IO error from creating, writing or renaming the temp file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// [`write_atomic`] on the blocking pool.
///
/// # Errors
///
/// Same as [`write_atomic`].
pub async fn write_atomic_async(path: &Path, bytes: bytes::Bytes) -> std::io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
        .await
        .map_err(std::io::Error::other)?
}
