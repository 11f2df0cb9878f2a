//! Package payload cache spread over several root directories.
//!
//! Each package is extracted into `<root>/<name>-<version>-<build>/`. Misses
//! are downloaded, verified, unpacked into a temp dir inside the first
//! writable root and renamed into place, so a directory that exists is
//! always complete.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_schema::RepoDataRecord;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::transport::{Transport, TransportError};

/// Errors resolving a package payload.
#[derive(Error, Debug)]
pub enum PackageCacheError {
    /// The archive could not be downloaded.
    #[error("Download failed: {0}")]
    Transport(#[from] TransportError),

    /// The archive does not match the published checksum.
    #[error("Hash mismatch for {file}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Archive file name.
        file: String,
        /// Published SHA-256.
        expected: String,
        /// SHA-256 of the downloaded bytes.
        actual: String,
    },

    /// The archive extension is not one this cache can unpack.
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// Every configured root refused writes.
    #[error("No writable package cache among {0:?}")]
    NoWritableRoot(Vec<PathBuf>),

    /// Extraction or rename failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Archive formats understood by [`extract_archive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.tar`
    Tar,
    /// `.tar.gz` / `.tgz`
    TarGz,
    /// `.tar.zst`
    TarZst,
}

impl ArchiveFormat {
    /// Detect the format from a file name.
    pub fn detect(file_name: &str) -> Option<Self> {
        let lower = file_name.to_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".tar.zst") {
            Some(Self::TarZst)
        } else if lower.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// Unpack `bytes` into `dest`.
///
/// # Errors
///
/// Returns an IO error if decompression or unpacking fails.
pub fn extract_archive(bytes: &[u8], format: ArchiveFormat, dest: &Path) -> std::io::Result<()> {
    let reader: Box<dyn Read + '_> = match format {
        ArchiveFormat::Tar => Box::new(bytes),
        ArchiveFormat::TarGz => Box::new(flate2::read::GzDecoder::new(bytes)),
        ArchiveFormat::TarZst => Box::new(zstd::stream::read::Decoder::new(bytes)?),
    };
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.unpack(dest)
}

/// Where extracted packages come from.
#[async_trait]
pub trait PackageCache: Send + Sync {
    /// Extracted directory for `record` if some root already holds it.
    fn lookup(&self, record: &RepoDataRecord) -> Option<PathBuf>;

    /// Extracted directory for `record`, downloading and unpacking on a miss.
    async fn ensure(&self, record: &RepoDataRecord) -> Result<PathBuf, PackageCacheError>;
}

/// [`PackageCache`] over an ordered list of roots.
pub struct MultiPackageCache {
    roots: Vec<PathBuf>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl std::fmt::Debug for MultiPackageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiPackageCache")
            .field("roots", &self.roots)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl MultiPackageCache {
    /// Cache searching `roots` in order and downloading through `transport`.
    pub fn new(roots: Vec<PathBuf>, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            roots,
            transport,
            timeout,
        }
    }

    /// Configured roots.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

#[async_trait]
impl PackageCache for MultiPackageCache {
    fn lookup(&self, record: &RepoDataRecord) -> Option<PathBuf> {
        let dist = record.package.dist_name();
        self.roots
            .iter()
            .map(|root| root.join(&dist))
            .find(|dir| dir.is_dir())
    }

    async fn ensure(&self, record: &RepoDataRecord) -> Result<PathBuf, PackageCacheError> {
        if let Some(hit) = self.lookup(record) {
            debug!("Package cache hit {}", hit.display());
            return Ok(hit);
        }

        let format = ArchiveFormat::detect(&record.file_name)
            .ok_or_else(|| PackageCacheError::UnsupportedFormat(record.file_name.clone()))?;

        debug!("Downloading {}", record.url);
        let bytes = self.transport.get(&record.url, self.timeout).await?;

        if let Some(expected) = &record.package.sha256 {
            let actual = hex::encode(Sha256::digest(&bytes));
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(PackageCacheError::HashMismatch {
                    file: record.file_name.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let roots = self.roots.clone();
        let dist = record.package.dist_name();
        tokio::task::spawn_blocking(move || unpack_into_first_writable(&roots, &dist, &bytes, format))
            .await
            .map_err(std::io::Error::other)?
    }
}

fn unpack_into_first_writable(
    roots: &[PathBuf],
    dist: &str,
    bytes: &[u8],
    format: ArchiveFormat,
) -> Result<PathBuf, PackageCacheError> {
    for root in roots {
        if let Err(e) = std::fs::create_dir_all(root) {
            warn!("Package cache {} is not writable: {e}", root.display());
            continue;
        }
        let staging = match tempfile::Builder::new().prefix(".extract-").tempdir_in(root) {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Package cache {} is not writable: {e}", root.display());
                continue;
            }
        };

        extract_archive(bytes, format, staging.path())?;

        let target = root.join(dist);
        let staged = staging.keep();
        if let Err(e) = std::fs::rename(&staged, &target) {
            // Another process may have finished the same package first
            std::fs::remove_dir_all(&staged).ok();
            if target.is_dir() {
                return Ok(target);
            }
            return Err(e.into());
        }
        debug!("Extracted {dist} into {}", target.display());
        return Ok(target);
    }
    Err(PackageCacheError::NoWritableRoot(roots.to_vec()))
}
