//! Repodata cache: file naming and freshness decisions.
//!
//! This module only reads the cache directory. Files are written by the
//! fetcher with a temp-file-then-rename so readers never see partial data.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors preparing the cache directory.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache root could not be created.
    #[error("cannot create metadata cache directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
}

/// How long cached repodata stays usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTtl {
    /// Always refetch (configured as `0`).
    AlwaysFetch,
    /// Any existing file is fresh (configured as a negative value).
    NeverExpire,
    /// Fresh while younger than this many seconds.
    Seconds(u64),
}

impl CacheTtl {
    /// Interpret the configured `local_repodata_ttl` value.
    pub fn from_seconds(value: i64) -> Self {
        match value {
            0 => Self::AlwaysFetch,
            v if v < 0 => Self::NeverExpire,
            v => Self::Seconds(v.unsigned_abs()),
        }
    }
}

/// Freshness of one cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Usable without a network request.
    Fresh,
    /// Present but must be refetched.
    Stale,
    /// No cache file.
    Missing,
}

/// Stable cache file name for a repodata URL: first 8 hex chars of its SHA-256.
pub fn cache_file_name(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{}.json", &hex::encode(digest)[..8])
}

/// Read-only view of the repodata cache directory.
#[derive(Debug, Clone)]
pub struct MetadataCache {
    root: PathBuf,
    ttl: CacheTtl,
}

impl MetadataCache {
    /// Cache rooted at `root` with the given policy.
    pub fn new(root: impl Into<PathBuf>, ttl: CacheTtl) -> Self {
        Self {
            root: root.into(),
            ttl,
        }
    }

    /// Cache directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Freshness policy.
    pub fn ttl(&self) -> CacheTtl {
        self.ttl
    }

    /// Create the cache directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CreateDir`] if the directory cannot be created.
    pub fn ensure_root(&self) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.root).map_err(|source| CacheError::CreateDir {
            path: self.root.clone(),
            source,
        })
    }

    /// Path of the cache file for `url`.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.root.join(cache_file_name(url))
    }

    /// Freshness of the cache file for `url` right now.
    pub fn state(&self, url: &str) -> CacheState {
        self.state_at(&self.path_for(url), SystemTime::now())
    }

    /// Freshness of `path` as seen at `now`.
    pub fn state_at(&self, path: &Path, now: SystemTime) -> CacheState {
        let Ok(meta) = std::fs::metadata(path) else {
            return CacheState::Missing;
        };
        match self.ttl {
            CacheTtl::AlwaysFetch => CacheState::Stale,
            CacheTtl::NeverExpire => CacheState::Fresh,
            CacheTtl::Seconds(ttl) => {
                let Ok(modified) = meta.modified() else {
                    return CacheState::Stale;
                };
                // mtime in the future counts as age zero
                let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
                if age <= Duration::from_secs(ttl) {
                    CacheState::Fresh
                } else {
                    CacheState::Stale
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const URL: &str = "https://conda.anaconda.org/conda-forge/linux-64/repodata.json";

    #[test]
    fn test_file_name_is_stable() {
        let name = cache_file_name(URL);
        assert_eq!(name, cache_file_name(URL));
        assert_eq!(name.len(), 8 + ".json".len());
        assert_ne!(
            name,
            cache_file_name("https://conda.anaconda.org/conda-forge/noarch/repodata.json")
        );
    }

    #[test]
    fn test_ttl_from_seconds() {
        assert_eq!(CacheTtl::from_seconds(0), CacheTtl::AlwaysFetch);
        assert_eq!(CacheTtl::from_seconds(-1), CacheTtl::NeverExpire);
        assert_eq!(CacheTtl::from_seconds(60), CacheTtl::Seconds(60));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        for ttl in [CacheTtl::AlwaysFetch, CacheTtl::NeverExpire, CacheTtl::Seconds(60)] {
            let cache = MetadataCache::new(dir.path(), ttl);
            assert_eq!(cache.state(URL), CacheState::Missing);
        }
    }

    #[test]
    fn test_freshness_rules() {
        let dir = TempDir::new().unwrap();
        let probe = MetadataCache::new(dir.path(), CacheTtl::AlwaysFetch);
        let path = probe.path_for(URL);
        std::fs::write(&path, b"{}").unwrap();
        let written = std::fs::metadata(&path).unwrap().modified().unwrap();

        assert_eq!(probe.state_at(&path, written), CacheState::Stale);

        let forever = MetadataCache::new(dir.path(), CacheTtl::NeverExpire);
        let much_later = written + Duration::from_secs(10 * 365 * 24 * 3600);
        assert_eq!(forever.state_at(&path, much_later), CacheState::Fresh);

        let minute = MetadataCache::new(dir.path(), CacheTtl::Seconds(60));
        assert_eq!(
            minute.state_at(&path, written + Duration::from_secs(60)),
            CacheState::Fresh
        );
        assert_eq!(
            minute.state_at(&path, written + Duration::from_secs(61)),
            CacheState::Stale
        );
        assert_eq!(
            minute.state_at(&path, written - Duration::from_secs(5)),
            CacheState::Fresh
        );
    }

    #[test]
    fn test_ensure_root_creates_directory() {
        let dir = TempDir::new().unwrap();
        let cache = MetadataCache::new(dir.path().join("pkgs/cache"), CacheTtl::Seconds(1));
        cache.ensure_root().unwrap();
        assert!(cache.root().is_dir());
    }
}
