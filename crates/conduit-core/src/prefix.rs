//! Target environments and their installed-package ledger.
//!
//! The ledger is one JSON file per package under `<prefix>/conda-meta/`,
//! named `<name>-<version>-<build>.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use conduit_schema::PrefixRecord;
use thiserror::Error;
use tracing::debug;

use crate::io::write_atomic;

/// Ledger directory name inside a prefix.
pub const CONDA_META: &str = "conda-meta";

/// Prefix-local package directory name.
pub const PKGS_DIR: &str = "pkgs";

/// Errors reading or writing ledger entries.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Filesystem failure on a ledger path.
    #[error("{}: {source}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A ledger entry is not a valid record.
    #[error("Corrupt ledger entry {}: {source}", path.display())]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LedgerError + '_ {
    move |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A target prefix on disk, which may not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    root: PathBuf,
}

impl Environment {
    /// Environment rooted at `root`; nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Prefix root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/conda-meta`, home of the ledger.
    pub fn conda_meta(&self) -> PathBuf {
        self.root.join(CONDA_META)
    }

    /// `<root>/pkgs`
    pub fn pkgs_dir(&self) -> PathBuf {
        self.root.join(PKGS_DIR)
    }

    /// Returns `true` if the prefix root is an existing directory.
    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Create the root, `conda-meta/` and `pkgs/`.
    ///
    /// # Errors
    ///
    /// Returns the first directory that could not be created.
    pub fn create(&self) -> Result<(), LedgerError> {
        for dir in [self.root.clone(), self.conda_meta(), self.pkgs_dir()] {
            std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        }
        Ok(())
    }
}

/// Installed records of one prefix, keyed by package name.
#[derive(Debug, Clone)]
pub struct PrefixData {
    meta_dir: PathBuf,
    records: BTreeMap<String, PrefixRecord>,
}

impl PrefixData {
    /// Read every `*.json` under `<prefix>/conda-meta`. A missing directory
    /// is an empty ledger.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on unreadable or unparseable entries.
    pub fn load(env: &Environment) -> Result<Self, LedgerError> {
        let meta_dir = env.conda_meta();
        let mut records = BTreeMap::new();

        if meta_dir.is_dir() {
            let entries = std::fs::read_dir(&meta_dir).map_err(io_err(&meta_dir))?;
            for entry in entries {
                let path = entry.map_err(io_err(&meta_dir))?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let bytes = std::fs::read(&path).map_err(io_err(&path))?;
                let record: PrefixRecord = serde_json::from_slice(&bytes)
                    .map_err(|source| LedgerError::Parse { path, source })?;
                records.insert(record.package().name.clone(), record);
            }
        }

        debug!("Loaded {} ledger entries from {}", records.len(), meta_dir.display());
        Ok(Self { meta_dir, records })
    }

    /// Records sorted by name.
    pub fn records(&self) -> impl Iterator<Item = &PrefixRecord> {
        self.records.values()
    }

    /// Owned copy of every record, sorted by name.
    pub fn to_vec(&self) -> Vec<PrefixRecord> {
        self.records.values().cloned().collect()
    }

    /// Installed record for `name`.
    pub fn get(&self, name: &str) -> Option<&PrefixRecord> {
        self.records.get(name)
    }

    /// Number of installed packages.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nothing is installed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Persist `record`, replacing any entry with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] if the entry cannot be written.
    pub fn insert(&mut self, record: PrefixRecord) -> Result<(), LedgerError> {
        let path = self.meta_dir.join(record.file_name());
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|source| LedgerError::Parse { path: path.clone(), source })?;
        write_atomic(&path, &json).map_err(io_err(&path))?;

        if let Some(old) = self.records.insert(record.package().name.clone(), record) {
            let old_path = self.meta_dir.join(old.file_name());
            if old_path != path {
                remove_if_present(&old_path)?;
            }
        }
        Ok(())
    }

    /// Delete the entry for `name`, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] if the entry file cannot be removed.
    pub fn remove(&mut self, name: &str) -> Result<Option<PrefixRecord>, LedgerError> {
        let Some(record) = self.records.remove(name) else {
            return Ok(None);
        };
        remove_if_present(&self.meta_dir.join(record.file_name()))?;
        Ok(Some(record))
    }
}

fn remove_if_present(path: &Path) -> Result<(), LedgerError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(io_err(path)(e)),
        _ => Ok(()),
    }
}
