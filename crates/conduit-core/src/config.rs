//! Run configuration.
//!
//! A [`Config`] is built once at process start (defaults, then an optional
//! TOML file, then command-line overrides) and passed by reference to every
//! pipeline stage.

use std::path::{Path, PathBuf};
use std::time::Duration;

use conduit_schema::Platform;
use serde::{Deserialize, Serialize};

use crate::cache::CacheTtl;
use crate::error::Error;

/// Alias that bare channel names are joined to.
pub const DEFAULT_CHANNEL_ALIAS: &str = "https://conda.anaconda.org";

/// Channels the `defaults` multi-channel expands to.
pub const DEFAULT_CHANNELS: [&str; 2] = [
    "https://repo.anaconda.com/pkgs/main",
    "https://repo.anaconda.com/pkgs/r",
];

/// Configuration file looked up inside the root prefix.
pub const CONFIG_FILE_NAME: &str = "conduitrc.toml";

/// Well-known locations of a system CA bundle, checked in order.
pub const CA_BUNDLE_PATHS: [&str; 6] = [
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/pki/tls/cacert.pem",
    "/etc/pki/ca-trust/extracted/pem/tls-ca-bundle.pem",
    "/etc/ssl/cert.pem",
];

/// Returns the fallback root prefix (`~/.conduit`), or None if the home
/// directory cannot be resolved.
pub fn default_root_prefix() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".conduit"))
}

/// Effective settings for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root prefix holding `pkgs/`, `envs/` and the config file.
    pub root_prefix: PathBuf,
    /// Environment to operate on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_prefix: Option<PathBuf>,

    /// Channels requested for this run, most preferred first.
    pub channels: Vec<String>,
    /// Base URL bare channel names are resolved against.
    pub channel_alias: String,
    /// Channels used when none are requested (and what `defaults` expands to).
    pub default_channels: Vec<String>,
    /// Primary platform subdirectory.
    pub platform: Platform,

    /// Repodata time-to-live in seconds: 0 always fetches, negative never expires.
    pub local_repodata_ttl: i64,
    /// Use cached repodata regardless of age.
    pub use_index_cache: bool,
    /// Maximum concurrent repodata downloads.
    pub max_parallel_downloads: usize,
    /// TCP connect timeout.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout.
    pub read_timeout_secs: u64,
    /// Base delay before the first retry.
    pub retry_timeout_secs: u64,
    /// Multiplier applied to the retry delay per attempt.
    pub retry_backoff: u32,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Verify TLS certificates.
    pub ssl_verify: bool,
    /// Explicit CA bundle, otherwise one of [`CA_BUNDLE_PATHS`] is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cacert_path: Option<PathBuf>,

    /// Let the solver pick versions older than the installed ones.
    pub allow_downgrade: bool,
    /// Never touch the network.
    pub offline: bool,
    /// Plan and report only.
    pub dry_run: bool,
    /// Skip the confirmation prompt.
    pub always_yes: bool,
    /// Emit machine readable output.
    pub json: bool,
    /// Suppress progress output.
    pub quiet: bool,
    /// `-v` count.
    pub verbosity: u8,

    /// Package cache roots, searched in order. Empty means `<root>/pkgs`.
    pub pkgs_dirs: Vec<PathBuf>,
    /// Directories named environments live in. Empty means `<root>/envs`.
    pub envs_dirs: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(default_root_prefix().unwrap_or_else(|| PathBuf::from(".conduit")))
    }
}

impl Config {
    /// Defaults rooted at `root_prefix`.
    pub fn new(root_prefix: impl Into<PathBuf>) -> Self {
        Self {
            root_prefix: root_prefix.into(),
            target_prefix: None,
            channels: Vec::new(),
            channel_alias: DEFAULT_CHANNEL_ALIAS.to_string(),
            default_channels: DEFAULT_CHANNELS.iter().map(ToString::to_string).collect(),
            platform: Platform::current(),
            local_repodata_ttl: 1200,
            use_index_cache: false,
            max_parallel_downloads: 5,
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
            retry_timeout_secs: 2,
            retry_backoff: 3,
            max_retries: 3,
            ssl_verify: true,
            cacert_path: None,
            allow_downgrade: true,
            offline: false,
            dry_run: false,
            always_yes: false,
            json: false,
            quiet: false,
            verbosity: 0,
            pkgs_dirs: Vec::new(),
            envs_dirs: Vec::new(),
        }
    }

    /// Parse a TOML document on top of the defaults for `root_prefix`.
    ///
    /// Keys missing from the document keep their default value; a
    /// `root_prefix` key in the file is ignored in favour of the argument.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the document is not valid TOML or
    /// a key has the wrong type.
    pub fn from_toml_str(root_prefix: &Path, contents: &str) -> Result<Self, Error> {
        let table: toml::Table = contents
            .parse()
            .map_err(|e| Error::Configuration(format!("invalid config file: {e}")))?;

        let mut merged = toml::Table::try_from(Self::new(root_prefix))
            .map_err(|e| Error::Configuration(e.to_string()))?;
        for (key, value) in table {
            if key != "root_prefix" {
                merged.insert(key, value);
            }
        }

        merged
            .try_into()
            .map_err(|e| Error::Configuration(format!("invalid config file: {e}")))
    }

    /// Load `path` if it exists, otherwise return the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the file exists but cannot be read
    /// or parsed.
    pub fn load(root_prefix: &Path, path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            tracing::debug!("No config file at {}", path.display());
            return Ok(Self::new(root_prefix));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        tracing::debug!("Loaded config from {}", path.display());
        Self::from_toml_str(root_prefix, &contents)
    }

    /// Default config file location: `<root>/conduitrc.toml`.
    pub fn default_file(root_prefix: &Path) -> PathBuf {
        root_prefix.join(CONFIG_FILE_NAME)
    }

    /// Package cache roots in search order.
    pub fn pkgs_dirs(&self) -> Vec<PathBuf> {
        if self.pkgs_dirs.is_empty() {
            vec![self.root_prefix.join("pkgs")]
        } else {
            self.pkgs_dirs.clone()
        }
    }

    /// Directories that hold named environments.
    pub fn envs_dirs(&self) -> Vec<PathBuf> {
        if self.envs_dirs.is_empty() {
            vec![self.root_prefix.join("envs")]
        } else {
            self.envs_dirs.clone()
        }
    }

    /// Location of a named environment (`-n name`).
    pub fn env_prefix(&self, name: &str) -> PathBuf {
        let envs = self.envs_dirs();
        envs.iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| {
                envs.first()
                    .map_or_else(|| self.root_prefix.join("envs"), Clone::clone)
                    .join(name)
            })
    }

    /// Directory repodata documents are cached in.
    pub fn metadata_cache_dir(&self) -> PathBuf {
        self.pkgs_dirs()
            .into_iter()
            .next()
            .unwrap_or_else(|| self.root_prefix.join("pkgs"))
            .join("cache")
    }

    /// Freshness policy for cached repodata.
    pub fn cache_ttl(&self) -> CacheTtl {
        if self.use_index_cache {
            CacheTtl::NeverExpire
        } else {
            CacheTtl::from_seconds(self.local_repodata_ttl)
        }
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Whole-request timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// CA bundle to trust: the explicit path, else the first well-known
    /// bundle that exists. `None` means none was found.
    pub fn ca_bundle(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cacert_path {
            return Some(path.clone());
        }
        CA_BUNDLE_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    }

    /// Check the invariants the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for a zero download limit or an
    /// empty root prefix.
    pub fn validate(&self) -> Result<(), Error> {
        if self.root_prefix.as_os_str().is_empty() {
            return Err(Error::Configuration("root prefix is not set".into()));
        }
        if self.max_parallel_downloads == 0 {
            return Err(Error::Configuration(
                "max_parallel_downloads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
