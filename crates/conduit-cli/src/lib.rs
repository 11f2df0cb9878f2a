//! conduit - conda environment synchronization
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Resolves package specs against conda channels, computes a transaction for
//! a target prefix and applies it.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.conduit/
//! ├── conduitrc.toml   # Optional configuration overlay
//! ├── pkgs/            # Extracted packages
//! │   └── cache/       # Cached repodata documents
//! └── envs/            # Named environments (-n)
//! ```

pub mod cmd;
pub mod ui;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use conduit_core::config::{Config, default_root_prefix};
use conduit_core::Error;

#[derive(Debug, Parser)]
#[command(name = "conduit")]
#[command(author, version, about = "conduit - conda environment synchronization")]
pub struct Cli {
    /// Root prefix holding pkgs/, envs/ and conduitrc.toml
    #[arg(short = 'r', long, global = true, env = "CONDUIT_ROOT_PREFIX")]
    pub root_prefix: Option<PathBuf>,

    /// Configuration file (defaults to <root>/conduitrc.toml when present)
    #[arg(long, global = true, env = "CONDUIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print machine readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Use cached repodata only
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Which environment to operate on.
#[derive(Debug, Clone, Default, Args)]
pub struct TargetArgs {
    /// Path to the target environment (defaults to $CONDA_PREFIX)
    #[arg(short = 'p', long = "prefix", conflicts_with = "name")]
    pub prefix: Option<PathBuf>,

    /// Name of an environment under <root>/envs
    #[arg(short = 'n', long = "name")]
    pub name: Option<String>,
}

/// Options shared by `install` and `create`.
#[derive(Debug, Clone, Default, Args)]
pub struct SolveArgs {
    /// Package specs, e.g. "numpy>=1.26" or "conda-forge::xz"
    pub specs: Vec<String>,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Channel to search, most preferred first (repeatable)
    #[arg(short = 'c', long = "channel")]
    pub channels: Vec<String>,

    /// Show the transaction without applying it
    #[arg(long)]
    pub dry_run: bool,

    /// Do not ask for confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Maximum concurrent repodata downloads
    #[arg(long)]
    pub max_parallel_downloads: Option<usize>,

    /// Connect timeout in seconds
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Retries per repodata download
    #[arg(long)]
    pub retries: Option<u32>,

    /// Seconds before the first retry
    #[arg(long)]
    pub retry_timeout: Option<u64>,

    /// Multiplier applied to the retry delay per attempt
    #[arg(long)]
    pub retry_backoff: Option<u32>,

    /// Repodata time-to-live in seconds (0 always fetches, -1 never expires)
    #[arg(long, allow_hyphen_values = true)]
    pub repodata_ttl: Option<i64>,

    /// Use cached repodata regardless of age
    #[arg(long)]
    pub use_index_cache: bool,

    /// Never pick versions older than the installed ones
    #[arg(long)]
    pub no_allow_downgrade: bool,

    /// Disable TLS certificate verification
    #[arg(long)]
    pub ssl_no_verify: bool,

    /// CA bundle to trust instead of the system one
    #[arg(long)]
    pub cacert_path: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install packages into an existing environment
    Install(SolveArgs),
    /// Create an environment and install packages into it
    Create(SolveArgs),
    /// List packages installed in an environment
    List {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Show the effective configuration
    Info,
}

impl Cli {
    /// Build the effective configuration: defaults, then the config file,
    /// then command line flags.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when no root prefix can be determined
    /// or the config file is unreadable.
    pub fn load_config(&self) -> Result<Config, Error> {
        let root = self
            .root_prefix
            .clone()
            .or_else(default_root_prefix)
            .ok_or_else(|| Error::Configuration("no root prefix given and no home directory".into()))?;

        let mut config = match &self.config {
            Some(path) => Config::load(&root, path)?,
            None => {
                let default_file = Config::default_file(&root);
                if default_file.is_file() {
                    Config::load(&root, &default_file)?
                } else {
                    Config::new(&root)
                }
            }
        };

        config.verbosity = self.verbose;
        config.quiet |= self.quiet;
        config.json |= self.json;
        config.offline |= self.offline;

        match &self.command {
            Commands::Install(args) | Commands::Create(args) => {
                args.apply(&mut config);
                config.target_prefix = args.target.resolve(&config);
            }
            Commands::List { target } => config.target_prefix = target.resolve(&config),
            Commands::Info => {
                config.target_prefix = TargetArgs::default().resolve(&config);
            }
        }

        config.validate()?;
        Ok(config)
    }
}

impl TargetArgs {
    /// `--prefix`, then `--name`, then `$CONDA_PREFIX`.
    pub fn resolve(&self, config: &Config) -> Option<PathBuf> {
        if let Some(prefix) = &self.prefix {
            return Some(prefix.clone());
        }
        if let Some(name) = &self.name {
            return Some(config.env_prefix(name));
        }
        std::env::var_os("CONDA_PREFIX")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| config.target_prefix.clone())
    }
}

impl SolveArgs {
    fn apply(&self, config: &mut Config) {
        if !self.channels.is_empty() {
            config.channels.clone_from(&self.channels);
        }
        config.dry_run |= self.dry_run;
        config.always_yes |= self.yes;
        config.use_index_cache |= self.use_index_cache;
        if self.no_allow_downgrade {
            config.allow_downgrade = false;
        }
        if self.ssl_no_verify {
            config.ssl_verify = false;
        }
        if let Some(path) = &self.cacert_path {
            config.cacert_path = Some(path.clone());
        }
        if let Some(n) = self.max_parallel_downloads {
            config.max_parallel_downloads = n;
        }
        if let Some(secs) = self.connect_timeout {
            config.connect_timeout_secs = secs;
        }
        if let Some(n) = self.retries {
            config.max_retries = n;
        }
        if let Some(secs) = self.retry_timeout {
            config.retry_timeout_secs = secs;
        }
        if let Some(factor) = self.retry_backoff {
            config.retry_backoff = factor;
        }
        if let Some(ttl) = self.repodata_ttl {
            config.local_repodata_ttl = ttl;
        }
    }
}
