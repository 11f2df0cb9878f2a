//! Pipeline errors and their process exit codes.

use conduit_schema::SpecError;
use thiserror::Error;

use crate::cache::CacheError;
use crate::prefix::LedgerError;
use crate::solver::Unsatisfiable;
use crate::transport::TransportError;

/// Everything that can stop a pipeline run.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or contradictory settings (no channels, no prefix, bad config file).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A user spec string could not be parsed.
    #[error("Invalid spec '{spec}': {source}")]
    InvalidSpec {
        /// The raw spec string.
        spec: String,
        /// Why it was rejected.
        source: SpecError,
    },

    /// No configured channel produced usable repodata.
    #[error("Network error: {0}")]
    Network(String),

    /// The solver found no consistent selection.
    #[error("Could not solve for environment specs\n{0}")]
    Unsatisfiable(#[from] Unsatisfiable),

    /// A transaction step failed after `completed` of `total` steps were applied.
    #[error("Transaction failed after {completed}/{total} steps: {message}")]
    Transaction {
        /// Steps applied before the failure.
        completed: usize,
        /// Steps in the plan.
        total: usize,
        /// What went wrong.
        message: String,
    },

    /// The run was interrupted.
    #[error("Interrupted")]
    Cancelled,

    /// Metadata cache could not be prepared.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Installed-package ledger could not be read or written.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Any other filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Self::Network(err.to_string())
    }
}

impl Error {
    /// Short machine readable category, used as `kind` in JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) | Self::InvalidSpec { .. } => "configuration",
            Self::Network(_) => "network",
            Self::Unsatisfiable(_) => "unsatisfiable",
            Self::Transaction { .. } => "transaction",
            Self::Cancelled => "interrupted",
            Self::Cache(_) | Self::Ledger(_) | Self::Io(_) => "io",
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration(_) | Self::InvalidSpec { .. } => 2,
            Self::Network(_) => 3,
            Self::Unsatisfiable(_) => 4,
            Self::Transaction { .. } => 5,
            Self::Cancelled => 130,
            Self::Cache(_) | Self::Ledger(_) | Self::Io(_) => 1,
        }
    }
}
