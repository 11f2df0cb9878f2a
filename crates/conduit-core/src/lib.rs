pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod fetch;
pub mod io;
pub mod package_cache;
pub mod pipeline;
pub mod pool;
pub mod prefix;
pub mod repo;
pub mod request;
pub mod solver;
pub mod transaction;
pub mod transport;

pub mod reporter;

pub use config::Config;
pub use error::Error;
pub use package_cache::{MultiPackageCache, PackageCache};
pub use pipeline::{Outcome, Pipeline};
pub use prefix::{Environment, PrefixData};
pub use reporter::{NullReporter, Reporter};
pub use solver::{PubGrubSolver, Solver};
pub use transaction::{AlwaysConfirm, Confirm, TransactionPlan, TransactionReport};
pub use transport::{HttpTransport, Transport};

/// User Agent string for repodata and package downloads
pub const USER_AGENT: &str = concat!("conduit/", env!("CARGO_PKG_VERSION"));
