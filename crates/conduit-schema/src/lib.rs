//! Data types shared by the conduit crates: platforms, conda version
//! ordering, match specs and repodata/ledger records.

pub mod platform;
pub mod record;
pub mod spec;
pub mod version;

// Re-exports
pub use platform::Platform;
pub use record::{ChannelInfo, PackageRecord, PrefixRecord, RepoData, RepoDataRecord};
pub use spec::{MatchSpec, SpecError};
pub use version::{Version, VersionError, VersionSpec};

/// Repodata document name inside every channel subdirectory.
pub const REPODATA_FILE: &str = "repodata.json";
