//! Reporter trait for dependency injection
//!
//! This trait allows the pipeline to report progress and status without
//! being coupled to a specific console implementation.

use std::path::Path;

use crate::transaction::TransactionPlan;

pub trait Reporter: Send + Sync {
    /// Indicates a new section or phase has started (e.g. "Fetching", "Linking").
    fn section(&self, title: &str);

    /// A repodata document is being downloaded.
    fn fetching(&self, url: &str);

    /// A repodata document is ready, either from the cache or the network.
    fn fetched(&self, url: &str, from_cache: bool);

    /// A repository could not be obtained and is skipped.
    fn unavailable(&self, url: &str, reason: &str);

    /// Present a computed plan before confirmation.
    fn transaction(&self, plan: &TransactionPlan, prefix: &Path);

    /// A package payload is being downloaded into the package cache.
    fn downloading(&self, name: &str, version: &str);

    /// A package is being linked into the prefix.
    fn installing(&self, name: &str, version: &str);

    /// A package is being unlinked from the prefix.
    fn removing(&self, name: &str, version: &str);

    /// Marks a package operation as successfully completed.
    fn done(&self, name: &str, version: &str, detail: &str);

    /// Marks a package operation as failed with a specific reason.
    fn failed(&self, name: &str, version: &str, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Display a final summary of multiple operations.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn fetching(&self, url: &str) {
        (**self).fetching(url);
    }
    fn fetched(&self, url: &str, from_cache: bool) {
        (**self).fetched(url, from_cache);
    }
    fn unavailable(&self, url: &str, reason: &str) {
        (**self).unavailable(url, reason);
    }
    fn transaction(&self, plan: &TransactionPlan, prefix: &Path) {
        (**self).transaction(plan, prefix);
    }
    fn downloading(&self, name: &str, version: &str) {
        (**self).downloading(name, version);
    }
    fn installing(&self, name: &str, version: &str) {
        (**self).installing(name, version);
    }
    fn removing(&self, name: &str, version: &str) {
        (**self).removing(name, version);
    }
    fn done(&self, name: &str, version: &str, detail: &str) {
        (**self).done(name, version, detail);
    }
    fn failed(&self, name: &str, version: &str, reason: &str) {
        (**self).failed(name, version, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn success(&self, msg: &str) {
        (**self).success(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., JSON output, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn fetching(&self, _: &str) {}
    fn fetched(&self, _: &str, _: bool) {}
    fn unavailable(&self, _: &str, _: &str) {}
    fn transaction(&self, _: &TransactionPlan, _: &Path) {}
    fn downloading(&self, _: &str, _: &str) {}
    fn installing(&self, _: &str, _: &str) {}
    fn removing(&self, _: &str, _: &str) {}
    fn done(&self, _: &str, _: &str, _: &str) {}
    fn failed(&self, _: &str, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}
