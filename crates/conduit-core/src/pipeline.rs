//! End-to-end environment synchronization.
//!
//! Channels are resolved, repodata fetched, a candidate pool built from the
//! fetched repositories plus the installed ledger, the request solved, and the
//! resulting plan reported, confirmed and applied. Every collaborator is
//! borrowed so the CLI and tests can swap them out.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::MetadataCache;
use crate::channel::resolve_channels;
use crate::config::Config;
use crate::error::Error;
use crate::fetch::Fetcher;
use crate::package_cache::PackageCache;
use crate::pool::CandidatePool;
use crate::prefix::{Environment, PrefixData};
use crate::repo::RepoArena;
use crate::reporter::Reporter;
use crate::request::SolveRequest;
use crate::solver::Solver;
use crate::transport::Transport;
use crate::transaction::{Confirm, PlannedTransaction, TransactionPlan, TransactionReport};

/// How a run ended, when it did not fail.
#[derive(Debug)]
pub enum Outcome {
    /// The environment already satisfies the request.
    NothingToDo,
    /// The plan was reported but not applied.
    DryRun(TransactionReport),
    /// The user declined the plan. Nothing changed.
    Declined(TransactionReport),
    /// The plan was applied.
    Committed(TransactionReport),
}

impl Outcome {
    /// Structured report, if a plan was produced.
    pub fn report(&self) -> Option<&TransactionReport> {
        match self {
            Self::NothingToDo => None,
            Self::DryRun(r) | Self::Declined(r) | Self::Committed(r) => Some(r),
        }
    }
}

/// Collaborators for one run.
pub struct Pipeline<'a> {
    config: &'a Config,
    transport: &'a dyn Transport,
    solver: &'a dyn Solver,
    package_cache: &'a dyn PackageCache,
    confirm: &'a dyn Confirm,
    reporter: &'a dyn Reporter,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a> Pipeline<'a> {
    /// Wire the collaborators for one run.
    pub fn new(
        config: &'a Config,
        transport: &'a dyn Transport,
        solver: &'a dyn Solver,
        package_cache: &'a dyn PackageCache,
        confirm: &'a dyn Confirm,
        reporter: &'a dyn Reporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            transport,
            solver,
            package_cache,
            confirm,
            reporter,
            cancel,
        }
    }

    /// Make the target prefix satisfy `specs`.
    ///
    /// With `create` the prefix may be missing and is created on execution;
    /// otherwise it must already exist.
    ///
    /// # Errors
    ///
    /// Configuration problems are reported before any network activity;
    /// see [`Error`] for the remaining categories.
    pub async fn install<S: AsRef<str>>(&self, specs: &[S], create: bool) -> Result<Outcome, Error> {
        let started = Instant::now();
        let env = self.target_environment(create)?;
        let request = SolveRequest::install(specs, self.config)?;

        let channels = resolve_channels(&self.config.channels, self.config)?;

        let metadata_cache = MetadataCache::new(self.config.metadata_cache_dir(), self.config.cache_ttl());
        metadata_cache.ensure_root()?;
        let mut arena = RepoArena::from_channels(&channels, &metadata_cache);
        debug!("Resolved {} channels into {} repositories", channels.len(), arena.len());

        self.reporter.section("Fetching repodata");
        let fetcher = Fetcher::new(self.transport, self.reporter, self.config, self.cancel.clone());
        let summary = fetcher.fetch_all(&mut arena).await?;
        info!(
            "Repodata ready: {} cached, {} downloaded, {} unavailable",
            summary.from_cache, summary.downloaded, summary.unavailable
        );

        let ledger = PrefixData::load(&env)?;
        let pool = CandidatePool::build(&ledger.to_vec(), &arena);
        debug!("Candidate pool holds {} records", pool.len());

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let requested: BTreeMap<String, String> = request
            .jobs
            .iter()
            .map(|job| (job.spec.name.clone(), job.raw.clone()))
            .collect();

        self.reporter.section("Solving");
        let selection = self.solver.solve(&pool, request)?;
        let plan = TransactionPlan::compute(selection, &ledger, &requested);

        if plan.is_empty() {
            self.reporter
                .success("All requested packages already installed");
            return Ok(Outcome::NothingToDo);
        }

        self.reporter.transaction(&plan, env.root());

        if self.config.dry_run {
            let report = plan.report(env.root(), self.package_cache, true, true);
            return Ok(Outcome::DryRun(report));
        }

        let report = plan.report(env.root(), self.package_cache, false, true);
        let planned = PlannedTransaction::new(plan, env, ledger, create);
        let confirmed = match planned.confirm(self.confirm, self.config.always_yes) {
            Ok(confirmed) => confirmed,
            Err(_) => {
                self.reporter.info("Transaction declined");
                return Ok(Outcome::Declined(TransactionReport {
                    success: false,
                    ..report
                }));
            }
        };

        let committed = confirmed
            .execute(self.package_cache, self.reporter, &self.cancel)
            .await?;
        self.reporter.summary(
            committed.plan.step_count(),
            "applied",
            started.elapsed().as_secs_f64(),
        );
        Ok(Outcome::Committed(report))
    }

    fn target_environment(&self, create: bool) -> Result<Environment, Error> {
        self.config.validate()?;
        let prefix: PathBuf = self
            .config
            .target_prefix
            .clone()
            .ok_or_else(|| Error::Configuration("no target prefix given".into()))?;
        let env = Environment::new(prefix);
        if !create && !env.exists() {
            return Err(Error::Configuration(format!(
                "prefix does not exist: {}",
                env.root().display()
            )));
        }
        Ok(env)
    }
}
