//! Transaction planning and execution.
//!
//! Models the change set as explicit state transitions:
//!
//! ```text
//! PlannedTransaction --[confirm()]--> ConfirmedTransaction --[execute()]--> CommittedTransaction
//!                    \--------------> Declined
//! ```
//!
//! A [`PlannedTransaction`] never touches the prefix, so reporting a plan (or a
//! dry run) cannot mutate anything.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use conduit_schema::{MatchSpec, PrefixRecord, RepoDataRecord, Version};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::Error;
use crate::package_cache::PackageCache;
use crate::prefix::{Environment, PrefixData};
use crate::reporter::Reporter;

/// How one package changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Newly installed.
    Install,
    /// Removed.
    Remove,
    /// Replaced by a newer version.
    Upgrade,
    /// Replaced by an older version.
    Downgrade,
    /// Same version, different build.
    Change,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Install => "Install",
            Self::Remove => "Remove",
            Self::Upgrade => "Upgrade",
            Self::Downgrade => "Downgrade",
            Self::Change => "Change",
        };
        f.write_str(s)
    }
}

/// One line of a plan, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Package name.
    pub name: String,
    /// Classification.
    pub kind: ChangeKind,
    /// Installed record being replaced or removed.
    pub old: Option<RepoDataRecord>,
    /// Record being linked.
    pub new: Option<RepoDataRecord>,
}

/// Removals and additions computed from one solver selection and one ledger
/// snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionPlan {
    /// Records to unlink, sorted by name.
    pub removals: Vec<PrefixRecord>,
    /// Records to link, dependencies before dependents.
    pub additions: Vec<RepoDataRecord>,
    /// Per-package view of the same change set, sorted by name.
    pub changes: Vec<Change>,
    /// Spec string to record per added package.
    pub requested_specs: BTreeMap<String, String>,
}

impl TransactionPlan {
    /// Diff `selection` against the installed `ledger`.
    ///
    /// `requested` maps package names to the raw spec strings the user typed;
    /// a replaced package that was not requested again keeps its old spec.
    pub fn compute(
        selection: Vec<RepoDataRecord>,
        ledger: &PrefixData,
        requested: &BTreeMap<String, String>,
    ) -> Self {
        let selected_names: HashSet<String> =
            selection.iter().map(|r| r.package.name.clone()).collect();

        let mut removals = Vec::new();
        let mut additions = Vec::new();
        let mut changes = Vec::new();
        let mut requested_specs = BTreeMap::new();

        for record in selection {
            let name = record.package.name.clone();
            let kind = match ledger.get(&name) {
                None => ChangeKind::Install,
                Some(old) if old.package().same_identity(&record.package) => continue,
                Some(old) => {
                    removals.push(old.clone());
                    classify(&old.package().version, &record.package.version)
                }
            };

            let spec = requested
                .get(&name)
                .cloned()
                .or_else(|| ledger.get(&name).and_then(|old| old.requested_spec.clone()));
            if let Some(spec) = spec {
                requested_specs.insert(name.clone(), spec);
            }

            changes.push(Change {
                name,
                kind,
                old: ledger.get(&record.package.name).map(|r| r.repodata_record.clone()),
                new: Some(record.clone()),
            });
            additions.push(record);
        }

        for old in ledger.records() {
            if !selected_names.contains(&old.package().name) {
                removals.push(old.clone());
                changes.push(Change {
                    name: old.package().name.clone(),
                    kind: ChangeKind::Remove,
                    old: Some(old.repodata_record.clone()),
                    new: None,
                });
            }
        }

        removals.sort_by(|a, b| a.package().name.cmp(&b.package().name));
        changes.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            removals,
            additions: link_order(additions),
            changes,
            requested_specs,
        }
    }

    /// Returns `true` when nothing would change.
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty()
    }

    /// Number of executor steps.
    pub fn step_count(&self) -> usize {
        self.removals.len() + self.additions.len()
    }

    /// Structured report of this plan.
    ///
    /// `FETCH` lists the additions `cache` does not hold yet.
    pub fn report(
        &self,
        prefix: &Path,
        cache: &dyn PackageCache,
        dry_run: bool,
        success: bool,
    ) -> TransactionReport {
        TransactionReport {
            dry_run,
            prefix: prefix.to_path_buf(),
            actions: Actions {
                fetch: self
                    .additions
                    .iter()
                    .filter(|r| cache.lookup(r).is_none())
                    .cloned()
                    .collect(),
                unlink: self
                    .removals
                    .iter()
                    .map(|r| r.repodata_record.clone())
                    .collect(),
                link: self.additions.clone(),
            },
            success,
        }
    }
}

fn classify(old: &str, new: &str) -> ChangeKind {
    match (Version::parse(old), Version::parse(new)) {
        (Ok(old), Ok(new)) => match new.cmp(&old) {
            Ordering::Greater => ChangeKind::Upgrade,
            Ordering::Less => ChangeKind::Downgrade,
            Ordering::Equal => ChangeKind::Change,
        },
        _ => ChangeKind::Change,
    }
}

/// Depth-first topological sort over the additions' own dependency edges.
/// Cycles are broken at the back edge.
fn link_order(additions: Vec<RepoDataRecord>) -> Vec<RepoDataRecord> {
    let mut by_name: BTreeMap<String, RepoDataRecord> = additions
        .into_iter()
        .map(|r| (r.package.name.clone(), r))
        .collect();
    let deps: HashMap<String, Vec<String>> = by_name
        .iter()
        .map(|(name, record)| {
            let names = record
                .package
                .depends
                .iter()
                .filter_map(|d| MatchSpec::parse(d).ok())
                .map(|spec| spec.name)
                .filter(|dep| by_name.contains_key(dep) && dep != name)
                .collect();
            (name.clone(), names)
        })
        .collect();

    let mut order = Vec::with_capacity(by_name.len());
    let mut visited = HashSet::new();
    let mut visiting = HashSet::new();
    let names: Vec<String> = by_name.keys().cloned().collect();
    for name in &names {
        visit(name, &deps, &mut order, &mut visited, &mut visiting);
    }

    order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect()
}

fn visit(
    name: &str,
    deps: &HashMap<String, Vec<String>>,
    order: &mut Vec<String>,
    visited: &mut HashSet<String>,
    visiting: &mut HashSet<String>,
) {
    if visited.contains(name) || visiting.contains(name) {
        return;
    }
    visiting.insert(name.to_string());
    for dep in deps.get(name).into_iter().flatten() {
        visit(dep, deps, order, visited, visiting);
    }
    visiting.remove(name);
    visited.insert(name.to_string());
    order.push(name.to_string());
}

/// `actions` block of a [`TransactionReport`].
#[derive(Debug, Clone, Serialize)]
pub struct Actions {
    /// Archives to download.
    #[serde(rename = "FETCH")]
    pub fetch: Vec<RepoDataRecord>,
    /// Records to unlink.
    #[serde(rename = "UNLINK")]
    pub unlink: Vec<RepoDataRecord>,
    /// Records to link.
    #[serde(rename = "LINK")]
    pub link: Vec<RepoDataRecord>,
}

/// Machine readable transaction summary, printed with `--json`.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionReport {
    /// The plan was not executed.
    pub dry_run: bool,
    /// Target prefix.
    pub prefix: PathBuf,
    /// Planned actions.
    pub actions: Actions,
    /// The run finished without error.
    pub success: bool,
}

/// Asks whether a plan may be applied.
pub trait Confirm: Send + Sync {
    /// Returns `true` to proceed.
    fn confirm(&self, plan: &TransactionPlan) -> bool;
}

/// Approves every plan, used for `--yes` and tests.
#[derive(Debug, Clone, Copy)]
pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm(&self, _: &TransactionPlan) -> bool {
        true
    }
}

/// State 1: computed, reported, nothing mutated.
#[derive(Debug)]
pub struct PlannedTransaction {
    plan: TransactionPlan,
    env: Environment,
    ledger: PrefixData,
    create: bool,
}

/// State 2a: the user said no. Nothing was mutated.
#[derive(Debug)]
pub struct Declined {
    /// The plan that was refused.
    pub plan: TransactionPlan,
}

/// State 2b: approved and ready to execute.
#[derive(Debug)]
pub struct ConfirmedTransaction {
    planned: PlannedTransaction,
}

/// State 3: every step applied; the ledger equals the new selection.
#[derive(Debug)]
pub struct CommittedTransaction {
    /// The applied plan.
    pub plan: TransactionPlan,
    /// Ledger after the last step.
    pub ledger: PrefixData,
}

impl PlannedTransaction {
    /// Wrap a plan for `env`. `create` makes execution create the prefix first.
    pub fn new(plan: TransactionPlan, env: Environment, ledger: PrefixData, create: bool) -> Self {
        Self {
            plan,
            env,
            ledger,
            create,
        }
    }

    /// The plan awaiting confirmation.
    pub fn plan(&self) -> &TransactionPlan {
        &self.plan
    }

    /// Target prefix.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Drop the transaction and keep the plan.
    pub fn into_plan(self) -> TransactionPlan {
        self.plan
    }

    /// Ask `confirm` unless `always_yes` is set or there is nothing to do.
    ///
    /// # Errors
    ///
    /// Returns [`Declined`] when the collaborator refuses.
    pub fn confirm(
        self,
        confirm: &dyn Confirm,
        always_yes: bool,
    ) -> Result<ConfirmedTransaction, Declined> {
        if always_yes || self.plan.is_empty() || confirm.confirm(&self.plan) {
            Ok(ConfirmedTransaction { planned: self })
        } else {
            Err(Declined { plan: self.plan })
        }
    }
}

impl ConfirmedTransaction {
    /// The plan about to run.
    pub fn plan(&self) -> &TransactionPlan {
        &self.planned.plan
    }

    /// Apply removals, then additions, stopping at the first failure.
    ///
    /// There is no rollback: after a failure the ledger holds exactly the
    /// steps that completed. `cancel` is checked between steps.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transaction`] with the completed step count,
    /// [`Error::Cancelled`] when interrupted, or [`Error::Ledger`] if the
    /// prefix cannot be created.
    pub async fn execute(
        self,
        cache: &dyn PackageCache,
        reporter: &dyn Reporter,
        cancel: &CancellationToken,
    ) -> Result<CommittedTransaction, Error> {
        let PlannedTransaction {
            plan,
            env,
            mut ledger,
            create,
        } = self.planned;

        if create {
            env.create()?;
        }

        let total = plan.step_count();
        let mut completed = 0;
        let fail = |completed: usize, message: String| Error::Transaction {
            completed,
            total,
            message,
        };

        if !plan.removals.is_empty() {
            reporter.section("Unlinking");
        }
        for old in &plan.removals {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let pkg = old.package();
            reporter.removing(&pkg.name, &pkg.version);
            if let Err(e) = unlink_files(env.root(), &old.files) {
                reporter.failed(&pkg.name, &pkg.version, &e.to_string());
                return Err(fail(completed, format!("unlink {}: {e}", pkg.dist_name())));
            }
            ledger
                .remove(&pkg.name)
                .map_err(|e| fail(completed, e.to_string()))?;
            reporter.done(&pkg.name, &pkg.version, "unlinked");
            completed += 1;
        }

        if !plan.additions.is_empty() {
            reporter.section("Linking");
        }
        for record in &plan.additions {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let pkg = &record.package;
            if cache.lookup(record).is_none() {
                reporter.downloading(&pkg.name, &pkg.version);
            }
            let extracted = match cache.ensure(record).await {
                Ok(dir) => dir,
                Err(e) => {
                    reporter.failed(&pkg.name, &pkg.version, &e.to_string());
                    return Err(fail(completed, format!("fetch {}: {e}", record.file_name)));
                }
            };

            reporter.installing(&pkg.name, &pkg.version);
            let src = extracted.clone();
            let dest = env.root().to_path_buf();
            let files = tokio::task::spawn_blocking(move || link_package(&src, &dest))
                .await
                .map_err(|e| fail(completed, e.to_string()))?
                .map_err(|e| fail(completed, format!("link {}: {e}", pkg.dist_name())))?;

            ledger
                .insert(PrefixRecord {
                    repodata_record: record.clone(),
                    files,
                    requested_spec: plan.requested_specs.get(&pkg.name).cloned(),
                    extracted_package_dir: Some(extracted),
                })
                .map_err(|e| fail(completed, e.to_string()))?;
            reporter.done(&pkg.name, &pkg.version, "linked");
            completed += 1;
        }

        info!("Committed {completed} steps in {}", env.root().display());
        Ok(CommittedTransaction { plan, ledger })
    }
}

/// Hardlink (or copy) every file of an extracted package into `prefix`,
/// skipping the package's own `info/` metadata. Returns the linked paths
/// relative to `prefix`, sorted.
///
/// # Errors
///
/// Returns the first IO error.
pub fn link_package(src: &Path, prefix: &Path) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        if rel.starts_with("info") {
            continue;
        }
        let target = prefix.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if target.symlink_metadata().is_ok() {
            std::fs::remove_file(&target)?;
        }

        if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else if std::fs::hard_link(entry.path(), &target).is_err() {
            debug!("Hardlink failed for {}, copying", target.display());
            std::fs::copy(entry.path(), &target)?;
        }

        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(rel);
    }
    files.sort();
    Ok(files)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(src)?, target)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::copy(src, target).map(|_| ())
}

/// Remove `files` (relative to `prefix`) and prune directories left empty.
///
/// # Errors
///
/// Returns the first IO error other than a missing file.
pub fn unlink_files(prefix: &Path, files: &[String]) -> std::io::Result<()> {
    let mut parents = HashSet::new();
    for file in files {
        let path = prefix.join(file);
        match std::fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        let mut dir = path.parent();
        while let Some(d) = dir {
            if d == prefix || !d.starts_with(prefix) {
                break;
            }
            parents.insert(d.to_path_buf());
            dir = d.parent();
        }
    }

    // Deepest first so children empty out before their parents
    let mut parents: Vec<PathBuf> = parents.into_iter().collect();
    parents.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    for dir in parents {
        let is_empty = std::fs::read_dir(&dir).is_ok_and(|mut entries| entries.next().is_none());
        if is_empty {
            std::fs::remove_dir(&dir).ok();
        }
    }
    Ok(())
}
