//! Solver interface and the `PubGrub` backed implementation.
//!
//! Each package name gets its candidates ranked by preference; rank `i` is
//! presented to `PubGrub` as `NumberVersion(i)` and the solver always tries
//! the lowest contained rank first, so "lowest version" means "most preferred
//! candidate". A synthetic root package depends on every requested spec and on
//! every installed package that was not requested, which keeps those unless a
//! requested spec forces a change.

use std::borrow::Borrow;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::rc::Rc;

use conduit_schema::{MatchSpec, RepoDataRecord};
use pubgrub::error::PubGrubError;
use pubgrub::range::Range;
use pubgrub::report::{DefaultStringReporter, Reporter as _};
use pubgrub::solver::{
    Dependencies, DependencyConstraints, DependencyProvider, choose_package_with_fewest_versions,
};
use pubgrub::version::NumberVersion;
use thiserror::Error;

use crate::pool::{Candidate, CandidatePool};
use crate::request::{Intent, SolveRequest};

/// The request has no consistent solution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct Unsatisfiable(pub String);

/// Picks the package set for a request.
pub trait Solver: Send + Sync {
    /// Return the complete package selection for the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Unsatisfiable`] with a human readable explanation when no
    /// selection satisfies every job.
    fn solve(
        &self,
        pool: &CandidatePool,
        request: SolveRequest,
    ) -> Result<Vec<RepoDataRecord>, Unsatisfiable>;
}

/// [`Solver`] built on `PubGrub`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PubGrubSolver;

impl Solver for PubGrubSolver {
    fn solve(
        &self,
        pool: &CandidatePool,
        request: SolveRequest,
    ) -> Result<Vec<RepoDataRecord>, Unsatisfiable> {
        let provider = CondaProvider::new(pool, &request);

        for job in request.jobs.iter().filter(|j| j.intent != Intent::Remove) {
            if provider.range_for(&job.spec) == Range::none() {
                return Err(Unsatisfiable(format!(
                    "nothing provides requested {}",
                    job.raw
                )));
            }
        }

        match pubgrub::solver::resolve(&provider, PkgId::Root, NumberVersion(0)) {
            Ok(solution) => {
                let mut selected: Vec<RepoDataRecord> = solution
                    .into_iter()
                    .filter_map(|(pkg, rank)| match pkg {
                        PkgId::Root => None,
                        PkgId::Name(name) => provider
                            .ranked(&name)
                            .get(rank.0 as usize)
                            .map(|c| c.record.clone()),
                    })
                    .collect();
                selected.sort_by(|a, b| a.package.name.cmp(&b.package.name));
                tracing::debug!("Solver selected {} packages", selected.len());
                Ok(selected)
            }
            Err(PubGrubError::NoSolution(mut tree)) => {
                tree.collapse_no_versions();
                Err(Unsatisfiable(DefaultStringReporter::report(&tree)))
            }
            Err(e) => Err(Unsatisfiable(e.to_string())),
        }
    }
}

/// Package identity inside `PubGrub`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PkgId {
    Root,
    Name(String),
}

impl fmt::Display for PkgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "the requested specs"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

struct CondaProvider<'a> {
    pool: &'a CandidatePool,
    requested: HashSet<String>,
    root: Vec<(String, Range<NumberVersion>)>,
    allow_downgrade: bool,
    ranked: RefCell<HashMap<String, Rc<Vec<&'a Candidate>>>>,
}

impl<'a> CondaProvider<'a> {
    fn new(pool: &'a CandidatePool, request: &SolveRequest) -> Self {
        let mut provider = Self {
            pool,
            requested: request.requested_names().map(str::to_string).collect(),
            root: Vec::new(),
            allow_downgrade: request.flags.allow_downgrade,
            ranked: RefCell::new(HashMap::new()),
        };

        let mut root: Vec<(String, Range<NumberVersion>)> = Vec::new();
        let mut removed = HashSet::new();
        for job in &request.jobs {
            if job.intent == Intent::Remove {
                removed.insert(job.spec.name.clone());
                continue;
            }
            let range = provider.range_for(&job.spec);
            match root.iter_mut().find(|(name, _)| *name == job.spec.name) {
                Some((_, existing)) => *existing = existing.intersection(&range),
                None => root.push((job.spec.name.clone(), range)),
            }
        }

        for installed in pool.installed_candidates() {
            let name = installed.name();
            if !provider.requested.contains(name) && !removed.contains(name) {
                root.push((name.to_string(), Range::any()));
            }
        }

        provider.root = root;
        provider
    }

    /// Candidates for `name`, most preferred first.
    fn ranked(&self, name: &str) -> Rc<Vec<&'a Candidate>> {
        if let Some(found) = self.ranked.borrow().get(name) {
            return Rc::clone(found);
        }

        let installed = self.pool.installed(name);
        let mut candidates: Vec<&'a Candidate> = self
            .pool
            .by_name(name)
            .into_iter()
            .filter(|c| {
                self.allow_downgrade || installed.is_none_or(|inst| c.version >= inst.version)
            })
            .collect();

        if self.requested.contains(name) {
            candidates.sort_by(|a, b| a.preference(b));
            // The installed build takes the slot of its remote twin
            if let Some(inst) = installed {
                let from = candidates.iter().position(|c| c.installed);
                let twin = candidates.iter().position(|c| !c.installed && c.same_build(inst));
                if let (Some(from), Some(twin)) = (from, twin) {
                    let moved = candidates.remove(from);
                    candidates.insert(twin.min(from), moved);
                }
            }
        } else {
            // Unrequested packages stay on the installed build when possible
            candidates.sort_by(|a, b| b.installed.cmp(&a.installed).then_with(|| a.preference(b)));
        }

        let candidates = Rc::new(candidates);
        self.ranked
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&candidates));
        candidates
    }

    /// Ranks of the candidates that satisfy `spec`.
    fn range_for(&self, spec: &MatchSpec) -> Range<NumberVersion> {
        self.ranked(&spec.name)
            .iter()
            .enumerate()
            .filter(|(_, c)| spec.matches(&c.record.package) && spec.matches_channel(&c.record.channel))
            .fold(Range::none(), |acc, (rank, _)| {
                acc.union(&Range::exact(NumberVersion(rank as u32)))
            })
    }

    fn versions(&self, pkg: &PkgId) -> std::vec::IntoIter<NumberVersion> {
        match pkg {
            PkgId::Root => vec![NumberVersion(0)].into_iter(),
            PkgId::Name(name) => (0..self.ranked(name).len() as u32)
                .map(NumberVersion)
                .collect::<Vec<_>>()
                .into_iter(),
        }
    }
}

impl DependencyProvider<PkgId, NumberVersion> for CondaProvider<'_> {
    fn choose_package_version<T: Borrow<PkgId>, U: Borrow<Range<NumberVersion>>>(
        &self,
        potential_packages: impl Iterator<Item = (T, U)>,
    ) -> Result<(T, Option<NumberVersion>), Box<dyn Error>> {
        Ok(choose_package_with_fewest_versions(
            |pkg: &PkgId| self.versions(pkg),
            potential_packages,
        ))
    }

    fn get_dependencies(
        &self,
        pkg: &PkgId,
        version: &NumberVersion,
    ) -> Result<Dependencies<PkgId, NumberVersion>, Box<dyn Error>> {
        let mut deps: DependencyConstraints<PkgId, NumberVersion> =
            DependencyConstraints::default();

        let name = match pkg {
            PkgId::Root => {
                for (name, range) in &self.root {
                    deps.insert(PkgId::Name(name.clone()), range.clone());
                }
                return Ok(Dependencies::Known(deps));
            }
            PkgId::Name(name) => name,
        };

        let ranked = self.ranked(name);
        let Some(candidate) = ranked.get(version.0 as usize) else {
            return Ok(Dependencies::Unknown);
        };

        for raw in &candidate.record.package.depends {
            let Ok(spec) = MatchSpec::parse(raw) else {
                tracing::warn!(
                    "Ignoring {}: cannot parse dependency '{raw}'",
                    candidate.record.package.dist_name()
                );
                return Ok(Dependencies::Unknown);
            };
            // Virtual packages (__glibc, __osx, ...) are not modelled
            if spec.name.starts_with("__") || spec.name == *name {
                continue;
            }
            let range = self.range_for(&spec);
            let dep = PkgId::Name(spec.name);
            let merged = match deps.get(&dep) {
                Some(existing) => existing.intersection(&range),
                None => range,
            };
            deps.insert(dep, merged);
        }

        Ok(Dependencies::Known(deps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use conduit_schema::{PackageRecord, PrefixRecord};

    fn record(name: &str, version: &str, depends: &[&str], channel: &str) -> RepoDataRecord {
        RepoDataRecord {
            package: PackageRecord {
                name: name.into(),
                version: version.into(),
                build: "0".into(),
                depends: depends.iter().map(ToString::to_string).collect(),
                ..PackageRecord::default()
            },
            file_name: format!("{name}-{version}-0.tar.bz2"),
            url: format!("{channel}/noarch/{name}-{version}-0.tar.bz2"),
            channel: channel.into(),
        }
    }

    fn installed(name: &str, version: &str) -> PrefixRecord {
        PrefixRecord {
            repodata_record: record(name, version, &[], "https://installed"),
            ..PrefixRecord::default()
        }
    }

    fn solve(pool: &CandidatePool, specs: &[&str]) -> Result<Vec<(String, String)>, Unsatisfiable> {
        solve_with(pool, specs, &Config::new("/r"))
    }

    fn solve_with(
        pool: &CandidatePool,
        specs: &[&str],
        config: &Config,
    ) -> Result<Vec<(String, String)>, Unsatisfiable> {
        let request = SolveRequest::install(specs, config).unwrap();
        PubGrubSolver.solve(pool, request).map(|records| {
            records
                .into_iter()
                .map(|r| (r.package.name, r.package.version))
                .collect()
        })
    }

    fn pair(name: &str, version: &str) -> (String, String) {
        (name.to_string(), version.to_string())
    }

    #[test]
    fn test_pulls_in_dependencies() {
        let mut pool = CandidatePool::new();
        pool.add_repository(
            1,
            vec![
                record("a", "1.0", &["b"], "https://c"),
                record("b", "2.0", &[], "https://c"),
            ],
        );
        assert_eq!(
            solve(&pool, &["a"]).unwrap(),
            vec![pair("a", "1.0"), pair("b", "2.0")]
        );
    }

    #[test]
    fn test_prefers_highest_version() {
        let mut pool = CandidatePool::new();
        pool.add_repository(
            1,
            vec![
                record("a", "1.0", &[], "https://c"),
                record("a", "1.10", &[], "https://c"),
                record("a", "1.9", &[], "https://c"),
            ],
        );
        assert_eq!(solve(&pool, &["a"]).unwrap(), vec![pair("a", "1.10")]);
    }

    #[test]
    fn test_channel_priority_wins_over_version() {
        let mut pool = CandidatePool::new();
        pool.add_repository(2, vec![record("numpy", "1.0", &[], "https://first")]);
        pool.add_repository(1, vec![record("numpy", "2.0", &[], "https://second")]);
        assert_eq!(solve(&pool, &["numpy"]).unwrap(), vec![pair("numpy", "1.0")]);
    }

    #[test]
    fn test_constraints_select_older_dependency() {
        let mut pool = CandidatePool::new();
        pool.add_repository(
            1,
            vec![
                record("app", "1.0", &["lib <2", "__glibc >=2.17"], "https://c"),
                record("lib", "1.5", &[], "https://c"),
                record("lib", "2.0", &[], "https://c"),
            ],
        );
        assert_eq!(
            solve(&pool, &["app"]).unwrap(),
            vec![pair("app", "1.0"), pair("lib", "1.5")]
        );
    }

    #[test]
    fn test_backtracks_to_compatible_release() {
        let mut pool = CandidatePool::new();
        pool.add_repository(
            1,
            vec![
                record("app", "2.0", &["lib >=3"], "https://c"),
                record("app", "1.0", &["lib"], "https://c"),
                record("lib", "2.0", &[], "https://c"),
            ],
        );
        assert_eq!(
            solve(&pool, &["app"]).unwrap(),
            vec![pair("app", "1.0"), pair("lib", "2.0")]
        );
    }

    #[test]
    fn test_unsatisfiable_dependency() {
        let mut pool = CandidatePool::new();
        pool.add_repository(
            1,
            vec![
                record("app", "1.0", &["lib >=3"], "https://c"),
                record("lib", "2.0", &[], "https://c"),
            ],
        );
        let err = solve(&pool, &["app"]).unwrap_err();
        assert!(err.0.contains("lib"), "{err}");
    }

    #[test]
    fn test_nothing_provides() {
        let pool = CandidatePool::new();
        let err = solve(&pool, &["ghost"]).unwrap_err();
        assert_eq!(err.0, "nothing provides requested ghost");
    }

    #[test]
    fn test_unrequested_installed_packages_are_kept() {
        let mut pool = CandidatePool::new();
        pool.add_installed(&[installed("zlib", "1.2")]);
        pool.add_repository(
            1,
            vec![
                record("zlib", "1.3", &[], "https://c"),
                record("numpy", "1.0", &[], "https://c"),
            ],
        );
        assert_eq!(
            solve(&pool, &["numpy"]).unwrap(),
            vec![pair("numpy", "1.0"), pair("zlib", "1.2")]
        );
    }

    #[test]
    fn test_requested_spec_can_move_installed_package() {
        let mut pool = CandidatePool::new();
        pool.add_installed(&[installed("zlib", "1.2")]);
        pool.add_repository(
            1,
            vec![
                record("app", "1.0", &["zlib >=1.3"], "https://c"),
                record("zlib", "1.3", &[], "https://c"),
            ],
        );
        assert_eq!(
            solve(&pool, &["app"]).unwrap(),
            vec![pair("app", "1.0"), pair("zlib", "1.3")]
        );
    }

    #[test]
    fn test_rerequest_keeps_installed_build() {
        let mut pool = CandidatePool::new();
        pool.add_installed(&[PrefixRecord {
            repodata_record: record("numpy", "1.0", &[], "https://first"),
            ..PrefixRecord::default()
        }]);
        pool.add_repository(
            3,
            vec![
                record("numpy", "1.0", &[], "https://first"),
                record("numpy", "0.9", &[], "https://first"),
            ],
        );
        pool.add_repository(1, vec![record("numpy", "0.5", &[], "https://second")]);

        let request = SolveRequest::install(&["numpy"], &Config::new("/r")).unwrap();
        let selected = PubGrubSolver.solve(&pool, request).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].package.version, "1.0");
        assert_eq!(selected[0].channel, "https://first");
    }

    #[test]
    fn test_allow_downgrade_flag() {
        let mut pool = CandidatePool::new();
        pool.add_installed(&[installed("numpy", "2.0")]);
        pool.add_repository(1, vec![record("numpy", "1.5", &[], "https://c")]);

        assert_eq!(
            solve(&pool, &["numpy<2"]).unwrap(),
            vec![pair("numpy", "1.5")]
        );

        let mut config = Config::new("/r");
        config.allow_downgrade = false;
        assert!(solve_with(&pool, &["numpy<2"], &config).is_err());
    }
}
