//! Candidate pool: installed records plus every usable repository.

use std::collections::{HashMap, HashSet};

use conduit_schema::{MatchSpec, PrefixRecord, RepoData, RepoDataRecord, Version};
use tracing::{debug, warn};

use crate::repo::RepoArena;

/// Priority of the installed-packages repository, below every remote one.
pub const INSTALLED_PRIORITY: u32 = 0;

/// One solvable record.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The record as published (or as installed).
    pub record: RepoDataRecord,
    /// Parsed version.
    pub version: Version,
    /// Repository priority, higher wins.
    pub priority: u32,
    /// Comes from the installed ledger.
    pub installed: bool,
}

impl Candidate {
    /// Package name.
    pub fn name(&self) -> &str {
        &self.record.package.name
    }

    /// Same `(name, version, build)`, whichever repository it came from.
    pub fn same_build(&self, other: &Self) -> bool {
        let (a, b) = (&self.record.package, &other.record.package);
        a.name == b.name && a.version == b.version && a.build == b.build
    }

    /// Preference order for a requested spec: priority, then version, then
    /// build number, all descending.
    pub fn preference(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.version.cmp(&self.version))
            .then_with(|| {
                other
                    .record
                    .package
                    .build_number
                    .cmp(&self.record.package.build_number)
            })
    }
}

/// Every candidate the solver may pick from.
#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    candidates: Vec<Candidate>,
    by_name: HashMap<String, Vec<usize>>,
    seen: HashSet<(String, String, String, String)>,
}

impl CandidatePool {
    /// Empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installed ledger first, then each usable repository in arena order.
    pub fn build(installed: &[PrefixRecord], arena: &RepoArena) -> Self {
        let mut pool = Self::new();
        pool.add_installed(installed);

        for handle in arena.usable() {
            let Some(content) = &handle.content else {
                continue;
            };
            match RepoData::from_slice(content) {
                Ok(repodata) => {
                    let records = repodata.into_records(&handle.channel_url, &handle.subdir_url);
                    let added = pool.add_repository(handle.priority, records);
                    debug!(
                        "Loaded {added} records from {} (priority {})",
                        handle.url, handle.priority
                    );
                }
                Err(e) => warn!("Skipping unparseable repodata {}: {e}", handle.url),
            }
        }

        pool
    }

    /// Add the installed ledger at [`INSTALLED_PRIORITY`].
    ///
    /// Installed records never take part in repository dedup, so the remote
    /// twin of an installed build stays available at its own priority.
    pub fn add_installed(&mut self, records: &[PrefixRecord]) -> usize {
        records
            .iter()
            .filter(|r| self.insert(r.repodata_record.clone(), INSTALLED_PRIORITY, true))
            .count()
    }

    /// Add one repository's records at `priority`; returns how many were new.
    pub fn add_repository(&mut self, priority: u32, records: Vec<RepoDataRecord>) -> usize {
        let mut added = 0;
        for record in records {
            if self.insert(record, priority, false) {
                added += 1;
            }
        }
        added
    }

    fn insert(&mut self, record: RepoDataRecord, priority: u32, installed: bool) -> bool {
        let key = (
            record.package.name.clone(),
            record.package.version.clone(),
            record.package.build.clone(),
            record.channel.clone(),
        );
        if !installed && self.seen.contains(&key) {
            return false;
        }
        let version = match record.package.parsed_version() {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "Skipping {} from {}: {e}",
                    record.package.dist_name(),
                    record.channel
                );
                return false;
            }
        };
        if !installed {
            self.seen.insert(key);
        }
        let idx = self.candidates.len();
        self.by_name
            .entry(record.package.name.clone())
            .or_default()
            .push(idx);
        self.candidates.push(Candidate {
            record,
            version,
            priority,
            installed,
        });
        true
    }

    /// All candidates named `name`, in insertion order.
    pub fn by_name(&self, name: &str) -> Vec<&Candidate> {
        self.by_name
            .get(name)
            .map(|ids| ids.iter().map(|&i| &self.candidates[i]).collect())
            .unwrap_or_default()
    }

    /// Candidates satisfying `spec`, most preferred first.
    pub fn matching(&self, spec: &MatchSpec) -> Vec<&Candidate> {
        let mut found: Vec<&Candidate> = self
            .by_name(&spec.name)
            .into_iter()
            .filter(|c| spec.matches(&c.record.package) && spec.matches_channel(&c.record.channel))
            .collect();
        found.sort_by(|a, b| a.preference(b));
        found
    }

    /// The installed candidate for `name`, if any.
    pub fn installed(&self, name: &str) -> Option<&Candidate> {
        self.by_name(name).into_iter().find(|c| c.installed)
    }

    /// Every installed candidate.
    pub fn installed_candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(|c| c.installed)
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Returns `true` if the pool has no candidates.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_schema::PackageRecord;

    fn record(name: &str, version: &str, build_number: u64, channel: &str) -> RepoDataRecord {
        RepoDataRecord {
            package: PackageRecord {
                name: name.into(),
                version: version.into(),
                build: format!("b{build_number}"),
                build_number,
                ..PackageRecord::default()
            },
            file_name: format!("{name}-{version}-b{build_number}.tar.bz2"),
            url: format!("{channel}/linux-64/{name}-{version}-b{build_number}.tar.bz2"),
            channel: channel.into(),
        }
    }

    #[test]
    fn test_priority_beats_version() {
        let mut pool = CandidatePool::new();
        pool.add_repository(4, vec![record("numpy", "1.0", 0, "https://a")]);
        pool.add_repository(2, vec![record("numpy", "2.0", 0, "https://b")]);

        let spec = MatchSpec::parse("numpy").unwrap();
        let found = pool.matching(&spec);
        assert_eq!(found[0].record.channel, "https://a");
        assert_eq!(found[1].record.channel, "https://b");
    }

    #[test]
    fn test_version_then_build_number_within_repository() {
        let mut pool = CandidatePool::new();
        pool.add_repository(
            1,
            vec![
                record("zlib", "1.2", 3, "https://a"),
                record("zlib", "1.3", 0, "https://a"),
                record("zlib", "1.3", 2, "https://a"),
            ],
        );
        let found = pool.matching(&MatchSpec::parse("zlib").unwrap());
        let order: Vec<(String, u64)> = found
            .iter()
            .map(|c| (c.record.package.version.clone(), c.record.package.build_number))
            .collect();
        assert_eq!(
            order,
            vec![("1.3".into(), 2), ("1.3".into(), 0), ("1.2".into(), 3)]
        );
    }

    #[test]
    fn test_duplicates_dropped_first_wins() {
        let mut pool = CandidatePool::new();
        assert_eq!(pool.add_repository(3, vec![record("xz", "5.4", 0, "https://a")]), 1);
        assert_eq!(pool.add_repository(2, vec![record("xz", "5.4", 0, "https://a")]), 0);
        assert_eq!(pool.add_repository(1, vec![record("xz", "5.4", 0, "https://b")]), 1);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.by_name("xz")[0].priority, 3);
    }

    #[test]
    fn test_installed_has_lowest_priority() {
        let mut pool = CandidatePool::new();
        let installed = PrefixRecord {
            repodata_record: record("numpy", "1.0", 0, "https://a"),
            ..PrefixRecord::default()
        };
        pool.add_installed(&[installed]);
        pool.add_repository(1, vec![record("numpy", "1.0", 0, "https://b")]);

        let candidate = pool.installed("numpy").unwrap();
        assert_eq!(candidate.priority, INSTALLED_PRIORITY);
        let found = pool.matching(&MatchSpec::parse("numpy").unwrap());
        assert!(!found[0].installed);
    }

    #[test]
    fn test_installed_build_keeps_remote_twin() {
        let mut pool = CandidatePool::new();
        let installed = PrefixRecord {
            repodata_record: record("numpy", "1.0", 0, "https://a"),
            ..PrefixRecord::default()
        };
        pool.add_installed(&[installed]);
        let added = pool.add_repository(
            2,
            vec![
                record("numpy", "1.0", 0, "https://a"),
                record("numpy", "0.9", 0, "https://a"),
            ],
        );

        assert_eq!(added, 2);
        let found = pool.matching(&MatchSpec::parse("numpy").unwrap());
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].record.package.version, "1.0");
        assert_eq!(found[0].priority, 2);
        assert!(found[0].same_build(pool.installed("numpy").unwrap()));
        assert!(found[2].installed);
    }

    #[test]
    fn test_unparseable_versions_skipped() {
        let mut pool = CandidatePool::new();
        let added = pool.add_repository(1, vec![record("bad", "1.0 beta", 0, "https://a")]);
        assert_eq!(added, 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_channel_restricted_spec() {
        let mut pool = CandidatePool::new();
        pool.add_repository(2, vec![record("xz", "5.4", 0, "https://conda.example/main")]);
        pool.add_repository(1, vec![record("xz", "5.2", 0, "https://conda.example/forge")]);
        let found = pool.matching(&MatchSpec::parse("forge::xz").unwrap());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record.package.version, "5.2");
    }
}
