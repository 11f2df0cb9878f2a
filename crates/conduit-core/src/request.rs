//! Solve requests built from user spec strings.

use conduit_schema::MatchSpec;

use crate::config::Config;
use crate::error::Error;

/// What a job asks of the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Make a matching package present.
    Install,
    /// Make the named package absent.
    Remove,
    /// Move the named package to its most preferred candidate.
    Update,
}

/// One solver job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Parsed spec.
    pub spec: MatchSpec,
    /// The string the user typed, recorded in the ledger.
    pub raw: String,
    /// Requested action.
    pub intent: Intent,
}

/// Global solver switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverFlags {
    /// Allow candidates older than the installed version.
    pub allow_downgrade: bool,
}

impl Default for SolverFlags {
    fn default() -> Self {
        Self {
            allow_downgrade: true,
        }
    }
}

/// Jobs plus flags, consumed once by the solver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveRequest {
    /// Jobs in the order the user gave them.
    pub jobs: Vec<Job>,
    /// Global switches.
    pub flags: SolverFlags,
}

impl SolveRequest {
    /// One [`Intent::Install`] job per spec string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] for the first spec that does not parse.
    pub fn install<S: AsRef<str>>(specs: &[S], config: &Config) -> Result<Self, Error> {
        let jobs = specs
            .iter()
            .map(|raw| {
                let raw = raw.as_ref();
                MatchSpec::parse(raw)
                    .map(|spec| Job {
                        spec,
                        raw: raw.trim().to_string(),
                        intent: Intent::Install,
                    })
                    .map_err(|source| Error::InvalidSpec {
                        spec: raw.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            jobs,
            flags: SolverFlags {
                allow_downgrade: config.allow_downgrade,
            },
        })
    }

    /// Names the user asked for.
    pub fn requested_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.iter().map(|j| j.spec.name.as_str())
    }

    /// Raw spec string that requested `name`, if any.
    pub fn raw_spec_for(&self, name: &str) -> Option<&str> {
        self.jobs
            .iter()
            .find(|j| j.spec.name == name)
            .map(|j| j.raw.as_str())
    }
}
