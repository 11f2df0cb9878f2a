//! Match specifications: `[channel::]name [version [build]]`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::record::PackageRecord;
use crate::version::{Version, VersionError, VersionSpec};

/// Errors that can occur when parsing a [`MatchSpec`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    /// The spec string is blank.
    #[error("empty package spec")]
    Empty,

    /// The package name contains characters outside `[a-z0-9._-]`.
    #[error("invalid package name '{0}'")]
    InvalidName(String),

    /// The version part could not be parsed.
    #[error("invalid version in '{spec}': {source}")]
    InvalidVersion {
        /// The full spec string.
        spec: String,
        /// Underlying version error.
        source: VersionError,
    },

    /// The build part is not a valid glob.
    #[error("invalid build string '{0}'")]
    InvalidBuild(String),

    /// More than three whitespace separated parts.
    #[error("too many parts in spec '{0}'")]
    TooManyParts(String),

    /// Syntax this parser deliberately does not understand (e.g. `[key=value]`).
    #[error("unsupported spec syntax '{0}'")]
    Unsupported(String),
}

/// A parsed package constraint.
///
/// # Example
///
/// ```
/// use conduit_schema::MatchSpec;
///
/// let spec: MatchSpec = "conda-forge::numpy>=1.20,<2".parse().unwrap();
/// assert_eq!(spec.name, "numpy");
/// assert_eq!(spec.channel.as_deref(), Some("conda-forge"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSpec {
    /// Normalized (lowercase) package name.
    pub name: String,
    /// Version constraint, [`VersionSpec::Any`] when omitted.
    pub version: VersionSpec,
    /// Optional build string glob.
    pub build: Option<glob::Pattern>,
    /// Optional channel restriction (`channel::name`).
    pub channel: Option<String>,
}

impl MatchSpec {
    /// Parse a spec string.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] if the name, version or build is malformed.
    pub fn parse(s: &str) -> Result<Self, SpecError> {
        let spec = s.trim();
        if spec.is_empty() {
            return Err(SpecError::Empty);
        }
        if spec.contains(['[', ']']) {
            return Err(SpecError::Unsupported(spec.to_string()));
        }

        let (channel, rest) = match spec.split_once("::") {
            Some((channel, rest)) if !channel.is_empty() => {
                (Some(channel.trim().to_string()), rest.trim())
            }
            Some((_, rest)) => (None, rest.trim()),
            None => (None, spec),
        };

        let version_err = |source| SpecError::InvalidVersion {
            spec: spec.to_string(),
            source,
        };

        let parts: Vec<&str> = rest.split_whitespace().collect();
        let (name, version, build) = match parts.as_slice() {
            [] => return Err(SpecError::Empty),
            [single] => Self::split_compact(single, spec)?,
            [name, version] => (
                *name,
                VersionSpec::parse(version).map_err(version_err)?,
                None,
            ),
            [name, version, build] => (
                *name,
                VersionSpec::parse(version).map_err(version_err)?,
                Some(*build),
            ),
            _ => return Err(SpecError::TooManyParts(spec.to_string())),
        };

        let name = name.to_lowercase();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(SpecError::InvalidName(name));
        }

        let build = match build {
            None | Some("*") => None,
            Some(raw) => Some(
                glob::Pattern::new(raw).map_err(|_| SpecError::InvalidBuild(raw.to_string()))?,
            ),
        };

        Ok(Self {
            name,
            version,
            build,
            channel,
        })
    }

    /// Split `name<op>version` and `name=version=build` forms.
    fn split_compact<'a>(
        token: &'a str,
        spec: &str,
    ) -> Result<(&'a str, VersionSpec, Option<&'a str>), SpecError> {
        let version_err = |source| SpecError::InvalidVersion {
            spec: spec.to_string(),
            source,
        };

        let Some(idx) = token.find(['=', '<', '>', '!', '~']) else {
            return Ok((token, VersionSpec::Any, None));
        };
        let (name, constraint) = token.split_at(idx);

        if constraint.starts_with("==") {
            return Ok((name, VersionSpec::parse(constraint).map_err(version_err)?, None));
        }
        if let Some(fuzzy) = constraint.strip_prefix('=') {
            let (version, build) = match fuzzy.split_once('=') {
                Some((version, build)) => (version, Some(build)),
                None => (fuzzy, None),
            };
            return Ok((
                name,
                VersionSpec::parse_fuzzy(version).map_err(version_err)?,
                build,
            ));
        }
        Ok((name, VersionSpec::parse(constraint).map_err(version_err)?, None))
    }

    /// Returns `true` if the record satisfies name, version and build.
    ///
    /// Records whose version cannot be parsed never match. The channel
    /// restriction is checked separately by [`MatchSpec::matches_channel`].
    pub fn matches(&self, record: &PackageRecord) -> bool {
        if record.name != self.name {
            return false;
        }
        if self
            .build
            .as_ref()
            .is_some_and(|build| !build.matches(&record.build))
        {
            return false;
        }
        match Version::parse(&record.version) {
            Ok(version) => self.version.matches(&version),
            Err(_) => false,
        }
    }

    /// Returns `true` if a record from `channel` (a name or base URL) is allowed.
    pub fn matches_channel(&self, channel: &str) -> bool {
        match &self.channel {
            None => true,
            Some(wanted) => {
                let wanted = wanted.trim_end_matches('/');
                let channel = channel.trim_end_matches('/');
                channel == wanted || channel.ends_with(&format!("/{wanted}"))
            }
        }
    }
}

impl FromStr for MatchSpec {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(channel) = &self.channel {
            write!(f, "{channel}::")?;
        }
        write!(f, "{}", self.name)?;
        if self.version != VersionSpec::Any || self.build.is_some() {
            write!(f, " {}", self.version)?;
        }
        if let Some(build) = &self.build {
            write!(f, " {}", build.as_str())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, version: &str, build: &str) -> PackageRecord {
        PackageRecord {
            name: name.to_string(),
            version: version.to_string(),
            build: build.to_string(),
            ..PackageRecord::default()
        }
    }

    #[test]
    fn test_name_only() {
        let spec = MatchSpec::parse("NumPy").unwrap();
        assert_eq!(spec.name, "numpy");
        assert_eq!(spec.version, VersionSpec::Any);
        assert!(spec.matches(&record("numpy", "1.0", "py_0")));
    }

    #[test]
    fn test_space_separated_with_build() {
        let spec = MatchSpec::parse("numpy 1.8* py27_*").unwrap();
        assert!(spec.matches(&record("numpy", "1.8.2", "py27_0")));
        assert!(!spec.matches(&record("numpy", "1.8.2", "py36_0")));
        assert!(!spec.matches(&record("numpy", "1.9", "py27_0")));
    }

    #[test]
    fn test_equals_forms() {
        let fuzzy = MatchSpec::parse("python=3.11").unwrap();
        assert!(fuzzy.matches(&record("python", "3.11.4", "h0")));
        assert!(!fuzzy.matches(&record("python", "3.12.0", "h0")));

        let exact = MatchSpec::parse("python==3.11").unwrap();
        assert!(exact.matches(&record("python", "3.11.0", "h0")));
        assert!(!exact.matches(&record("python", "3.11.4", "h0")));

        let pinned = MatchSpec::parse("python=3.11.4=h955ad1f_0").unwrap();
        assert!(pinned.matches(&record("python", "3.11.4", "h955ad1f_0")));
        assert!(!pinned.matches(&record("python", "3.11.4", "h1")));
    }

    #[test]
    fn test_operator_forms() {
        let spec = MatchSpec::parse("zlib>=1.2.11,<1.3").unwrap();
        assert!(spec.matches(&record("zlib", "1.2.13", "h0")));
        assert!(!spec.matches(&record("zlib", "1.3.0", "h0")));
    }

    #[test]
    fn test_channel_prefix() {
        let spec = MatchSpec::parse("conda-forge::xz").unwrap();
        assert_eq!(spec.channel.as_deref(), Some("conda-forge"));
        assert!(spec.matches_channel("conda-forge"));
        assert!(spec.matches_channel("https://conda.anaconda.org/conda-forge"));
        assert!(!spec.matches_channel("https://repo.anaconda.com/pkgs/main"));
    }

    #[test]
    fn test_errors() {
        assert_eq!(MatchSpec::parse("  "), Err(SpecError::Empty));
        assert!(matches!(
            MatchSpec::parse("num$py"),
            Err(SpecError::InvalidName(_))
        ));
        assert!(matches!(
            MatchSpec::parse("numpy >=1.0 py_0 extra"),
            Err(SpecError::TooManyParts(_))
        ));
        assert!(matches!(
            MatchSpec::parse("numpy[version='>=1']"),
            Err(SpecError::Unsupported(_))
        ));
        assert!(matches!(
            MatchSpec::parse("numpy>="),
            Err(SpecError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn test_unparseable_record_version_never_matches() {
        let spec = MatchSpec::parse("numpy").unwrap();
        assert!(!spec.matches(&record("numpy", "1.0 beta", "0")));
    }

    #[test]
    fn test_display() {
        let spec = MatchSpec::parse("defaults::numpy >=1.0 py*").unwrap();
        assert_eq!(spec.to_string(), "defaults::numpy >=1.0 py*");
    }
}
