//! Conda version ordering and version constraints.
//!
//! A version string is split into an optional epoch (`1!`), dot/underscore/dash
//! separated segments and an optional local part (`+local`). Each segment is
//! further split into numeric and alphabetic runs, so `1.2rc1` becomes
//! `[1] [2, "rc", 1]`. Missing trailing segments compare as `0`, which makes
//! `1.0` and `1.0.0` equal.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing versions or version constraints.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The version string is empty.
    #[error("empty version string")]
    Empty,

    /// The version string contains a character that is never valid.
    #[error("invalid character '{ch}' in version '{version}'")]
    InvalidCharacter {
        /// The offending version string.
        version: String,
        /// The first invalid character.
        ch: char,
    },

    /// The epoch prefix is not a number.
    #[error("invalid epoch in version '{0}'")]
    InvalidEpoch(String),

    /// A constraint operator is not followed by a version.
    #[error("missing version after operator in '{0}'")]
    MissingVersion(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Component {
    Dev,
    Str(String),
    Num(u64),
    Post,
}

impl Component {
    fn parse(run: &str) -> Self {
        if let Ok(n) = run.parse::<u64>() {
            return Self::Num(n);
        }
        match run {
            "dev" => Self::Dev,
            "post" => Self::Post,
            other => Self::Str(other.to_string()),
        }
    }
}

type Segment = Vec<Component>;

/// A parsed package version with conda ordering semantics.
///
/// # Example
///
/// ```
/// use conduit_schema::Version;
///
/// let a: Version = "1.2.0".parse().unwrap();
/// let b: Version = "1.10".parse().unwrap();
/// assert!(a < b);
/// assert_eq!("1.0".parse::<Version>().unwrap(), "1.0.0".parse::<Version>().unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct Version {
    source: String,
    epoch: u64,
    segments: Vec<Segment>,
    local: Vec<Segment>,
}

impl Version {
    /// Parse a version string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] if the string is empty, has a malformed epoch
    /// or contains characters outside `[A-Za-z0-9._+!-]`.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let source = s.trim();
        if source.is_empty() {
            return Err(VersionError::Empty);
        }
        if let Some(ch) = source
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+' | '!')))
        {
            return Err(VersionError::InvalidCharacter {
                version: source.to_string(),
                ch,
            });
        }

        let lowered = source.to_lowercase();
        let (epoch, rest) = match lowered.split_once('!') {
            Some((epoch, rest)) => (
                epoch
                    .parse::<u64>()
                    .map_err(|_| VersionError::InvalidEpoch(source.to_string()))?,
                rest,
            ),
            None => (0, lowered.as_str()),
        };

        let (main, local) = match rest.split_once('+') {
            Some((main, local)) => (main, Some(local)),
            None => (rest, None),
        };
        if main.is_empty() {
            return Err(VersionError::Empty);
        }

        Ok(Self {
            source: source.to_string(),
            epoch,
            segments: split_segments(main),
            local: local.map(split_segments).unwrap_or_default(),
        })
    }

    /// The original string this version was parsed from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Number of dot separated segments (ignoring epoch and local part).
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` if `self` begins with every segment of `prefix`.
    ///
    /// This is the semantics of `1.2.*` style constraints: `1.2`, `1.2.0`
    /// and `1.2rc1` all start with `1.2`, `1.20` does not.
    pub fn starts_with(&self, prefix: &Version) -> bool {
        if self.epoch != prefix.epoch {
            return false;
        }
        let Some((last, init)) = prefix.segments.split_last() else {
            return true;
        };
        for (i, segment) in init.iter().enumerate() {
            let ours = self.segments.get(i).map_or(&[][..], Vec::as_slice);
            if cmp_segment(ours, segment) != Ordering::Equal {
                return false;
            }
        }
        let ours = self.segments.get(init.len()).map_or(&[][..], Vec::as_slice);
        if ours.is_empty() {
            return cmp_segment(ours, last) == Ordering::Equal;
        }
        ours.len() >= last.len() && ours[..last.len()] == last[..]
    }

    /// Drop the final segment, used for `~=` constraints.
    fn parent(&self) -> Option<Version> {
        if self.segments.len() < 2 {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        parent.local.clear();
        parent.source = self
            .source
            .rsplit_once(['.', '_', '-'])
            .map_or_else(|| self.source.clone(), |(head, _)| head.to_string());
        Some(parent)
    }
}

fn split_segments(s: &str) -> Vec<Segment> {
    s.split(['.', '_', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut runs: Segment = Vec::new();
            let mut current = String::new();
            let mut numeric = None;
            for ch in part.chars() {
                let is_digit = ch.is_ascii_digit();
                if numeric.is_some_and(|n| n != is_digit) {
                    runs.push(Component::parse(&current));
                    current.clear();
                }
                numeric = Some(is_digit);
                current.push(ch);
            }
            if !current.is_empty() {
                runs.push(Component::parse(&current));
            }
            // A segment that starts with letters gets an implicit leading zero
            if !matches!(runs.first(), Some(Component::Num(_))) {
                runs.insert(0, Component::Num(0));
            }
            runs
        })
        .collect()
}

fn cmp_segment(a: &[Component], b: &[Component]) -> Ordering {
    let zero = Component::Num(0);
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).unwrap_or(&zero);
        let right = b.get(i).unwrap_or(&zero);
        match left.cmp(right) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

fn cmp_segments(a: &[Segment], b: &[Segment]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).map_or(&[][..], Vec::as_slice);
        let right = b.get(i).map_or(&[][..], Vec::as_slice);
        match cmp_segment(left, right) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| cmp_segments(&self.segments, &other.segments))
            .then_with(|| cmp_segments(&self.local, &other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A constraint over versions, as written in match specs and `depends` lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// Matches every version (`*` or no constraint).
    Any,
    /// `==1.2` or a bare `1.2`.
    Exact(Version),
    /// `!=1.2`
    NotEqual(Version),
    /// `>1.2`
    Greater(Version),
    /// `>=1.2`
    GreaterEq(Version),
    /// `<1.2`
    Less(Version),
    /// `<=1.2`
    LessEq(Version),
    /// `1.2.*`, `1.2*` or `=1.2`
    StartsWith(Version),
    /// `!=1.2.*`
    NotStartsWith(Version),
    /// `~=1.2.3`, i.e. `>=1.2.3,1.2.*`
    Compatible(Version),
    /// Comma separated constraints that must all hold.
    And(Vec<VersionSpec>),
    /// Pipe separated alternatives.
    Or(Vec<VersionSpec>),
}

impl VersionSpec {
    /// Parse a constraint expression such as `>=1.8,<2|1.7.*`.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] if any version inside the expression is invalid.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::Any);
        }

        let alternatives: Vec<&str> = s.split('|').collect();
        if alternatives.len() > 1 {
            return alternatives
                .into_iter()
                .map(Self::parse_all_of)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Or);
        }
        Self::parse_all_of(s)
    }

    /// Parse a fuzzy `=1.2` style version, as used by `name=1.2=build` specs.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] if the version is invalid.
    pub fn parse_fuzzy(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::Any);
        }
        if s.contains(['<', '>', '!', '~', '=', ',', '|']) {
            return Self::parse(s);
        }
        Ok(Self::StartsWith(Version::parse(strip_wildcard(s))?))
    }

    fn parse_all_of(s: &str) -> Result<Self, VersionError> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() > 1 {
            return parts
                .into_iter()
                .map(Self::parse_atom)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::And);
        }
        Self::parse_atom(s)
    }

    fn parse_atom(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::Any);
        }

        const OPERATORS: [&str; 8] = ["==", "!=", ">=", "<=", "~=", ">", "<", "="];
        let Some(op) = OPERATORS.iter().find(|op| s.starts_with(**op)) else {
            return if s.ends_with('*') {
                Ok(Self::StartsWith(Version::parse(strip_wildcard(s))?))
            } else {
                Ok(Self::Exact(Version::parse(s)?))
            };
        };

        let raw = s[op.len()..].trim();
        if raw.is_empty() {
            return Err(VersionError::MissingVersion(s.to_string()));
        }
        let wildcard = raw.ends_with('*');
        let version = Version::parse(strip_wildcard(raw))?;

        Ok(match *op {
            "==" if wildcard => Self::StartsWith(version),
            "==" => Self::Exact(version),
            "!=" if wildcard => Self::NotStartsWith(version),
            "!=" => Self::NotEqual(version),
            ">=" => Self::GreaterEq(version),
            "<=" => Self::LessEq(version),
            "~=" => Self::Compatible(version),
            ">" => Self::Greater(version),
            "<" => Self::Less(version),
            _ => Self::StartsWith(version),
        })
    }

    /// Returns `true` if `version` satisfies this constraint.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(v) => version == v,
            Self::NotEqual(v) => version != v,
            Self::Greater(v) => version > v,
            Self::GreaterEq(v) => version >= v,
            Self::Less(v) => version < v,
            Self::LessEq(v) => version <= v,
            Self::StartsWith(v) => version.starts_with(v),
            Self::NotStartsWith(v) => !version.starts_with(v),
            Self::Compatible(v) => {
                version >= v && v.parent().is_none_or(|parent| version.starts_with(&parent))
            }
            Self::And(all) => all.iter().all(|spec| spec.matches(version)),
            Self::Or(any) => any.iter().any(|spec| spec.matches(version)),
        }
    }
}

fn strip_wildcard(s: &str) -> &str {
    let s = s.strip_suffix('*').unwrap_or(s);
    s.strip_suffix('.').unwrap_or(s)
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exact(v) => write!(f, "=={v}"),
            Self::NotEqual(v) => write!(f, "!={v}"),
            Self::Greater(v) => write!(f, ">{v}"),
            Self::GreaterEq(v) => write!(f, ">={v}"),
            Self::Less(v) => write!(f, "<{v}"),
            Self::LessEq(v) => write!(f, "<={v}"),
            Self::StartsWith(v) => write!(f, "{v}.*"),
            Self::NotStartsWith(v) => write!(f, "!={v}.*"),
            Self::Compatible(v) => write!(f, "~={v}"),
            Self::And(all) => {
                let parts: Vec<String> = all.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(","))
            }
            Self::Or(any) => {
                let parts: Vec<String> = any.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join("|"))
            }
        }
    }
}
