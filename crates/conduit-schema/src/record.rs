//! Repodata documents, package records and installed-package ledger entries.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::version::{Version, VersionError};

/// Package metadata as published in a channel's `repodata.json`.
///
/// Unknown keys are ignored so newer repodata revisions still parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Package name (e.g., "numpy")
    pub name: String,

    /// Version string (e.g., "1.26.4")
    pub version: String,

    /// Build string (e.g., "py311h64a7726_0")
    pub build: String,

    /// Build number, higher builds of the same version are preferred.
    #[serde(default)]
    pub build_number: u64,

    /// Dependency match specs.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Platform subdirectory the package was published under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,

    /// MD5 checksum of the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,

    /// SHA-256 checksum of the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// Archive size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Build timestamp (milliseconds since the epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,

    /// SPDX license expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

impl PackageRecord {
    /// `name-version-build`, the canonical distribution name.
    pub fn dist_name(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.build)
    }

    /// Parse the version string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] when the published version is malformed.
    pub fn parsed_version(&self) -> Result<Version, VersionError> {
        Version::parse(&self.version)
    }

    /// Returns `true` when both records denote the same build of the same package.
    pub fn same_identity(&self, other: &PackageRecord) -> bool {
        self.name == other.name && self.version == other.version && self.build == other.build
    }
}

/// A [`PackageRecord`] together with where it can be downloaded from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoDataRecord {
    /// The package metadata.
    #[serde(flatten)]
    pub package: PackageRecord,

    /// Archive file name (e.g., "numpy-1.26.4-py311h64a7726_0.tar.bz2").
    #[serde(rename = "fn")]
    pub file_name: String,

    /// Fully qualified download URL.
    pub url: String,

    /// Base URL of the originating channel.
    pub channel: String,
}

/// The `info` block of a repodata document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Subdirectory the document describes.
    #[serde(default)]
    pub subdir: Option<String>,
}

/// A parsed `repodata.json` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoData {
    /// Optional document metadata.
    #[serde(default)]
    pub info: Option<ChannelInfo>,

    /// Package records keyed by archive file name.
    #[serde(default)]
    pub packages: BTreeMap<String, PackageRecord>,
}

impl RepoData {
    /// Parse a repodata document from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] on malformed JSON.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Turn every entry into a [`RepoDataRecord`] rooted at `subdir_url`.
    pub fn into_records(self, channel: &str, subdir_url: &str) -> Vec<RepoDataRecord> {
        let subdir_url = subdir_url.trim_end_matches('/');
        let fallback_subdir = self.info.and_then(|info| info.subdir);
        self.packages
            .into_iter()
            .map(|(file_name, mut package)| {
                if package.subdir.is_none() {
                    package.subdir.clone_from(&fallback_subdir);
                }
                RepoDataRecord {
                    url: format!("{subdir_url}/{file_name}"),
                    package,
                    file_name,
                    channel: channel.to_string(),
                }
            })
            .collect()
    }
}

/// An installed package, as stored in `<prefix>/conda-meta/<dist>.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixRecord {
    /// The record the package was installed from.
    #[serde(flatten)]
    pub repodata_record: RepoDataRecord,

    /// Files linked into the prefix, relative to the prefix root.
    #[serde(default)]
    pub files: Vec<String>,

    /// The user spec that caused the install, if it was requested directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_spec: Option<String>,

    /// Extracted package directory the files were linked from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_package_dir: Option<PathBuf>,
}

impl PrefixRecord {
    /// Shorthand for the inner package metadata.
    pub fn package(&self) -> &PackageRecord {
        &self.repodata_record.package
    }

    /// Ledger file name: `<name>-<version>-<build>.json`.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.package().dist_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPODATA: &str = r#"{
        "info": {"subdir": "linux-64"},
        "packages": {
            "numpy-1.0-py_0.tar.bz2": {
                "name": "numpy",
                "version": "1.0",
                "build": "py_0",
                "build_number": 0,
                "depends": ["python >=3.8"],
                "license": "BSD-3-Clause",
                "track_features": ""
            }
        },
        "packages.conda": {}
    }"#;

    #[test]
    fn test_parse_repodata() {
        let repodata = RepoData::from_slice(REPODATA.as_bytes()).unwrap();
        assert_eq!(repodata.packages.len(), 1);
        let record = &repodata.packages["numpy-1.0-py_0.tar.bz2"];
        assert_eq!(record.depends, vec!["python >=3.8".to_string()]);
        assert_eq!(record.dist_name(), "numpy-1.0-py_0");
    }

    #[test]
    fn test_into_records_builds_urls() {
        let repodata = RepoData::from_slice(REPODATA.as_bytes()).unwrap();
        let records = repodata.into_records(
            "https://conda.anaconda.org/conda-forge",
            "https://conda.anaconda.org/conda-forge/linux-64/",
        );
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].url,
            "https://conda.anaconda.org/conda-forge/linux-64/numpy-1.0-py_0.tar.bz2"
        );
        assert_eq!(records[0].package.subdir.as_deref(), Some("linux-64"));
    }

    #[test]
    fn test_prefix_record_json_is_flat() {
        let record = PrefixRecord {
            repodata_record: RepoDataRecord {
                package: PackageRecord {
                    name: "zlib".into(),
                    version: "1.3".into(),
                    build: "h0".into(),
                    ..PackageRecord::default()
                },
                file_name: "zlib-1.3-h0.tar.bz2".into(),
                url: "file:///tmp/zlib-1.3-h0.tar.bz2".into(),
                channel: "file:///tmp".into(),
            },
            files: vec!["lib/libz.so".into()],
            requested_spec: Some("zlib".into()),
            extracted_package_dir: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["name"], "zlib");
        assert_eq!(value["fn"], "zlib-1.3-h0.tar.bz2");
        assert_eq!(record.file_name(), "zlib-1.3-h0.json");

        let back: PrefixRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
