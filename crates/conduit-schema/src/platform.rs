//! Channel platform subdirectories.

/// Platform subdirectory of a channel.
///
/// Every channel publishes one repodata document per platform plus a
/// platform-independent `noarch` document. The platform selects which
/// subdirectory is fetched as the primary one.
///
/// # Example
///
/// ```
/// use conduit_schema::Platform;
///
/// let current = Platform::current();
/// println!("Running on: {}", current);
/// assert_eq!("noarch".parse::<Platform>().unwrap(), Platform::NoArch);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum Platform {
    /// `linux-64`
    #[serde(rename = "linux-64")]
    Linux64,
    /// `linux-aarch64`
    #[serde(rename = "linux-aarch64")]
    LinuxAarch64,
    /// `linux-ppc64le`
    #[serde(rename = "linux-ppc64le")]
    LinuxPpc64le,
    /// `osx-64`
    #[serde(rename = "osx-64")]
    Osx64,
    /// `osx-arm64`
    #[serde(rename = "osx-arm64")]
    OsxArm64,
    /// `win-64`
    #[serde(rename = "win-64")]
    Win64,
    /// Architecture independent packages.
    #[serde(rename = "noarch")]
    NoArch,
}

impl Platform {
    /// All known platform subdirectories.
    pub const ALL: [Platform; 7] = [
        Self::Linux64,
        Self::LinuxAarch64,
        Self::LinuxPpc64le,
        Self::Osx64,
        Self::OsxArm64,
        Self::Win64,
        Self::NoArch,
    ];

    /// Get the platform this binary was compiled for
    pub fn current() -> Self {
        #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
        {
            Self::LinuxAarch64
        }
        #[cfg(all(target_os = "linux", target_arch = "powerpc64"))]
        {
            Self::LinuxPpc64le
        }
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            Self::OsxArm64
        }
        #[cfg(all(target_os = "macos", not(target_arch = "aarch64")))]
        {
            Self::Osx64
        }
        #[cfg(target_os = "windows")]
        {
            Self::Win64
        }
        #[cfg(not(any(
            all(target_os = "linux", target_arch = "aarch64"),
            all(target_os = "linux", target_arch = "powerpc64"),
            target_os = "macos",
            target_os = "windows"
        )))]
        {
            Self::Linux64
        }
    }

    /// Subdirectory name as used in channel URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux64 => "linux-64",
            Self::LinuxAarch64 => "linux-aarch64",
            Self::LinuxPpc64le => "linux-ppc64le",
            Self::Osx64 => "osx-64",
            Self::OsxArm64 => "osx-arm64",
            Self::Win64 => "win-64",
            Self::NoArch => "noarch",
        }
    }

    /// Returns `true` for the architecture independent subdirectory.
    pub fn is_noarch(&self) -> bool {
        matches!(self, Self::NoArch)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("Unknown platform: {s}"))
    }
}
