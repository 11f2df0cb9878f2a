//! Channel resolution.
//!
//! Turns the user's channel strings into an ordered, de-duplicated list of
//! [`Channel`]s and the repodata URLs they publish. No network access.

use conduit_schema::{Platform, REPODATA_FILE};

use crate::config::Config;
use crate::error::Error;

/// Multi-channel name that expands to the configured default channels.
pub const DEFAULTS: &str = "defaults";

/// A resolved channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Canonical base URL without trailing slash; the channel's identity.
    pub base_url: String,
    /// Short name for display (`conda-forge`, `pkgs/main`).
    pub name: String,
    /// Subdirectories to fetch, primary platform first.
    pub platforms: Vec<Platform>,
}

impl Channel {
    /// URL of one platform subdirectory.
    pub fn subdir_url(&self, platform: Platform) -> String {
        format!("{}/{}", self.base_url, platform.as_str())
    }

    /// Add subdirs from a later mention of the same base URL, keeping
    /// `noarch` last.
    fn merge_platforms(&mut self, platforms: &[Platform]) {
        let mut added = false;
        for &platform in platforms {
            if self.platforms.contains(&platform) {
                continue;
            }
            let at = self
                .platforms
                .iter()
                .position(|p| p.is_noarch())
                .unwrap_or(self.platforms.len());
            self.platforms.insert(at, platform);
            added = true;
        }
        if added {
            tracing::debug!("Channel {} now covers {:?}", self.base_url, self.platforms);
        } else {
            tracing::debug!("Skipping duplicate channel {}", self.base_url);
        }
    }

    /// URL of the repodata document for one platform subdirectory.
    pub fn repodata_url(&self, platform: Platform) -> String {
        format!("{}/{REPODATA_FILE}", self.subdir_url(platform))
    }
}

/// One repository to fetch, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrl {
    /// Index into [`ResolvedChannels::channels`].
    pub channel: usize,
    /// Subdirectory platform.
    pub platform: Platform,
    /// `<base>/<platform>`
    pub subdir_url: String,
    /// `<base>/<platform>/repodata.json`
    pub repodata_url: String,
}

/// Ordered channels, most preferred first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedChannels {
    /// The channels, de-duplicated by base URL.
    pub channels: Vec<Channel>,
}

impl ResolvedChannels {
    /// Repository URLs: for each channel its primary platform, then `noarch`.
    pub fn repo_urls(&self) -> Vec<RepoUrl> {
        self.channels
            .iter()
            .enumerate()
            .flat_map(|(idx, channel)| {
                channel.platforms.iter().map(move |&platform| RepoUrl {
                    channel: idx,
                    platform,
                    subdir_url: channel.subdir_url(platform),
                    repodata_url: channel.repodata_url(platform),
                })
            })
            .collect()
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns `true` if there are no channels.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Resolve `inputs` against the configuration.
///
/// Empty input falls back to `config.default_channels`.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if no channel remains after falling back
/// to the defaults, or if a channel string is blank.
pub fn resolve_channels(inputs: &[String], config: &Config) -> Result<ResolvedChannels, Error> {
    let requested: Vec<String> = if inputs.is_empty() {
        vec![DEFAULTS.to_string()]
    } else {
        inputs.to_vec()
    };

    let mut channels: Vec<Channel> = Vec::new();

    for raw in &requested {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::Configuration("empty channel name".into()));
        }

        let expanded: Vec<&str> = if raw == DEFAULTS {
            config.default_channels.iter().map(String::as_str).collect()
        } else {
            vec![raw]
        };

        for entry in expanded {
            let channel = parse_channel(entry, config);
            match channels.iter_mut().find(|c| c.base_url == channel.base_url) {
                Some(existing) => existing.merge_platforms(&channel.platforms),
                None => {
                    tracing::debug!("Channel {} -> {}", channel.name, channel.base_url);
                    channels.push(channel);
                }
            }
        }
    }

    if channels.is_empty() {
        return Err(Error::Configuration(
            "no channels configured and no default channels available".into(),
        ));
    }

    Ok(ResolvedChannels { channels })
}

fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}

fn parse_channel(raw: &str, config: &Config) -> Channel {
    let alias = config.channel_alias.trim_end_matches('/');
    let trimmed = raw.trim_end_matches('/');

    let mut base_url = if is_url(trimmed) {
        trimmed.to_string()
    } else {
        format!("{alias}/{trimmed}")
    };

    // A trailing platform segment pins the channel to that subdir
    let mut platforms = vec![config.platform, Platform::NoArch];
    if let Some((head, last)) = base_url.rsplit_once('/') {
        if let Ok(pinned) = last.parse::<Platform>() {
            platforms = if pinned.is_noarch() {
                vec![Platform::NoArch]
            } else {
                vec![pinned, Platform::NoArch]
            };
            base_url = head.to_string();
        }
    }
    platforms.dedup();

    Channel {
        name: display_name(&base_url, alias),
        base_url,
        platforms,
    }
}

fn display_name(base_url: &str, alias: &str) -> String {
    let known_prefixes = [alias, "https://repo.anaconda.com"];
    for prefix in known_prefixes {
        if let Some(rest) = base_url.strip_prefix(prefix) {
            if let Some(rest) = rest.strip_prefix('/') {
                if !rest.is_empty() {
                    return rest.to_string();
                }
            }
        }
    }
    base_url.to_string()
}
