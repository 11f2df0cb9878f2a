//! Repository handles, stored in an arena and addressed by [`RepoId`].

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use conduit_schema::Platform;

use crate::cache::{CacheState, MetadataCache};
use crate::channel::ResolvedChannels;

/// Index of a [`RepositoryHandle`] inside a [`RepoArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoId(pub usize);

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repo#{}", self.0)
    }
}

/// Where a repository stands in the fetch lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    /// Cache (or fresh download) holds usable content.
    Fresh,
    /// Cache file is too old and must be refetched.
    Stale,
    /// No cache file yet.
    Missing,
    /// Could not be obtained; the reason is kept for reporting.
    Unavailable(String),
}

impl From<CacheState> for FetchState {
    fn from(state: CacheState) -> Self {
        match state {
            CacheState::Fresh => Self::Fresh,
            CacheState::Stale => Self::Stale,
            CacheState::Missing => Self::Missing,
        }
    }
}

/// One channel subdirectory's repodata.
#[derive(Debug, Clone)]
pub struct RepositoryHandle {
    /// Position in the arena.
    pub id: RepoId,
    /// Index into [`ResolvedChannels::channels`].
    pub channel: usize,
    /// Channel base URL, recorded on every package from this repository.
    pub channel_url: String,
    /// Subdirectory platform.
    pub platform: Platform,
    /// `<base>/<platform>`, package URLs are built from it.
    pub subdir_url: String,
    /// `<base>/<platform>/repodata.json`
    pub url: String,
    /// Cache file for `url`.
    pub cache_path: PathBuf,
    /// Higher wins; the first repository has the highest value.
    pub priority: u32,
    /// Fetch lifecycle state.
    pub state: FetchState,
    /// Raw repodata once fresh.
    pub content: Option<Bytes>,
}

impl RepositoryHandle {
    /// Returns `true` if the handle holds content the pool can use.
    pub fn is_usable(&self) -> bool {
        self.state == FetchState::Fresh && self.content.is_some()
    }

    /// Returns `true` if the fetcher has to download this repository.
    pub fn needs_fetch(&self) -> bool {
        matches!(self.state, FetchState::Stale | FetchState::Missing)
    }
}

/// Owns every [`RepositoryHandle`] of a run.
#[derive(Debug, Clone, Default)]
pub struct RepoArena {
    handles: Vec<RepositoryHandle>,
}

impl RepoArena {
    /// One handle per repository URL of `channels`, priorities `N..=1`,
    /// states taken from the cache.
    pub fn from_channels(channels: &ResolvedChannels, cache: &MetadataCache) -> Self {
        let urls = channels.repo_urls();
        let total = urls.len() as u32;
        let handles = urls
            .into_iter()
            .enumerate()
            .map(|(i, repo)| {
                let cache_path = cache.path_for(&repo.repodata_url);
                let state = cache.state(&repo.repodata_url).into();
                RepositoryHandle {
                    id: RepoId(i),
                    channel: repo.channel,
                    channel_url: channels.channels[repo.channel].base_url.clone(),
                    platform: repo.platform,
                    subdir_url: repo.subdir_url,
                    url: repo.repodata_url,
                    cache_path,
                    priority: total - i as u32,
                    state,
                    content: None,
                }
            })
            .collect();
        Self { handles }
    }

    /// Look up a handle.
    pub fn get(&self, id: RepoId) -> Option<&RepositoryHandle> {
        self.handles.get(id.0)
    }

    /// Look up a handle mutably.
    pub fn get_mut(&mut self, id: RepoId) -> Option<&mut RepositoryHandle> {
        self.handles.get_mut(id.0)
    }

    /// Handles in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &RepositoryHandle> {
        self.handles.iter()
    }

    /// Handles in priority order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RepositoryHandle> {
        self.handles.iter_mut()
    }

    /// Usable handles in priority order.
    pub fn usable(&self) -> impl Iterator<Item = &RepositoryHandle> {
        self.handles.iter().filter(|h| h.is_usable())
    }

    /// Number of handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if the arena has no handles.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Returns `true` if at least one channel has a usable handle.
    pub fn any_channel_usable(&self) -> bool {
        self.handles.iter().any(RepositoryHandle::is_usable)
    }
}
