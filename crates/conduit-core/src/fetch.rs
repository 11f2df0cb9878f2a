//! Concurrent repodata acquisition.
//!
//! Fresh cache files are read from disk; stale and missing repositories are
//! downloaded with at most `max_parallel_downloads` requests in flight, each
//! retried with exponential backoff. A repository that exhausts its retries
//! becomes [`FetchState::Unavailable`]; the run only fails when no channel
//! is left with usable data.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Error;
use crate::io::write_atomic_async;
use crate::repo::{FetchState, RepoArena, RepoId};
use crate::reporter::Reporter;
use crate::transport::Transport;

/// Retry schedule for one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier per further retry.
    pub backoff: u32,
}

impl RetryPolicy {
    /// Policy from `retry_timeout_secs`, `retry_backoff` and `max_retries`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs(config.retry_timeout_secs),
            backoff: config.retry_backoff,
        }
    }

    /// Delay after failed attempt number `attempt` (0-based):
    /// `base_delay * backoff^attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(self.backoff.saturating_pow(attempt))
    }
}

/// Counts reported after a fetch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Repositories served from a fresh cache file.
    pub from_cache: usize,
    /// Repositories downloaded this run.
    pub downloaded: usize,
    /// Repositories that could not be obtained.
    pub unavailable: usize,
}

/// Drives repodata acquisition for a [`RepoArena`].
pub struct Fetcher<'a> {
    transport: &'a dyn Transport,
    reporter: &'a dyn Reporter,
    retry: RetryPolicy,
    max_parallel: usize,
    timeout: Duration,
    offline: bool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Fetcher<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("retry", &self.retry)
            .field("max_parallel", &self.max_parallel)
            .field("offline", &self.offline)
            .finish_non_exhaustive()
    }
}

impl<'a> Fetcher<'a> {
    /// Fetcher using the network settings of `config`.
    pub fn new(
        transport: &'a dyn Transport,
        reporter: &'a dyn Reporter,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            reporter,
            retry: RetryPolicy::from_config(config),
            max_parallel: config.max_parallel_downloads.max(1),
            timeout: config.read_timeout(),
            offline: config.offline,
            cancel,
        }
    }

    /// Bring every handle in `arena` to `Fresh` or `Unavailable`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the token fires while requests are
    /// pending and [`Error::Network`] if no channel ends up usable.
    pub async fn fetch_all(&self, arena: &mut RepoArena) -> Result<FetchSummary, Error> {
        let mut summary = FetchSummary::default();

        for handle in arena.iter_mut() {
            if self.offline && handle.state != FetchState::Fresh {
                handle.state = if handle.cache_path.exists() {
                    FetchState::Fresh
                } else {
                    FetchState::Unavailable("offline and not cached".into())
                };
            }
            if handle.state != FetchState::Fresh {
                continue;
            }
            match tokio::fs::read(&handle.cache_path).await {
                Ok(bytes) => {
                    debug!("Using cached {} ({})", handle.url, handle.cache_path.display());
                    handle.content = Some(Bytes::from(bytes));
                    summary.from_cache += 1;
                    self.reporter.fetched(&handle.url, true);
                }
                Err(e) => {
                    warn!("Cannot read cache {}: {e}", handle.cache_path.display());
                    handle.state = if self.offline {
                        FetchState::Unavailable(format!("cache unreadable: {e}"))
                    } else {
                        FetchState::Missing
                    };
                }
            }
        }

        let jobs: Vec<(RepoId, String, PathBuf)> = arena
            .iter()
            .filter(|h| h.needs_fetch())
            .map(|h| (h.id, h.url.clone(), h.cache_path.clone()))
            .collect();

        if !jobs.is_empty() {
            debug!(
                "Fetching {} repositories ({} in parallel)",
                jobs.len(),
                self.max_parallel
            );

            let work = stream::iter(jobs)
                .map(|(id, url, path)| async move {
                    let result = self.fetch_one(&url, &path).await;
                    (id, url, result)
                })
                .buffer_unordered(self.max_parallel)
                .collect::<Vec<_>>();

            let results = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                results = work => results,
            };

            for (id, url, result) in results {
                let Some(handle) = arena.get_mut(id) else {
                    continue;
                };
                match result {
                    Ok(bytes) => {
                        handle.state = FetchState::Fresh;
                        handle.content = Some(bytes);
                        summary.downloaded += 1;
                        self.reporter.fetched(&url, false);
                    }
                    Err(reason) => {
                        self.reporter.unavailable(&url, &reason);
                        handle.state = FetchState::Unavailable(reason);
                    }
                }
            }
        }

        let mut failures = Vec::new();
        for handle in arena.iter() {
            if let FetchState::Unavailable(reason) = &handle.state {
                summary.unavailable += 1;
                failures.push(format!("{}: {reason}", handle.url));
            }
        }

        if !arena.any_channel_usable() {
            return Err(Error::Network(if failures.is_empty() {
                "no repositories to fetch".into()
            } else {
                format!("all channels are unavailable\n  {}", failures.join("\n  "))
            }));
        }

        Ok(summary)
    }

    async fn fetch_one(&self, url: &str, cache_path: &std::path::Path) -> Result<Bytes, String> {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err("cancelled".into());
            }
            self.reporter.fetching(url);

            match self.transport.get(url, self.timeout).await {
                Ok(bytes) => {
                    if let Err(e) = write_atomic_async(cache_path, bytes.clone()).await {
                        warn!("Failed to update cache {}: {e}", cache_path.display());
                    }
                    return Ok(bytes);
                }
                Err(e) if attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        "Fetch attempt {} for {url} failed: {e}, retrying in {delay:?}",
                        attempt + 1
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => return Err("cancelled".into()),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Giving up on {url} after {} attempts: {e}", attempt + 1);
                    return Err(e.to_string());
                }
            }
        }
    }
}
