//! Feed discovery, deduplication and concurrent validation/ingestion.
//!
//! Data flows through the submodules in order:
//!
//! - [`sources`] merges candidates from OPML trees and remote manifests
//! - [`filter`] follows feed discovery and drops links the store already has
//! - [`scheduler`] splits the remainder into batches, one store handle each
//! - [`pool`] fetches a batch with bounded concurrency and drains outcomes
//! - [`persist`] writes at most one record per link
//!
//! [`progress`] is shared across every batch of a run.

mod filter;
mod persist;
mod pool;
mod progress;
mod scheduler;
mod sources;

pub use filter::filter_known;
pub use persist::{persist, PersistOutcome};
pub use pool::{run_batch, BatchSummary, PoolOptions};
pub use progress::{Progress, ProgressUpdate};
pub use scheduler::{BatchScheduler, RunSummary, DEFAULT_BATCH_SIZE};
pub use sources::{aggregate, aggregate_with, SourceDescriptor};

use std::collections::HashSet;

use crate::feed::{FetchError, FetchHandle, PageKind};
use crate::util::normalize_url;

/// A deduplicated set of normalized candidate feed URLs.
///
/// Order is not part of the contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    urls: HashSet<String>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `raw` and add it. Returns false if it was already present
    /// or is not a usable URL (logged and skipped).
    pub fn insert(&mut self, raw: &str) -> bool {
        match normalize_url(raw) {
            Ok(url) => self.urls.insert(url.to_string()),
            Err(e) => {
                tracing::warn!(url = %raw, error = %e, "Skipping invalid candidate URL");
                false
            }
        }
    }

    pub fn union(&mut self, other: CandidateSet) {
        self.urls.extend(other.urls);
    }

    pub fn contains(&self, url: &str) -> bool {
        normalize_url(url)
            .map(|u| self.urls.contains(u.as_str()))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.urls.iter().map(String::as_str)
    }

    /// Consume the set. The order of the returned URLs is unspecified.
    pub fn into_vec(self) -> Vec<String> {
        self.urls.into_iter().collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = CandidateSet::new();
        set.extend(iter);
        set
    }
}

impl<S: AsRef<str>> Extend<S> for CandidateSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for raw in iter {
            self.insert(raw.as_ref());
        }
    }
}

/// What one worker learned about one candidate.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub candidate: String,
    /// Absent when the fetch failed.
    pub handle: Option<FetchHandle>,
    pub kind: PageKind,
    /// Failure reason, for logs only.
    pub error: Option<String>,
}

impl FetchOutcome {
    pub fn new(candidate: String, result: Result<FetchHandle, FetchError>) -> Self {
        match result {
            Ok(handle) => Self {
                candidate,
                kind: handle.classify(),
                handle: Some(handle),
                error: None,
            },
            Err(e) => Self {
                candidate,
                handle: None,
                kind: PageKind::NotFeed,
                error: Some(e.to_string()),
            },
        }
    }

    /// A candidate whose fetch ended without a result.
    pub fn failed(candidate: String, reason: impl Into<String>) -> Self {
        Self {
            candidate,
            handle: None,
            kind: PageKind::NotFeed,
            error: Some(reason.into()),
        }
    }

    pub fn is_feed(&self) -> bool {
        self.kind == PageKind::Feed && self.handle.is_some()
    }
}
