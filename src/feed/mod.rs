//! Collaborators of the ingest pipeline that talk to the outside world.
//!
//! - [`client`] - HTTP resolution of a URL into a classified [`FetchHandle`]
//! - [`manifest`] - remote JSON/YAML lists of feed URLs
//! - [`opml`] - OPML subscription lists on disk

pub mod client;
pub mod manifest;
pub mod opml;

pub use client::{FeedClient, FetchError, FetchHandle, HttpFeedClient, PageKind};
pub use manifest::{ManifestError, ManifestFetcher, ManifestFormat, RemoteSource};
pub use opml::{OpmlError, OpmlFeed};
