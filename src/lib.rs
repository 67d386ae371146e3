//! Discover, deduplicate and validate syndication feeds, then store the ones
//! that check out.
//!
//! Candidates come from OPML files and remote manifests ([`ingest::aggregate`]),
//! are followed through feed discovery and checked against the store
//! ([`ingest::filter_known`]), then fetched in batches by a bounded worker
//! pool ([`ingest::BatchScheduler`]). Every fetched resource that parses as a
//! feed is written once to the [`storage::Database`].

pub mod config;
pub mod feed;
pub mod ingest;
pub mod storage;
pub mod util;
