use std::time::Duration;

use super::CandidateSet;
use crate::feed::FeedClient;
use crate::storage::{Database, DatabaseError};
use crate::util::{normalize_url, validate_url};

/// Follow feed discovery for each candidate, then drop links already stored.
///
/// Candidates are probed one at a time. When a probed page advertises feeds,
/// the first one that passes the host policy replaces the candidate; links to
/// loopback, private or link-local hosts are skipped unless
/// `allow_private_hosts` is set. A failed probe, or a page whose feed links
/// were all rejected, keeps the candidate as is; it fails again at fetch time
/// and is reported there.
///
/// # Errors
///
/// Store errors abort the filter.
pub async fn filter_known<C>(
    candidates: CandidateSet,
    client: &C,
    db: &Database,
    timeout: Duration,
    allow_private_hosts: bool,
) -> Result<CandidateSet, DatabaseError>
where
    C: FeedClient + ?Sized,
{
    let total = candidates.len();
    let mut kept = CandidateSet::new();
    let mut known = 0usize;

    for candidate in candidates.into_vec() {
        let url = match client.resolve(&candidate, timeout).await {
            Ok(handle) => match first_allowed(handle.discover_feeds(), allow_private_hosts) {
                Some(feed_url) => {
                    tracing::debug!(candidate = %candidate, feed = %feed_url, "Discovered feed link");
                    feed_url.to_string()
                }
                None => candidate,
            },
            Err(e) => {
                tracing::debug!(url = %candidate, error = %e, "Probe failed, keeping candidate");
                candidate
            }
        };

        let url = match normalize_url(&url) {
            Ok(u) => u.to_string(),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Skipping invalid discovered URL");
                continue;
            }
        };

        if db.is_entry_link(&url).await? {
            known += 1;
            continue;
        }
        kept.insert(&url);
    }

    tracing::info!(total, known, remaining = kept.len(), "Filtered known links");
    Ok(kept)
}

/// First discovered feed link the host policy accepts.
fn first_allowed(links: &[String], allow_private_hosts: bool) -> Option<&str> {
    links
        .iter()
        .map(String::as_str)
        .find(|link| match validate_url(link) {
            Ok(_) => true,
            Err(_) if allow_private_hosts => true,
            Err(e) => {
                tracing::warn!(url = %link, error = %e, "Ignoring discovered feed link");
                false
            }
        })
}
