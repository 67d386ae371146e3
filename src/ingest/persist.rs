use super::FetchOutcome;
use crate::feed::FetchHandle;
use crate::storage::{Database, DatabaseError, FeedRecord};
use crate::util::{clean_text, normalize_url};

/// What happened to one outcome at the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Not a feed; nothing written.
    NotFeed,
    /// The link was already stored.
    Duplicate,
    /// New row with this id.
    Inserted(i64),
}

impl FeedRecord {
    /// Build the record for a resource classified as a feed.
    ///
    /// The link is the normalized final URL of the fetch, so a redirected
    /// candidate is stored under where it ended up.
    pub fn from_handle(handle: &FetchHandle) -> Self {
        let link = normalize_url(handle.url())
            .map(|u| u.to_string())
            .unwrap_or_else(|_| handle.url().to_string());

        let mut record = FeedRecord::new(link, i64::from(handle.status_code()));
        record.title = handle.title().and_then(clean_text);
        record.description = handle.description().and_then(clean_text);
        record.thumbnail = handle.thumbnail().map(str::to_owned);
        record.language = handle.language().and_then(clean_text);
        record.author = handle.author().and_then(clean_text);
        record
    }
}

/// Store `outcome` if it is a feed whose link is not stored yet.
///
/// The existence check runs right before the insert; the `UNIQUE(link)`
/// constraint catches anything that slips between the two.
pub async fn persist(db: &Database, outcome: &FetchOutcome) -> Result<PersistOutcome, DatabaseError> {
    let Some(handle) = outcome.handle.as_ref().filter(|_| outcome.is_feed()) else {
        return Ok(PersistOutcome::NotFeed);
    };

    let record = FeedRecord::from_handle(handle);

    if db.is_entry_link(&record.link).await? {
        tracing::debug!(link = %record.link, "Feed already stored");
        return Ok(PersistOutcome::Duplicate);
    }

    match db.insert_feed_record(&record).await {
        Ok(id) => {
            tracing::info!(id, link = %record.link, title = ?record.title, "Added feed");
            Ok(PersistOutcome::Inserted(id))
        }
        Err(DatabaseError::Conflict(_)) => {
            tracing::debug!(link = %record.link, "Feed stored concurrently");
            Ok(PersistOutcome::Duplicate)
        }
        Err(e) => Err(e),
    }
}
