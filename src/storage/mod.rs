mod entries;
mod schema;
mod types;

pub use schema::{Database, ENTRIES_TABLE};
pub use types::{DatabaseError, FeedRecord, MergeSummary};
