use anyhow::{bail, Context, Result};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::pool::{run_batch, BatchSummary, PoolOptions};
use super::progress::{Progress, ProgressUpdate};
use crate::feed::FeedClient;
use crate::storage::Database;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Counters of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// One entry per executed batch, in order.
    pub batches: Vec<BatchSummary>,
}

impl RunSummary {
    pub fn totals(&self) -> BatchSummary {
        let mut totals = BatchSummary::default();
        for batch in &self.batches {
            totals += *batch;
        }
        totals
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.totals();
        write!(
            f,
            "Processed {} candidates: {} feeds added, {} duplicates, {} not feeds",
            t.size, t.inserted, t.duplicates, t.not_feeds
        )?;
        if t.store_errors > 0 {
            write!(f, ", {} store errors", t.store_errors)?;
        }
        Ok(())
    }
}

/// Runs candidates through the worker pool in fixed-size batches.
///
/// Each batch gets its own store handle, opened before the batch and closed
/// after it. Batches never overlap.
pub struct BatchScheduler {
    db_path: String,
    client: Arc<dyn FeedClient>,
    batch_size: usize,
    options: PoolOptions,
    updates: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

impl BatchScheduler {
    pub fn new(db_path: impl Into<String>, client: Arc<dyn FeedClient>) -> Self {
        Self {
            db_path: db_path.into(),
            client,
            batch_size: DEFAULT_BATCH_SIZE,
            options: PoolOptions::default(),
            updates: None,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn pool_options(mut self, options: PoolOptions) -> Self {
        self.options = options;
        self
    }

    /// Forward every progress update of the run to `tx`.
    pub fn progress_updates(mut self, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    /// Process `candidates` batch by batch.
    ///
    /// # Errors
    ///
    /// Fails if `batch_size` is zero, or if the store cannot be opened at the
    /// start of a batch. Batches that already ran stay persisted.
    pub async fn run(&self, candidates: Vec<String>) -> Result<RunSummary> {
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }

        let total = candidates.len();
        let progress = match &self.updates {
            Some(tx) => Progress::with_updates(total, tx.clone()),
            None => Progress::new(total),
        };
        let batch_count = total.div_ceil(self.batch_size);
        let mut summary = RunSummary::default();

        tracing::info!(
            total,
            batch_size = self.batch_size,
            batches = batch_count,
            workers = self.options.workers,
            "Starting ingest"
        );

        for (index, batch) in candidates.chunks(self.batch_size).enumerate() {
            let db = Database::open(&self.db_path).await.with_context(|| {
                format!(
                    "Failed to open store '{}' for batch {}/{}",
                    self.db_path,
                    index + 1,
                    batch_count
                )
            })?;

            tracing::info!(batch = index + 1, of = batch_count, size = batch.len(), "Batch started");
            let batch_summary = run_batch(
                batch.to_vec(),
                Arc::clone(&self.client),
                &db,
                &progress,
                &self.options,
            )
            .await;
            db.close().await;

            tracing::info!(
                batch = index + 1,
                inserted = batch_summary.inserted,
                duplicates = batch_summary.duplicates,
                not_feeds = batch_summary.not_feeds,
                store_errors = batch_summary.store_errors,
                completed = progress.completed(),
                "Batch finished"
            );
            summary.batches.push(batch_summary);
        }

        Ok(summary)
    }
}
