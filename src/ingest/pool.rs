use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::persist::{persist, PersistOutcome};
use super::progress::Progress;
use super::FetchOutcome;
use crate::feed::{FeedClient, FetchError};
use crate::storage::Database;

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(70);

/// Knobs of one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum fetches in flight. Clamped to `1..=batch.len()`.
    pub workers: usize,
    /// Upper bound for one fetch, including retries.
    pub fetch_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// Counters of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub size: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub not_feeds: usize,
    pub store_errors: usize,
}

impl std::ops::AddAssign for BatchSummary {
    fn add_assign(&mut self, other: Self) {
        self.size += other.size;
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.not_feeds += other.not_feeds;
        self.store_errors += other.store_errors;
    }
}

/// Fetch every candidate of `batch` and persist the feeds among them.
///
/// Workers pull from a shared queue and push outcomes onto one channel. The
/// calling task is the only consumer: it counts progress and persists in
/// completion order. Returns once every outcome was consumed and every
/// worker task has exited.
pub async fn run_batch(
    batch: Vec<String>,
    client: Arc<dyn FeedClient>,
    db: &Database,
    progress: &Progress,
    options: &PoolOptions,
) -> BatchSummary {
    let mut summary = BatchSummary {
        size: batch.len(),
        ..Default::default()
    };
    if batch.is_empty() {
        return summary;
    }

    let workers = options.workers.clamp(1, batch.len());
    let (job_tx, job_rx) = mpsc::channel::<String>(batch.len());
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<FetchOutcome>(workers);

    for url in batch {
        // Capacity equals the batch length, so this never waits
        if job_tx.send(url).await.is_err() {
            tracing::error!("Job queue closed before the batch was queued");
            break;
        }
    }
    drop(job_tx);

    let handles = spawn_workers(workers, job_rx, outcome_tx, client, options.fetch_timeout);

    while let Some(outcome) = outcome_rx.recv().await {
        progress.record(&outcome.candidate, outcome.is_feed());

        match persist(db, &outcome).await {
            Ok(PersistOutcome::Inserted(_)) => summary.inserted += 1,
            Ok(PersistOutcome::Duplicate) => summary.duplicates += 1,
            Ok(PersistOutcome::NotFeed) => summary.not_feeds += 1,
            Err(e) => {
                tracing::warn!(url = %outcome.candidate, error = %e, "Failed to store feed");
                summary.store_errors += 1;
            }
        }
    }

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Fetch worker panicked");
        }
    }

    summary
}

fn spawn_workers(
    workers: usize,
    job_rx: mpsc::Receiver<String>,
    outcome_tx: mpsc::Sender<FetchOutcome>,
    client: Arc<dyn FeedClient>,
    fetch_timeout: Duration,
) -> Vec<JoinHandle<()>> {
    let job_rx = Arc::new(Mutex::new(job_rx));

    (0..workers)
        .map(|worker_id| {
            let job_rx = Arc::clone(&job_rx);
            let outcome_tx = outcome_tx.clone();
            let client = Arc::clone(&client);

            tokio::spawn(async move {
                loop {
                    // Hold the lock only while taking a job
                    let next = job_rx.lock().await.recv().await;
                    let Some(url) = next else {
                        break;
                    };

                    // The client is asked to honor the timeout itself; the
                    // outer bound covers clients that don't.
                    let fetch = tokio::time::timeout(fetch_timeout, client.resolve(&url, fetch_timeout));
                    let outcome = match AssertUnwindSafe(fetch).catch_unwind().await {
                        Ok(result) => {
                            let result = result.unwrap_or(Err(FetchError::Timeout));
                            if let Err(e) = &result {
                                tracing::debug!(worker_id, url = %url, error = %e, "Fetch failed");
                            }
                            FetchOutcome::new(url, result)
                        }
                        Err(_) => {
                            tracing::error!(worker_id, url = %url, "Fetch panicked");
                            FetchOutcome::failed(url, "fetch panicked")
                        }
                    };

                    if outcome_tx.send(outcome).await.is_err() {
                        tracing::error!(worker_id, "Outcome channel closed");
                        break;
                    }
                }
            })
        })
        .collect()
}
