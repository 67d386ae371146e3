use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// One consumed fetch outcome, as reported to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub completed: usize,
    pub total: usize,
    pub url: String,
    pub ok: bool,
}

impl fmt::Display for ProgressUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.ok { "OK" } else { "NOK" };
        write!(f, "[{}/{}] {}: {}", self.completed, self.total, self.url, status)
    }
}

/// Run-scoped progress counter shared by every batch.
///
/// `completed` is bumped exactly once per consumed outcome, so it only grows
/// and ends at `total` when every fetch was consumed.
#[derive(Debug)]
pub struct Progress {
    completed: AtomicUsize,
    total: usize,
    updates: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
            updates: None,
        }
    }

    /// Also forward every update to `tx`.
    pub fn with_updates(total: usize, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self {
            updates: Some(tx),
            ..Self::new(total)
        }
    }

    /// Count one consumed outcome and emit its progress line.
    pub fn record(&self, url: &str, ok: bool) -> ProgressUpdate {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let update = ProgressUpdate {
            completed,
            total: self.total,
            url: url.to_string(),
            ok,
        };

        tracing::debug!(completed, total = self.total, url = %url, ok, "Outcome consumed");
        if let Some(tx) = &self.updates {
            if tx.send(update.clone()).is_err() {
                tracing::trace!("Progress receiver dropped");
            }
        }
        update
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}
