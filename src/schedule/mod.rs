//! Batch scheduler: bounded fan-out of acquisitions.
//!
//! Jobs go through a shared queue consumed by a fixed set of workers; results
//! come back over a channel. Keys are deduplicated before dispatch so no two
//! workers ever write the same destination path.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::acquire::{Acquired, Acquirer};
use crate::cache::CacheEntry;
use crate::error::FailureReason;
use crate::registry::PackageSource;
use crate::runtime::Runtime;

/// Upper bound on concurrent downloads regardless of core count.
pub const MAX_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success(CacheEntry),
    SkippedAlreadyValid(CacheEntry),
    Failed(FailureReason),
}

/// Result of acquiring one package in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionOutcome {
    pub key: String,
    pub status: OutcomeStatus,
}

impl AcquisitionOutcome {
    pub fn failed(key: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            key: key.into(),
            status: OutcomeStatus::Failed(reason),
        }
    }

    /// The verified cache entry, unless acquisition failed.
    pub fn entry(&self) -> Option<&CacheEntry> {
        match &self.status {
            OutcomeStatus::Success(entry) | OutcomeStatus::SkippedAlreadyValid(entry) => {
                Some(entry)
            }
            OutcomeStatus::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.status {
            OutcomeStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl From<(String, Result<Acquired, FailureReason>)> for AcquisitionOutcome {
    fn from((key, result): (String, Result<Acquired, FailureReason>)) -> Self {
        let status = match result {
            Ok(Acquired::Fresh(entry)) => OutcomeStatus::Success(entry),
            Ok(Acquired::Cached(entry)) => OutcomeStatus::SkippedAlreadyValid(entry),
            Err(reason) => OutcomeStatus::Failed(reason),
        };
        Self { key, status }
    }
}

/// Worker count derived from available parallelism, capped at [`MAX_WORKERS`].
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_WORKERS)
}

pub struct Scheduler<R: Runtime + 'static> {
    acquirer: Arc<Acquirer<R>>,
    dest_dir: PathBuf,
    workers: usize,
}

impl<R: Runtime + 'static> Scheduler<R> {
    pub fn new(acquirer: Arc<Acquirer<R>>, dest_dir: PathBuf, workers: usize) -> Self {
        Self {
            acquirer,
            dest_dir,
            workers: workers.max(1),
        }
    }

    /// Acquire every source, returning exactly one outcome per distinct key.
    ///
    /// Outcomes arrive in completion order. A failing package never cancels
    /// the others.
    #[tracing::instrument(skip(self, sources), fields(count = sources.len()))]
    pub async fn acquire_all(&self, sources: &[PackageSource]) -> Vec<AcquisitionOutcome> {
        let mut seen = HashSet::new();
        let unique: Vec<PackageSource> = sources
            .iter()
            .filter(|source| seen.insert(source.key.clone()))
            .cloned()
            .collect();
        if unique.is_empty() {
            return Vec::new();
        }

        let (job_tx, job_rx) = mpsc::channel(unique.len());
        for source in &unique {
            // Capacity covers every job, so this never waits
            if job_tx.send(source.clone()).await.is_err() {
                break;
            }
        }
        drop(job_tx);
        let jobs = Arc::new(Mutex::new(job_rx));

        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let worker_count = self.workers.min(unique.len());
        debug!(
            "Acquiring {} package(s) with {} worker(s)",
            unique.len(),
            worker_count
        );

        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            let jobs = Arc::clone(&jobs);
            let results = result_tx.clone();
            let acquirer = Arc::clone(&self.acquirer);
            let dest_dir = self.dest_dir.clone();

            workers.spawn(async move {
                loop {
                    let next = jobs.lock().await.recv().await;
                    let Some(source) = next else {
                        break;
                    };
                    let result = acquirer.acquire(&source, &dest_dir).await;
                    if let Err(reason) = &result {
                        warn!("{}: acquisition failed: {}", source.key, reason);
                    }
                    let outcome = AcquisitionOutcome::from((source.key, result));
                    if results.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("Acquisition worker terminated: {}", e);
            }
        }

        let mut outcomes = Vec::with_capacity(unique.len());
        while let Some(outcome) = result_rx.recv().await {
            outcomes.push(outcome);
        }

        // A job taken by a worker that panicked has no outcome yet
        let reported: HashSet<String> = outcomes.iter().map(|o| o.key.clone()).collect();
        for source in unique {
            if !reported.contains(&source.key) {
                outcomes.push(AcquisitionOutcome::failed(
                    source.key,
                    FailureReason::Io("acquisition worker terminated unexpectedly".into()),
                ));
            }
        }

        outcomes
    }
}
