//! # queue
//!
//! why: the only surface the front end uses to record inventory commits
//! relations: persists through wms-storage, hands delivery to dispatch.rs
//! what: CommitQueue (submit/start/stop), operator queries, QueueStats

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use wms_core::{CommitRecord, CommitState, InventoryClient, NewCommit, QueueConfig};
use wms_storage::{CommitStore, FileStore, StorageError};

use crate::dispatch::Shared;
use crate::error::QueueError;

const DISPATCH_THREAD: &str = "commit-dispatch";

/// Counts of the records still held in the journal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub failed: usize,
    /// Highest id handed out so far
    pub last_id: u64,
}

/// Durable, ordered delivery of inventory commits.
///
/// `submit` journals a commit and returns as soon as it is on disk. A single
/// background thread started by `start` delivers journaled commits in id
/// order, retrying transient failures with backoff. A commit waiting out its
/// backoff holds back every newer commit, so adjustments land in the order
/// they were made.
pub struct CommitQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommitQueue {
    /// Open the journal under `config.data_dir`.
    pub fn open(
        config: QueueConfig,
        client: impl InventoryClient + 'static,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        let store = FileStore::open(&config.data_dir)?;
        tracing::info!(
            data_dir = %config.data_dir.display(),
            last_id = store.last_id(),
            "commit journal opened"
        );
        Ok(Self::with_store(store, client, config))
    }

    /// Build a queue over any store, e.g. `InMemoryStore` in tests.
    pub fn with_store(
        store: impl CommitStore + 'static,
        client: impl InventoryClient + 'static,
        config: QueueConfig,
    ) -> Self {
        let client: Arc<dyn InventoryClient> = Arc::new(client);
        Self {
            shared: Arc::new(Shared::new(Box::new(store), client, config)),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Journal a new commit and return its id.
    ///
    /// Returns once the record is durable; delivery happens in the background.
    pub fn submit(
        &self,
        device_id: &str,
        location: &str,
        delta: i64,
        item_id: i64,
    ) -> Result<u64, QueueError> {
        let commit = NewCommit::new(device_id, location, delta, item_id);
        commit.validate()?;

        let mut store = self.shared.lock_store();
        if let Some(limit) = self.shared.config.max_unresolved {
            if store.unresolved_count()? >= limit {
                tracing::warn!(limit, "commit rejected, queue is full");
                return Err(QueueError::QueueFull { limit });
            }
        }

        let id = store.last_id() + 1;
        let record = CommitRecord::new(id, commit, Utc::now());
        store.append(&record)?;
        self.shared.notify();
        drop(store);

        tracing::info!(commit_id = id, device_id, location, item_id, delta, "commit queued");
        Ok(id)
    }

    /// Start the dispatch thread. Calling it while running does nothing.
    pub fn start(&self) -> Result<(), QueueError> {
        let mut worker = self.lock_worker();
        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                tracing::debug!("dispatcher already running");
                return Ok(());
            }
        }
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                tracing::error!("previous dispatcher had panicked, restarting");
            }
        }

        self.shared.recover()?;
        self.shared.clear_stop();

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(DISPATCH_THREAD.into())
            .spawn(move || shared.run())
            .map_err(QueueError::Spawn)?;
        *worker = Some(handle);

        tracing::info!("commit dispatcher started");
        Ok(())
    }

    /// Stop the dispatch thread and wait for it.
    ///
    /// An attempt already in progress runs to completion first; nothing is
    /// dispatched after this returns. Undelivered commits stay journaled.
    pub fn stop(&self) {
        let mut worker = self.lock_worker();
        let Some(handle) = worker.take() else {
            return;
        };

        self.shared.request_stop();
        if handle.join().is_err() {
            tracing::error!("dispatcher panicked");
        }
        tracing::info!("commit dispatcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Whether any commit needs operator attention
    pub fn has_failed(&self) -> Result<bool, QueueError> {
        let store = self.shared.lock_store();
        Ok(store
            .load_all()?
            .iter()
            .any(|r| r.state == CommitState::Failed))
    }

    pub fn failed_records(&self) -> Result<Vec<CommitRecord>, QueueError> {
        let store = self.shared.lock_store();
        Ok(store
            .load_all()?
            .into_iter()
            .filter(|r| r.state == CommitState::Failed)
            .collect())
    }

    /// Every record not yet committed, oldest first
    pub fn outstanding_records(&self) -> Result<Vec<CommitRecord>, QueueError> {
        Ok(self.shared.lock_store().load_all()?)
    }

    pub fn record(&self, id: u64) -> Result<Option<CommitRecord>, QueueError> {
        Ok(self.shared.lock_store().get(id)?)
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let store = self.shared.lock_store();
        let mut stats = QueueStats {
            last_id: store.last_id(),
            ..QueueStats::default()
        };
        for record in store.load_all()? {
            match record.state {
                CommitState::Pending => stats.pending += 1,
                CommitState::InFlight => stats.in_flight += 1,
                CommitState::Failed => stats.failed += 1,
                CommitState::Committed => {}
            }
        }
        Ok(stats)
    }

    /// Give a Failed commit a fresh retry budget.
    ///
    /// It keeps its id, so it is delivered before anything submitted after it.
    pub fn requeue_failed(&self, id: u64) -> Result<(), QueueError> {
        let mut store = self.shared.lock_store();
        let mut record = store.get(id)?.ok_or(StorageError::UnknownRecord(id))?;
        if !record.requeue(Utc::now()) {
            return Err(QueueError::NotFailed {
                id,
                state: record.state,
            });
        }
        store.update_state(&record.to_update())?;
        self.shared.notify();
        drop(store);

        tracing::info!(commit_id = id, "failed commit requeued by operator");
        Ok(())
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CommitQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
