//! # dispatch
//!
//! why: drain the journal through the inventory client one record at a time, oldest first
//! relations: spawned and stopped by queue.rs, owns all state changes of live records
//! what: Shared queue state, wake signal, dispatch loop

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use wms_core::{CommitRecord, CommitState, InventoryClient, QueueConfig, Resolution};
use wms_storage::{CommitStore, StorageError};

/// state shared between callers and the dispatch thread
///
/// lock order is store, then signal
pub(crate) struct Shared {
    store: Mutex<Box<dyn CommitStore>>,
    signal: Mutex<Signal>,
    wake: Condvar,
    client: Arc<dyn InventoryClient>,
    pub(crate) config: QueueConfig,
}

#[derive(Debug, Default)]
struct Signal {
    stop: bool,
    /// bumped on every submit/requeue so a wake between check and wait is not lost
    generation: u64,
}

/// what the loop should do after one step
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Dispatched,
    Idle,
    Backoff(Duration),
    /// the inventory service cannot be reached; nothing was attempted
    Offline,
    Halt,
}

/// the next record due for delivery, or why there is none
enum Head {
    Ready(CommitRecord),
    Wait(Step),
}

impl Shared {
    pub(crate) fn new(
        store: Box<dyn CommitStore>,
        client: Arc<dyn InventoryClient>,
        config: QueueConfig,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            signal: Mutex::new(Signal::default()),
            wake: Condvar::new(),
            client,
            config,
        }
    }

    pub(crate) fn lock_store(&self) -> MutexGuard<'_, Box<dyn CommitStore>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_signal(&self) -> MutexGuard<'_, Signal> {
        self.signal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// wake the loop after new work appeared; callers hold the store lock
    pub(crate) fn notify(&self) {
        let mut signal = self.lock_signal();
        signal.generation = signal.generation.wrapping_add(1);
        self.wake.notify_all();
    }

    pub(crate) fn request_stop(&self) {
        self.lock_signal().stop = true;
        self.wake.notify_all();
    }

    pub(crate) fn clear_stop(&self) {
        self.lock_signal().stop = false;
    }

    /// startup pass: return interrupted deliveries to Pending and apply retention
    pub(crate) fn recover(&self) -> Result<(), StorageError> {
        let now = Utc::now();
        let mut store = self.lock_store();

        for mut record in store.load_all()? {
            if record.recover_interrupted(now) {
                tracing::warn!(
                    commit_id = record.id,
                    attempts = record.attempts,
                    "delivery was interrupted, commit returned to pending"
                );
                store.update_state(&record.to_update())?;
            }
        }

        if let Some(cutoff) = self.retention_cutoff(now) {
            let purged = store.purge_committed(cutoff)?;
            if purged > 0 {
                tracing::info!(purged, "purged committed records past retention");
            }
        }
        Ok(())
    }

    fn retention_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.config.committed_retention())
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
    }

    /// body of the dispatch thread
    pub(crate) fn run(self: Arc<Self>) {
        tracing::debug!("dispatch loop running");
        // a resolved record whose outcome could not be written yet
        let mut unrecorded: Option<CommitRecord> = None;
        let mut offline = false;

        loop {
            let seen = {
                let signal = self.lock_signal();
                if signal.stop {
                    break;
                }
                signal.generation
            };

            let step = self.step(&mut unrecorded);
            match &step {
                Ok(Step::Offline) if !offline => {
                    offline = true;
                    tracing::warn!("inventory service unreachable, holding deliveries");
                }
                Ok(Step::Dispatched) if offline => {
                    offline = false;
                    tracing::info!("inventory service reachable again");
                }
                _ => {}
            }

            match step {
                Ok(Step::Dispatched) => {}
                Ok(Step::Halt) => break,
                Ok(Step::Idle) => {
                    tracing::debug!("no pending commits, waiting");
                    self.wait(seen, None);
                }
                Ok(Step::Backoff(delay)) => {
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "head commit backing off");
                    self.wait(seen, Some(delay));
                }
                Ok(Step::Offline) => self.wait(seen, Some(self.config.offline_retry())),
                Err(e) => {
                    tracing::error!(error = %e, "commit store fault, dispatcher will retry");
                    self.wait(seen, Some(self.config.storage_retry()));
                }
            }
        }

        if let Some(record) = unrecorded {
            tracing::error!(
                commit_id = record.id,
                state = %record.state,
                "dispatcher stopped before the outcome was stored, commit will be redelivered"
            );
        }
        tracing::debug!("dispatch loop halted");
    }

    /// sleep until new work, stop, or the timeout
    fn wait(&self, seen: u64, timeout: Option<Duration>) {
        let signal = self.lock_signal();
        let idle = |s: &mut Signal| !s.stop && s.generation == seen;
        match timeout {
            None => {
                let _guard = self
                    .wake
                    .wait_while(signal, idle)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some(timeout) => {
                let _guard = self
                    .wake
                    .wait_timeout_while(signal, timeout, idle)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    fn head(&self, now: DateTime<Utc>) -> Result<Head, StorageError> {
        Self::find_head(&**self.lock_store(), now)
    }

    /// lowest-id Pending or InFlight record, if its backoff has elapsed
    fn find_head(store: &dyn CommitStore, now: DateTime<Utc>) -> Result<Head, StorageError> {
        let head = store
            .load_all()?
            .into_iter()
            .find(|r| r.state.is_unresolved());
        let Some(head) = head else {
            return Ok(Head::Wait(Step::Idle));
        };

        if !head.is_ready(now) {
            let delay = head
                .not_before
                .and_then(|at| (at - now).to_std().ok())
                .unwrap_or_default();
            return Ok(Head::Wait(Step::Backoff(delay)));
        }
        Ok(Head::Ready(head))
    }

    fn step(&self, unrecorded: &mut Option<CommitRecord>) -> Result<Step, StorageError> {
        if let Some(record) = unrecorded.take() {
            let mut store = self.lock_store();
            if let Err(e) = store.update_state(&record.to_update()) {
                *unrecorded = Some(record);
                return Err(e);
            }
            return Ok(Step::Dispatched);
        }

        // probe only when there is something due, and never under the store lock
        if let Head::Wait(step) = self.head(Utc::now())? {
            return Ok(step);
        }
        if !self.client.is_reachable() {
            return Ok(Step::Offline);
        }

        let now = Utc::now();
        let mut record = {
            let mut store = self.lock_store();
            let mut head = match Self::find_head(&**store, now)? {
                Head::Ready(head) => head,
                Head::Wait(step) => return Ok(step),
            };
            if self.lock_signal().stop {
                return Ok(Step::Halt);
            }

            head.begin_attempt(now);
            store.update_state(&head.to_update())?;
            head
        };

        tracing::debug!(commit_id = record.id, attempt = record.attempts, "delivering commit");
        let outcome = self.client.submit(
            &record.device_id,
            &record.location,
            record.delta,
            record.item_id,
        );

        let resolved_at = Utc::now();
        match record.resolve(&outcome, &self.config.retry, resolved_at) {
            Resolution::Committed => tracing::info!(
                commit_id = record.id,
                item_id = record.item_id,
                delta = record.delta,
                attempts = record.attempts,
                "commit delivered"
            ),
            Resolution::Retry { not_before } => tracing::warn!(
                commit_id = record.id,
                attempts = record.attempts,
                error = record.last_error.as_deref().unwrap_or_default(),
                retry_at = %not_before,
                "delivery failed, will retry"
            ),
            Resolution::Failed { ref reason } => tracing::error!(
                commit_id = record.id,
                attempts = record.attempts,
                error = %reason,
                "commit failed, operator attention needed"
            ),
        }

        let mut store = self.lock_store();
        if let Err(e) = store.update_state(&record.to_update()) {
            *unrecorded = Some(record);
            return Err(e);
        }

        if record.state == CommitState::Committed {
            if let Some(cutoff) = self.retention_cutoff(resolved_at) {
                if let Err(e) = store.purge_committed(cutoff) {
                    tracing::warn!(error = %e, "retention purge failed");
                }
            }
        }

        Ok(Step::Dispatched)
    }
}
