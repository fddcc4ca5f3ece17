//! # wms-queue
//!
//! why: deliver every accepted inventory commit to the remote service exactly once from the operator's point of view
//! relations: combines wms-storage (durability) with a wms-core InventoryClient (delivery)
//! what: CommitQueue (submit/start/stop), the single-threaded dispatch loop, queue errors

mod dispatch;
pub mod error;
pub mod queue;

pub use error::QueueError;
pub use queue::{CommitQueue, QueueStats};

pub use wms_core::{CommitRecord, CommitState, InventoryClient, Outcome, QueueConfig, RetryPolicy};
pub use wms_storage::{CommitStore, FileStore, InMemoryStore, StorageError};
