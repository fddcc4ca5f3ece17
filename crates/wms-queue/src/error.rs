//! # error
//!
//! why: report synchronous failures to the caller; delivery failures never come through here
//! relations: returned by queue.rs operations
//! what: QueueError

use std::io;

use thiserror::Error;
use wms_core::{CommitState, ConfigError, ValidationError};
use wms_storage::StorageError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid commit: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("commit queue is full ({limit} unresolved commits)")]
    QueueFull { limit: usize },
    #[error("commit {id} is {state}, only failed commits can be requeued")]
    NotFailed { id: u64, state: CommitState },
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[source] io::Error),
}
