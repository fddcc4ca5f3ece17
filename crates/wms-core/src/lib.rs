//! # wms-core
//!
//! why: describe pending inventory commits and the rules they move through, independent of disk or network
//! relations: persisted by wms-storage, driven by the dispatch loop in wms-queue
//! what: CommitRecord data model, lifecycle transitions, InventoryClient contract, retry configuration

pub mod client;
pub mod config;
pub mod error;
pub mod record;
pub mod state;

pub use client::{InventoryClient, Outcome};
pub use config::{QueueConfig, RetryPolicy};
pub use error::{ConfigError, ValidationError};
pub use record::{CommitRecord, NewCommit, RecordUpdate};
pub use state::{CommitState, Resolution};
