//! # error
//!
//! why: reject malformed input before anything is queued
//! relations: returned by record.rs validation and config.rs loading, wrapped by wms-queue
//! what: ValidationError, ConfigError

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A commit request that can never be delivered, rejected before it is queued
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("item id must be positive, got {0}")]
    NonPositiveItemId(i64),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}
