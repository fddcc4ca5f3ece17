//! # client
//!
//! why: narrow contract between the commit queue and whatever talks to the remote inventory service
//! relations: implemented by the REST wrapper outside this workspace, called by the wms-queue dispatcher
//! what: InventoryClient trait, Outcome classification

use std::sync::Arc;

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The adjustment was applied
    Success,
    /// Timeout, refused connection, 5xx: worth trying again later
    RetryableFailure(String),
    /// Rejected payload, unknown item or location: retrying cannot help
    FatalFailure(String),
}

impl Outcome {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::RetryableFailure(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::FatalFailure(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Failure reason, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::RetryableFailure(reason) | Self::FatalFailure(reason) => Some(reason),
        }
    }

    /// Classify an HTTP response status from the inventory REST endpoint.
    ///
    /// 2xx succeeds. 408 and 429 are transient even though they are 4xx.
    /// Any other 4xx is a validation failure. 5xx and unexpected codes are retried.
    pub fn from_http_status(status: u16, detail: &str) -> Self {
        let reason = if detail.is_empty() {
            format!("API error: {status}")
        } else {
            format!("API error: {status}: {detail}")
        };

        match status {
            200..=299 => Self::Success,
            408 | 429 => Self::RetryableFailure(reason),
            400..=499 => Self::FatalFailure(reason),
            _ => Self::RetryableFailure(reason),
        }
    }
}

/// Delivers a single commit to the inventory service.
///
/// Implementations must return within a bounded time (their own request
/// timeout); the dispatcher holds its only delivery slot for the whole call.
pub trait InventoryClient: Send + Sync {
    fn submit(&self, device_id: &str, location: &str, delta: i64, item_id: i64) -> Outcome;

    /// Cheap probe of whether the service can be reached at all.
    ///
    /// While this returns false the dispatcher holds off and no attempt is
    /// counted against any record. Clients without a probe are always reachable.
    fn is_reachable(&self) -> bool {
        true
    }
}

impl<T: InventoryClient + ?Sized> InventoryClient for Arc<T> {
    fn submit(&self, device_id: &str, location: &str, delta: i64, item_id: i64) -> Outcome {
        (**self).submit(device_id, location, delta, item_id)
    }

    fn is_reachable(&self) -> bool {
        (**self).is_reachable()
    }
}

impl<T: InventoryClient + ?Sized> InventoryClient for Box<T> {
    fn submit(&self, device_id: &str, location: &str, delta: i64, item_id: i64) -> Outcome {
        (**self).submit(device_id, location, delta, item_id)
    }

    fn is_reachable(&self) -> bool {
        (**self).is_reachable()
    }
}
