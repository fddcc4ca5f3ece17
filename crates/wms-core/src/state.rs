//! # state
//!
//! why: define the lifecycle a commit moves through between the operator and the inventory service
//! relations: embedded in record.rs, persisted by wms-storage, advanced by the wms-queue dispatcher
//! what: CommitState enum, Resolution of a single delivery attempt

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four states a commit can be in
///
/// Pending -> InFlight -> {Committed | Pending (retry) | Failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    /// Waiting for delivery, possibly inside a backoff window
    Pending,
    /// A delivery attempt has started and its outcome is not yet recorded
    InFlight,
    /// Accepted by the inventory service
    Committed,
    /// Gave up: fatal rejection or retry budget exhausted
    Failed,
}

impl Default for CommitState {
    fn default() -> Self {
        Self::Pending
    }
}

impl CommitState {
    /// Committed and Failed never transition on their own
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }

    /// States the dispatcher still has to deliver
    pub fn is_unresolved(self) -> bool {
        matches!(self, Self::Pending | Self::InFlight)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CommitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finished delivery attempt did to a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The service applied the adjustment
    Committed,
    /// Transient failure; the record waits until `not_before` before the next attempt
    Retry { not_before: DateTime<Utc> },
    /// Terminal failure, kept for operator inspection
    Failed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_pending() {
        assert_eq!(CommitState::default(), CommitState::Pending);
    }

    #[test]
    fn terminal_and_unresolved_partition_states() {
        for state in [
            CommitState::Pending,
            CommitState::InFlight,
            CommitState::Committed,
            CommitState::Failed,
        ] {
            assert_ne!(state.is_terminal(), state.is_unresolved(), "{state}");
        }
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&CommitState::InFlight).unwrap();
        assert_eq!(json, "\"in_flight\"");
    }
}
