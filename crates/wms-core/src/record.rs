//! # record
//!
//! why: the durable unit of work behind every operator commit
//! relations: built by wms-queue on submit, journaled by wms-storage, mutated by the dispatch loop
//! what: NewCommit request + validation, CommitRecord entity and transitions, RecordUpdate

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::Outcome;
use crate::config::RetryPolicy;
use crate::error::ValidationError;
use crate::state::{CommitState, Resolution};

const INTERRUPTED: &str = "interrupted before outcome was recorded";

/// A commit as entered by the operator, before it has an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommit {
    pub device_id: String,
    pub location: String,
    pub delta: i64,
    pub item_id: i64,
}

impl NewCommit {
    pub fn new(
        device_id: impl Into<String>,
        location: impl Into<String>,
        delta: i64,
        item_id: i64,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            location: location.into(),
            delta,
            item_id,
        }
    }

    /// Zero deltas pass through; whether a no-op is useful is the caller's call.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.item_id <= 0 {
            return Err(ValidationError::NonPositiveItemId(self.item_id));
        }
        Ok(())
    }
}

/// A single queued inventory adjustment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Assigned at enqueue time, strictly increasing, never reused
    pub id: u64,
    pub device_id: String,
    pub location: String,
    pub item_id: i64,
    /// Positive adds stock, negative removes it
    pub delta: i64,
    pub created_at: DateTime<Utc>,
    pub state: CommitState,
    /// Delivery attempts started so far
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Earliest time the next attempt may begin
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CommitRecord {
    /// Create a fresh Pending record
    pub fn new(id: u64, commit: NewCommit, now: DateTime<Utc>) -> Self {
        Self {
            id,
            device_id: commit.device_id,
            location: commit.location,
            item_id: commit.item_id,
            delta: commit.delta,
            created_at: now,
            state: CommitState::Pending,
            attempts: 0,
            last_error: None,
            not_before: None,
            updated_at: now,
        }
    }

    /// True once any backoff window has elapsed
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.state.is_unresolved() && self.not_before.map_or(true, |at| at <= now)
    }

    /// Move to InFlight and count the attempt.
    ///
    /// A stale InFlight record (left by a crash or a failed write) may start
    /// again; terminal records may not.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> bool {
        if !self.state.is_unresolved() {
            return false;
        }
        self.state = CommitState::InFlight;
        self.attempts = self.attempts.saturating_add(1);
        self.not_before = None;
        self.updated_at = now;
        true
    }

    /// Record the outcome of the attempt started by `begin_attempt`.
    pub fn resolve(
        &mut self,
        outcome: &Outcome,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Resolution {
        self.updated_at = now;
        self.not_before = None;

        match outcome {
            Outcome::Success => {
                self.state = CommitState::Committed;
                self.last_error = None;
                Resolution::Committed
            }
            Outcome::RetryableFailure(reason) if !policy.is_exhausted(self.attempts) => {
                let not_before = retry_at(now, policy.backoff_for(self.attempts));
                self.state = CommitState::Pending;
                self.last_error = Some(reason.clone());
                self.not_before = Some(not_before);
                Resolution::Retry { not_before }
            }
            Outcome::RetryableFailure(reason) => {
                let reason = format!("gave up after {} attempts: {reason}", self.attempts);
                self.fail(reason)
            }
            Outcome::FatalFailure(reason) => self.fail(reason.clone()),
        }
    }

    fn fail(&mut self, reason: String) -> Resolution {
        self.state = CommitState::Failed;
        self.last_error = Some(reason.clone());
        Resolution::Failed { reason }
    }

    /// Return an InFlight record found at startup to Pending.
    pub fn recover_interrupted(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != CommitState::InFlight {
            return false;
        }
        self.state = CommitState::Pending;
        self.last_error = Some(INTERRUPTED.to_string());
        self.not_before = None;
        self.updated_at = now;
        true
    }

    /// Operator requeue of a Failed record with a fresh retry budget.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != CommitState::Failed {
            return false;
        }
        self.state = CommitState::Pending;
        self.attempts = 0;
        self.not_before = None;
        self.updated_at = now;
        true
    }

    /// Snapshot of the mutable fields, for `CommitStore::update_state`
    pub fn to_update(&self) -> RecordUpdate {
        RecordUpdate {
            id: self.id,
            state: self.state,
            attempts: self.attempts,
            last_error: self.last_error.clone(),
            not_before: self.not_before,
            updated_at: self.updated_at,
        }
    }

    /// Overwrite the mutable fields with `update`
    pub fn apply_update(&mut self, update: &RecordUpdate) {
        self.state = update.state;
        self.attempts = update.attempts;
        self.last_error = update.last_error.clone();
        self.not_before = update.not_before;
        self.updated_at = update.updated_at;
    }
}

/// `now + delay`, clamped to the longest permitted backoff when out of range
fn retry_at(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let capped = chrono::Duration::from_std(Duration::from_millis(RetryPolicy::MAX_BACKOFF_MS))
        .ok()
        .and_then(|cap| now.checked_add_signed(cap));
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .or(capped)
        .unwrap_or(now)
}

/// The mutable part of a record, rewritten as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub id: u64,
    pub state: CommitState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
