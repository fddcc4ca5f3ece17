//! # comprehensive core tests
//!
//! why: verify the commit lifecycle rules hold without any disk or network involved
//! relations: tests wms-core crate
//! what: lifecycle transitions, retry budget, backoff curve, config loading, outcome classification

use std::time::Duration;

use chrono::Utc;
use wms_core::{
    CommitRecord, CommitState, ConfigError, NewCommit, Outcome, QueueConfig, Resolution,
    RetryPolicy,
};

fn record(id: u64, delta: i64, item_id: i64) -> CommitRecord {
    CommitRecord::new(id, NewCommit::new("T1", "A12", delta, item_id), Utc::now())
}

// =============================================================================
// SECTION 1: LIFECYCLE TESTS
// =============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn new_record_copies_request_fields() {
        let r = record(7, -3, 42);
        assert_eq!(r.id, 7);
        assert_eq!(r.device_id, "T1");
        assert_eq!(r.location, "A12");
        assert_eq!(r.delta, -3);
        assert_eq!(r.item_id, 42);
        assert_eq!(r.created_at, r.updated_at);
    }

    #[test]
    fn success_on_nth_attempt_counts_every_attempt() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let mut r = record(1, -3, 7);

        for _ in 0..2 {
            r.begin_attempt(now);
            r.resolve(&Outcome::retryable("connection refused"), &policy, now);
            assert_eq!(r.state, CommitState::Pending);
        }
        r.begin_attempt(now);
        let resolution = r.resolve(&Outcome::Success, &policy, now);

        assert_eq!(resolution, Resolution::Committed);
        assert_eq!(r.state, CommitState::Committed);
        assert_eq!(r.attempts, 3);
    }

    #[test]
    fn fatal_failure_on_first_attempt() {
        let now = Utc::now();
        let mut r = record(1, 5, 42);
        r.begin_attempt(now);
        let resolution = r.resolve(&Outcome::fatal("unknown location"), &RetryPolicy::default(), now);

        assert_eq!(
            resolution,
            Resolution::Failed { reason: "unknown location".into() }
        );
        assert_eq!(r.state, CommitState::Failed);
        assert_eq!(r.attempts, 1);
    }

    #[test]
    fn always_retryable_fails_at_ceiling() {
        let policy = RetryPolicy { max_attempts: 5, ..RetryPolicy::default() };
        let now = Utc::now();
        let mut r = record(1, 5, 42);

        while r.begin_attempt(now) {
            r.resolve(&Outcome::retryable("503"), &policy, now);
        }

        assert_eq!(r.state, CommitState::Failed);
        assert_eq!(r.attempts, 5);
        assert!(r.last_error.as_deref().unwrap().contains("gave up after 5 attempts"));
    }

    #[test]
    fn committed_record_cannot_start_again() {
        let now = Utc::now();
        let mut r = record(1, 5, 42);
        r.begin_attempt(now);
        r.resolve(&Outcome::Success, &RetryPolicy::default(), now);

        assert!(!r.begin_attempt(now));
        assert_eq!(r.attempts, 1);
    }

    #[test]
    fn interrupted_attempt_returns_to_pending() {
        let now = Utc::now();
        let mut r = record(1, 5, 42);
        r.begin_attempt(now);

        assert!(r.recover_interrupted(now));
        assert_eq!(r.state, CommitState::Pending);
        assert_eq!(r.attempts, 1);
        assert!(r.last_error.is_some());
        assert!(!r.recover_interrupted(now));
    }

    #[test]
    fn update_round_trips_mutable_fields() {
        let now = Utc::now();
        let mut source = record(1, 5, 42);
        source.begin_attempt(now);
        source.resolve(&Outcome::retryable("timeout"), &RetryPolicy::default(), now);

        let mut target = record(1, 5, 42);
        target.apply_update(&source.to_update());
        assert_eq!(target, CommitRecord { created_at: target.created_at, ..source });
    }
}

// =============================================================================
// SECTION 2: RETRY POLICY TESTS
// =============================================================================

mod retry_policy {
    use super::*;

    #[test]
    fn default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 8);
        assert_eq!(policy.initial_backoff_ms, 1_000);
        assert_eq!(policy.max_backoff_ms, 60_000);
        assert_eq!(policy.multiplier, 2);
    }

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            multiplier: 3,
        };
        let delays: Vec<Duration> = (1..=6).map(|a| policy.backoff_for(a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(300),
                Duration::from_millis(900),
                Duration::from_millis(1_000),
                Duration::from_millis(1_000),
                Duration::from_millis(1_000),
            ]
        );
    }

    #[test]
    fn multiplier_of_zero_behaves_as_constant() {
        let policy = RetryPolicy { multiplier: 0, ..RetryPolicy::default() };
        assert_eq!(policy.backoff_for(5), Duration::from_secs(1));
    }
}

// =============================================================================
// SECTION 3: CONFIG TESTS
// =============================================================================

mod config {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn default_config_values() {
        let config = QueueConfig::default();
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.max_unresolved, None);
        assert_eq!(config.committed_retention(), Duration::from_secs(86_400));
        assert_eq!(config.storage_retry(), Duration::from_secs(1));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(
            &path,
            r#"{ "data_dir": "/var/lib/wms", "retry": { "max_attempts": 3 } }"#,
        )
        .unwrap();

        let config = QueueConfig::from_json_file(&path).unwrap();
        assert_eq!(config.data_dir, std::path::PathBuf::from("/var/lib/wms"));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_backoff_ms, 1_000);
        assert_eq!(config.committed_retention_secs, 86_400);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = QueueConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(&path, "{ not json").unwrap();

        let err = QueueConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn inverted_backoff_bounds_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(
            &path,
            r#"{ "retry": { "initial_backoff_ms": 5000, "max_backoff_ms": 10 } }"#,
        )
        .unwrap();

        let err = QueueConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_depth_limit_is_rejected() {
        let config = QueueConfig { max_unresolved: Some(0), ..QueueConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_beyond_one_day_is_rejected_at_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(
            &path,
            r#"{ "retry": { "initial_backoff_ms": 10000000000000000, "max_backoff_ms": 10000000000000000 } }"#,
        )
        .unwrap();

        let err = QueueConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn backoff_at_the_limit_resolves_one_day_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(
            &path,
            r#"{ "retry": { "initial_backoff_ms": 86400000, "max_backoff_ms": 86400000 } }"#,
        )
        .unwrap();
        let config = QueueConfig::from_json_file(&path).unwrap();

        let now = Utc::now();
        let mut record = record(1, 5, 42);
        record.begin_attempt(now);
        let resolution = record.resolve(&Outcome::retryable("503"), &config.retry, now);
        assert_eq!(
            resolution,
            Resolution::Retry { not_before: now + chrono::Duration::days(1) }
        );
    }

    #[test]
    fn offline_retry_defaults_and_loads() {
        assert_eq!(QueueConfig::default().offline_retry(), Duration::from_secs(5));

        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(&path, r#"{ "offline_retry_ms": 250 }"#).unwrap();
        let config = QueueConfig::from_json_file(&path).unwrap();
        assert_eq!(config.offline_retry(), Duration::from_millis(250));
    }
}
