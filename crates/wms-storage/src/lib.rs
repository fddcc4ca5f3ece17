//! # wms-storage
//!
//! why: keep every accepted commit on disk until the inventory service has it, across crashes and restarts
//! relations: stores wms-core records, owned by the wms-queue dispatcher
//! what: CommitStore trait, FileStore implementation, InMemoryStore for testing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use wms_core::{CommitRecord, CommitState, RecordUpdate};

const JOURNAL_FILE: &str = "commits.json";
const TEMP_FILE: &str = "commits.tmp";
const JOURNAL_VERSION: u32 = 1;

/// errors raised by a commit store
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("commit journal {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode commit journal: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("no commit with id {0}")]
    UnknownRecord(u64),
    #[error("commit id {0} is not above the last assigned id")]
    DuplicateId(u64),
}

/// trait for durable storage of commit records
///
/// this abstraction allows the same queue code to work with:
/// - real filesystem (FileStore)
/// - in-memory (testing)
pub trait CommitStore: Send {
    /// persist a new record; its id must be above `last_id()`
    fn append(&mut self, record: &CommitRecord) -> Result<(), StorageError>;

    /// every record not yet committed, ascending id
    fn load_all(&self) -> Result<Vec<CommitRecord>, StorageError>;

    /// every retained record including committed ones, ascending id
    fn load_history(&self) -> Result<Vec<CommitRecord>, StorageError>;

    /// look up a single record in any state
    fn get(&self, id: u64) -> Result<Option<CommitRecord>, StorageError>;

    /// number of records still awaiting delivery (Pending or InFlight)
    fn unresolved_count(&self) -> Result<usize, StorageError> {
        Ok(self
            .load_all()?
            .iter()
            .filter(|r| r.state.is_unresolved())
            .count())
    }

    /// rewrite the mutable fields of one record as a single unit
    fn update_state(&mut self, update: &RecordUpdate) -> Result<(), StorageError>;

    /// drop committed records last touched before `older_than`, returning how many went
    fn purge_committed(&mut self, older_than: DateTime<Utc>) -> Result<usize, StorageError>;

    /// highest id ever appended, including purged records
    fn last_id(&self) -> u64;
}

// -- journal document --

/// the whole persisted state, rewritten atomically on every mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Journal {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    last_id: u64,
    #[serde(default)]
    records: Vec<CommitRecord>,
}

fn default_version() -> u32 {
    JOURNAL_VERSION
}

impl Default for Journal {
    fn default() -> Self {
        Self {
            version: JOURNAL_VERSION,
            last_id: 0,
            records: Vec::new(),
        }
    }
}

impl Journal {
    /// restore ordering and the id high-water mark after decoding
    fn normalize(mut self) -> Self {
        self.records.sort_by_key(|r| r.id);
        if let Some(max) = self.records.last().map(|r| r.id) {
            self.last_id = self.last_id.max(max);
        }
        self
    }

    fn append(&mut self, record: &CommitRecord) -> Result<(), StorageError> {
        if record.id <= self.last_id {
            return Err(StorageError::DuplicateId(record.id));
        }
        self.last_id = record.id;
        self.records.push(record.clone());
        Ok(())
    }

    fn outstanding(&self) -> Vec<CommitRecord> {
        self.records
            .iter()
            .filter(|r| r.state != CommitState::Committed)
            .cloned()
            .collect()
    }

    fn unresolved_count(&self) -> usize {
        self.records.iter().filter(|r| r.state.is_unresolved()).count()
    }

    fn get(&self, id: u64) -> Option<&CommitRecord> {
        self.records
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|idx| &self.records[idx])
    }

    fn update(&mut self, update: &RecordUpdate) -> Result<(), StorageError> {
        let idx = self
            .records
            .binary_search_by_key(&update.id, |r| r.id)
            .map_err(|_| StorageError::UnknownRecord(update.id))?;
        self.records[idx].apply_update(update);
        Ok(())
    }

    fn purge(&mut self, older_than: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !expired(r, older_than));
        before - self.records.len()
    }

    fn has_expired(&self, older_than: DateTime<Utc>) -> bool {
        self.records.iter().any(|r| expired(r, older_than))
    }
}

fn expired(record: &CommitRecord, older_than: DateTime<Utc>) -> bool {
    record.state == CommitState::Committed && record.updated_at < older_than
}

// -- file storage implementation --

/// file-based storage implementation using std::fs
///
/// stores the journal in a directory as:
/// - commits.json: last assigned id and every retained record
/// - commits.tmp: scratch file for atomic replacement
///
/// the decoded journal is cached; the cache only changes after the
/// replacement file is durably in place
pub struct FileStore {
    /// directory path for storing state files
    dir: PathBuf,
    journal: Journal,
}

impl FileStore {
    /// open (or create) the store in the given directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let temp_path = dir.join(TEMP_FILE);
        if temp_path.exists() {
            // a crash between write and rename; the live journal is still intact
            tracing::warn!(path = %temp_path.display(), "discarding partial journal write");
            fs::remove_file(&temp_path)?;
        }

        let journal = Self::read_journal(&dir.join(JOURNAL_FILE))?;
        tracing::debug!(
            dir = %dir.display(),
            records = journal.records.len(),
            last_id = journal.last_id,
            "opened commit journal"
        );

        Ok(Self { dir, journal })
    }

    /// directory holding the journal
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// get the path to the journal file
    fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    fn read_journal(path: &Path) -> Result<Journal, StorageError> {
        let contents = match fs::read(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Journal::default()),
            Err(e) => return Err(e.into()),
        };

        let journal: Journal =
            serde_json::from_slice(&contents).map_err(|source| StorageError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(journal.normalize())
    }

    /// atomic write: write to temp file, fsync, then rename over the journal
    fn write_journal(&self, journal: &Journal) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(journal).map_err(StorageError::Encode)?;

        let temp_path = self.dir.join(TEMP_FILE);
        let mut file = File::create(&temp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&temp_path, self.journal_path())?;
        sync_dir(&self.dir)?;

        Ok(())
    }

    /// apply `mutate` to a copy of the journal and persist it before adopting it
    fn commit<T>(
        &mut self,
        mutate: impl FnOnce(&mut Journal) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut next = self.journal.clone();
        let out = mutate(&mut next)?;
        self.write_journal(&next)?;
        self.journal = next;
        Ok(out)
    }
}

/// make the rename itself durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

impl CommitStore for FileStore {
    fn append(&mut self, record: &CommitRecord) -> Result<(), StorageError> {
        self.commit(|journal| journal.append(record))
    }

    fn load_all(&self) -> Result<Vec<CommitRecord>, StorageError> {
        Ok(self.journal.outstanding())
    }

    fn load_history(&self) -> Result<Vec<CommitRecord>, StorageError> {
        Ok(self.journal.records.clone())
    }

    fn get(&self, id: u64) -> Result<Option<CommitRecord>, StorageError> {
        Ok(self.journal.get(id).cloned())
    }

    fn unresolved_count(&self) -> Result<usize, StorageError> {
        Ok(self.journal.unresolved_count())
    }

    fn update_state(&mut self, update: &RecordUpdate) -> Result<(), StorageError> {
        self.commit(|journal| journal.update(update))
    }

    fn purge_committed(&mut self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        // nothing due: skip the copy and the rewrite
        if !self.journal.has_expired(older_than) {
            return Ok(0);
        }
        self.commit(|journal| Ok(journal.purge(older_than)))
    }

    fn last_id(&self) -> u64 {
        self.journal.last_id
    }
}

// -- in-memory storage implementation --

/// in-memory storage for testing
///
/// stores all state in memory, no persistence across restarts
#[derive(Default)]
pub struct InMemoryStore {
    journal: Journal,
}

impl InMemoryStore {
    /// create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommitStore for InMemoryStore {
    fn append(&mut self, record: &CommitRecord) -> Result<(), StorageError> {
        self.journal.append(record)
    }

    fn load_all(&self) -> Result<Vec<CommitRecord>, StorageError> {
        Ok(self.journal.outstanding())
    }

    fn load_history(&self) -> Result<Vec<CommitRecord>, StorageError> {
        Ok(self.journal.records.clone())
    }

    fn get(&self, id: u64) -> Result<Option<CommitRecord>, StorageError> {
        Ok(self.journal.get(id).cloned())
    }

    fn unresolved_count(&self) -> Result<usize, StorageError> {
        Ok(self.journal.unresolved_count())
    }

    fn update_state(&mut self, update: &RecordUpdate) -> Result<(), StorageError> {
        self.journal.update(update)
    }

    fn purge_committed(&mut self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        Ok(self.journal.purge(older_than))
    }

    fn last_id(&self) -> u64 {
        self.journal.last_id
    }
}
