use chrono::Utc;
use redb::{Database, DatabaseError, ReadableTable, ReadableTableMetadata, StorageError, TableDefinition};
use rkyv::{AlignedVec, Archive, Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database open error: {0}")]
    RedbCreate(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
}

/// One discovered URL. Created once, flips to completed once.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct UrlRecord {
    /// Normalized form; the table key is its xxh3-128 hash.
    pub url: String,
    pub completed: bool,
    pub discovered_at: i64,
    pub completed_at: Option<i64>,
}

impl UrlRecord {
    pub fn pending(url: String) -> Self {
        Self {
            url,
            completed: false,
            discovered_at: Utc::now().timestamp(),
            completed_at: None,
        }
    }

    fn complete(&mut self) {
        self.completed = true;
        self.completed_at = Some(Utc::now().timestamp());
    }

    fn encode(&self) -> Result<AlignedVec, LedgerError> {
        rkyv::to_bytes::<_, 256>(self)
            .map_err(|e| LedgerError::Serialization(format!("Serialize failed: {}", e)))
    }

    fn decode(bytes: &[u8]) -> Result<Self, LedgerError> {
        let mut aligned = AlignedVec::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<UrlRecord>(&aligned)
            .map_err(|e| LedgerError::Serialization(format!("Deserialize failed: {}", e)))
    }
}

/// Result of [`Ledger::mark_complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Completed,
    AlreadyCompleted,
    /// No record existed; one was written in the completed state.
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct LedgerStats {
    pub total: u64,
    pub completed: u64,
    pub pending: u64,
}

/// Failures that mean the file holds no usable database.
fn is_corrupt(error: &DatabaseError) -> bool {
    match error {
        DatabaseError::Storage(StorageError::Corrupted(_)) => true,
        DatabaseError::Storage(StorageError::Io(e)) => {
            matches!(e.kind(), ErrorKind::InvalidData | ErrorKind::UnexpectedEof)
        }
        _ => false,
    }
}

const RECORDS: TableDefinition<u128, &[u8]> = TableDefinition::new("url_records");

/// Durable `urlHash -> UrlRecord` map. Every mutation commits before returning.
pub struct Ledger {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").field("path", &self.path).finish()
    }
}

impl Ledger {
    /// Open or create the ledger at `path`.
    ///
    /// `fresh` deletes any existing file first. A file that is not a valid
    /// database is logged, removed and recreated empty, so the caller falls
    /// back to seeding. A ledger locked by another handle, or one that cannot
    /// be read for I/O or permission reasons, is an error and stays untouched.
    pub fn open<P: AsRef<Path>>(path: P, fresh: bool) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if fresh && path.exists() {
            info!("Restart requested, removing ledger {}", path.display());
            std::fs::remove_file(&path)?;
        }

        let db = match Database::create(&path) {
            Ok(db) => db,
            Err(e) if is_corrupt(&e) => {
                warn!("Ledger {} unreadable ({}), starting from an empty ledger", path.display(), e);
                std::fs::remove_file(&path)?;
                Database::create(&path)?
            }
            Err(e) => return Err(e.into()),
        };

        let write_txn = db.begin_write()?;
        {
            let _records = write_txn.open_table(RECORDS)?;
        }
        write_txn.commit()?;

        Ok(Self { db, path })
    }

    /// Open an existing ledger for inspection. Never creates, deletes or
    /// replaces the file.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::open(&path)?;
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, hash: u128) -> Result<Option<UrlRecord>, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        match table.get(hash)? {
            Some(bytes) => Ok(Some(UrlRecord::decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, hash: u128) -> Result<bool, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        Ok(table.get(hash)?.is_some())
    }

    /// Insert a pending record. Returns false when the hash is already known.
    pub fn insert_if_absent(&self, hash: u128, url: &str) -> Result<bool, LedgerError> {
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(RECORDS)?;
            if table.get(hash)?.is_some() {
                false
            } else {
                let bytes = UrlRecord::pending(url.to_string()).encode()?;
                table.insert(hash, bytes.as_slice())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(inserted)
    }

    pub fn mark_complete(&self, hash: u128, url: &str) -> Result<MarkOutcome, LedgerError> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(RECORDS)?;
            let existing = match table.get(hash)? {
                Some(bytes) => Some(UrlRecord::decode(bytes.value())?),
                None => None,
            };

            let (mut record, outcome) = match existing {
                Some(record) if record.completed => (record, MarkOutcome::AlreadyCompleted),
                Some(record) => (record, MarkOutcome::Completed),
                None => (UrlRecord::pending(url.to_string()), MarkOutcome::Unknown),
            };

            if outcome != MarkOutcome::AlreadyCompleted {
                record.complete();
                let bytes = record.encode()?;
                table.insert(hash, bytes.as_slice())?;
            }
            outcome
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Every record still waiting to be crawled, in key order.
    ///
    /// Records that fail validation are skipped with a warning.
    pub fn pending_records(&self) -> Result<Vec<(u128, UrlRecord)>, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;

        let mut pending = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            match UrlRecord::decode(value.value()) {
                Ok(record) if !record.completed => pending.push((key.value(), record)),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable ledger record {:032x}: {}", key.value(), e),
            }
        }
        Ok(pending)
    }

    pub fn len(&self) -> Result<u64, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;

        let mut stats = LedgerStats::default();
        for entry in table.iter()? {
            let (_, value) = entry?;
            stats.total += 1;
            match UrlRecord::decode(value.value()) {
                Ok(record) if record.completed => stats.completed += 1,
                _ => stats.pending += 1,
            }
        }
        Ok(stats)
    }
}
