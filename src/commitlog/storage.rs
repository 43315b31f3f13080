use crate::commitlog::{LogIndex, LogTerm, PersistingLogEntry};

/// Iterator over persisted entries, in index order.
pub type PersistedLogIterator = Box<dyn Iterator<Item = PersistingLogEntry> + Send>;

pub type StorageResult<T> = Result<T, StorageError>;

/// Monotonic id a storage engine hands out per write. Used to wait for that write to be synced.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(pub u64);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub wait_for_sync: bool,
}

/// Small amount of state stored next to the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogMetadata {
    pub term: LogTerm,
    pub snapshot_available: bool,
}

impl Default for LogMetadata {
    fn default() -> Self {
        LogMetadata {
            term: LogTerm::default(),
            snapshot_available: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Storage engine failure: {0}")]
    Backend(String),

    // An earlier operation in the same queue failed, so this one was never attempted.
    #[error("A preceding storage operation failed")]
    SubsequentFault,

    #[error("Storage handle was released, participant is gone")]
    ParticipantGone,
}

/// PersistedLog is the durable storage a log writes to. It does not need to be thread-safe with
/// respect to ordering: the storage manager guarantees that at most one mutating call is running
/// at a time and that mutations arrive in the order they were enqueued.
///
/// Mutating calls resolve once the engine accepted the write. Durability on disk is only
/// guaranteed once `wait_for_sync` resolved for the returned sequence number, unless the write
/// was issued with `WriteOptions::wait_for_sync`.
#[async_trait::async_trait]
pub trait PersistedLog: Send + Sync {
    /// Appends entries. Indexes must continue the stored log without gap.
    async fn insert(&self, entries: PersistedLogIterator, options: WriteOptions) -> StorageResult<SequenceNumber>;

    /// Removes every entry before `stop`.
    async fn remove_front(&self, stop: LogIndex, options: WriteOptions) -> StorageResult<SequenceNumber>;

    /// Removes `start` and every entry after it.
    async fn remove_back(&self, start: LogIndex, options: WriteOptions) -> StorageResult<SequenceNumber>;

    /// Reads every stored entry with index `>= first`.
    fn read(&self, first: LogIndex) -> StorageResult<PersistedLogIterator>;

    fn read_metadata(&self) -> StorageResult<LogMetadata>;

    fn update_metadata(&self, metadata: LogMetadata) -> StorageResult<()>;

    async fn wait_for_sync(&self, sequence_number: SequenceNumber) -> StorageResult<()>;

    /// Blocks until every write issued so far has completed.
    fn wait_for_completion(&self);

    /// Deletes the whole log.
    fn drop_log(&self) -> StorageResult<()>;

    async fn compact(&self) -> StorageResult<()>;
}
