use crate::commitlog::{
    LogIndex, LogMetadata, PersistedLog, PersistedLogIterator, PersistingLogEntry, SequenceNumber, StorageError,
    StorageResult, WriteOptions,
};
use parking_lot::Mutex;
use std::collections::VecDeque;

// Keeps everything in memory. Writes are "synced" as soon as they are applied, so it is mostly
// useful for tests and for logs that don't need to survive a restart.
pub struct InMemoryPersistedLog {
    inner: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    entries: VecDeque<PersistingLogEntry>,
    metadata: LogMetadata,
    next_sequence_number: u64,
    dropped: bool,
}

impl InMemoryState {
    fn next_sequence_number(&mut self) -> SequenceNumber {
        self.next_sequence_number += 1;
        SequenceNumber(self.next_sequence_number)
    }

    fn check_not_dropped(&self) -> StorageResult<()> {
        if self.dropped {
            return Err(StorageError::Backend("Log was dropped".into()));
        }
        Ok(())
    }

    fn first_index(&self) -> Option<LogIndex> {
        self.entries.front().map(|entry| entry.index())
    }
}

impl InMemoryPersistedLog {
    pub fn new() -> Self {
        InMemoryPersistedLog {
            inner: Mutex::new(InMemoryState::default()),
        }
    }

    /// Creates a log already holding `entries`.
    pub fn with_entries(entries: Vec<PersistingLogEntry>, metadata: LogMetadata) -> Self {
        let log = InMemoryPersistedLog::new();
        {
            let mut inner = log.inner.lock();
            for entry in entries {
                Self::push_entry(&mut inner, entry);
            }
            inner.metadata = metadata;
        }
        log
    }

    /// Copy of everything stored, for inspection.
    pub fn entries(&self) -> Vec<PersistingLogEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    fn push_entry(inner: &mut InMemoryState, entry: PersistingLogEntry) {
        if let Some(last) = inner.entries.back() {
            assert_eq!(
                last.index().plus(1),
                entry.index(),
                "Inserted entry does not continue the log. Last entry {:?}, inserted {:?}",
                last.term_index_pair(),
                entry.term_index_pair(),
            );
        }
        inner.entries.push_back(entry);
    }
}

impl Default for InMemoryPersistedLog {
    fn default() -> Self {
        InMemoryPersistedLog::new()
    }
}

#[async_trait::async_trait]
impl PersistedLog for InMemoryPersistedLog {
    async fn insert(&self, entries: PersistedLogIterator, _options: WriteOptions) -> StorageResult<SequenceNumber> {
        let mut inner = self.inner.lock();
        inner.check_not_dropped()?;
        for entry in entries {
            Self::push_entry(&mut inner, entry);
        }
        Ok(inner.next_sequence_number())
    }

    async fn remove_front(&self, stop: LogIndex, _options: WriteOptions) -> StorageResult<SequenceNumber> {
        let mut inner = self.inner.lock();
        inner.check_not_dropped()?;
        while matches!(inner.first_index(), Some(first) if first < stop) {
            inner.entries.pop_front();
        }
        Ok(inner.next_sequence_number())
    }

    async fn remove_back(&self, start: LogIndex, _options: WriteOptions) -> StorageResult<SequenceNumber> {
        let mut inner = self.inner.lock();
        inner.check_not_dropped()?;
        while matches!(inner.entries.back(), Some(last) if last.index() >= start) {
            inner.entries.pop_back();
        }
        Ok(inner.next_sequence_number())
    }

    fn read(&self, first: LogIndex) -> StorageResult<PersistedLogIterator> {
        let inner = self.inner.lock();
        inner.check_not_dropped()?;
        let entries: Vec<_> = inner
            .entries
            .iter()
            .filter(|entry| entry.index() >= first)
            .cloned()
            .collect();
        Ok(Box::new(entries.into_iter()))
    }

    fn read_metadata(&self) -> StorageResult<LogMetadata> {
        let inner = self.inner.lock();
        inner.check_not_dropped()?;
        Ok(inner.metadata.clone())
    }

    fn update_metadata(&self, metadata: LogMetadata) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.check_not_dropped()?;
        inner.metadata = metadata;
        Ok(())
    }

    async fn wait_for_sync(&self, _sequence_number: SequenceNumber) -> StorageResult<()> {
        Ok(())
    }

    fn wait_for_completion(&self) {}

    fn drop_log(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.dropped = true;
        Ok(())
    }

    async fn compact(&self) -> StorageResult<()> {
        self.inner.lock().entries.shrink_to_fit();
        Ok(())
    }
}
