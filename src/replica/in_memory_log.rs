use crate::commitlog::{LogIndex, LogRange, PersistingLogEntry, TermIndexMapping, TermIndexPair};
use std::sync::Arc;
use std::time::Instant;

/// InMemoryLogEntry is what the leader keeps for every entry of its spearhead. It is cheap to
/// clone, the underlying entry is shared.
#[derive(Clone, Debug)]
pub struct InMemoryLogEntry {
    entry: Arc<PersistingLogEntry>,
    insert_tp: Instant,
    wait_for_sync: bool,
}

impl InMemoryLogEntry {
    pub fn new(entry: PersistingLogEntry, wait_for_sync: bool) -> Self {
        InMemoryLogEntry {
            entry: Arc::new(entry),
            insert_tp: Instant::now(),
            wait_for_sync,
        }
    }

    pub fn entry(&self) -> &PersistingLogEntry {
        &self.entry
    }

    pub fn term_index_pair(&self) -> TermIndexPair {
        self.entry.term_index_pair()
    }

    pub fn insert_tp(&self) -> Instant {
        self.insert_tp
    }

    pub fn wait_for_sync(&self) -> bool {
        self.wait_for_sync
    }
}

const SEGMENT_CAPACITY: usize = 128;

type Segment = Arc<Vec<InMemoryLogEntry>>;

/// InMemoryLog is an immutable-by-default sequence of contiguous entries.
///
/// Entries live in fixed-size segments behind `Arc`s, so cloning, slicing and releasing a log
/// share entries with the original instead of copying them. Appending only copies the last
/// segment, and only if it is shared with another instance.
///
/// The log also remembers the entry right before its first one (`(0, 0)` for a log that was
/// never compacted). That is what a follower that is fully caught up to the first entry has to
/// be probed with.
#[derive(Clone, Debug)]
pub struct InMemoryLog {
    segments: Vec<Segment>,
    // Position of the first entry within `segments[0]`.
    offset: usize,
    len: usize,
    first_index: LogIndex,
    before_first: TermIndexPair,
}

impl InMemoryLog {
    /// An empty log whose first appended entry must have `first_index`.
    pub fn new(first_index: LogIndex) -> Self {
        assert!(first_index > LogIndex::zero(), "Index 0 is reserved");
        InMemoryLog {
            segments: Vec::new(),
            offset: 0,
            len: 0,
            first_index,
            before_first: TermIndexPair::new(Default::default(), first_index.saturating_minus(1)),
        }
    }

    /// Builds a log from entries read out of durable storage. An empty iterator yields an empty
    /// log starting at index 1.
    pub fn load<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = PersistingLogEntry>,
    {
        let mut entries = entries.into_iter().peekable();
        let first_index = entries
            .peek()
            .map(|entry| entry.index())
            .unwrap_or_else(LogIndex::start_index);
        let mut log = InMemoryLog::new(first_index);
        for entry in entries {
            log.append_in_place(InMemoryLogEntry::new(entry, false));
        }
        log
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn first_index(&self) -> LogIndex {
        self.first_index
    }

    pub fn next_index(&self) -> LogIndex {
        self.first_index.plus(self.len as u64)
    }

    /// Last entry, or the entry right before the log if it is empty.
    pub fn last_term_index_pair(&self) -> TermIndexPair {
        match self.len.checked_sub(1) {
            Some(last) => self.entry_at(last).term_index_pair(),
            None => self.before_first,
        }
    }

    pub fn last_index(&self) -> LogIndex {
        self.last_term_index_pair().index
    }

    pub fn before_first(&self) -> TermIndexPair {
        self.before_first
    }

    pub fn entry_by_index(&self, index: LogIndex) -> Option<&InMemoryLogEntry> {
        if index < self.first_index || index >= self.next_index() {
            return None;
        }
        Some(self.entry_at(index.distance_from(self.first_index) as usize))
    }

    /// The term index pair at `index`, including the entry right before the log.
    pub fn term_index_pair_of(&self, index: LogIndex) -> Option<TermIndexPair> {
        if index == self.before_first.index {
            return Some(self.before_first);
        }
        self.entry_by_index(index).map(|entry| entry.term_index_pair())
    }

    fn entry_at(&self, position: usize) -> &InMemoryLogEntry {
        let absolute = self.offset + position;
        &self.segments[absolute / SEGMENT_CAPACITY][absolute % SEGMENT_CAPACITY]
    }

    /// Appends without copying the log. Panics if `entry` does not have the next index.
    pub fn append_in_place(&mut self, entry: InMemoryLogEntry) {
        assert_eq!(
            entry.term_index_pair().index,
            self.next_index(),
            "Appended entry must directly follow the last entry {:?}",
            self.last_term_index_pair(),
        );
        assert!(
            entry.term_index_pair().term >= self.last_term_index_pair().term,
            "Appended entry {:?} has a lower term than the last entry {:?}",
            entry.term_index_pair(),
            self.last_term_index_pair(),
        );

        let end = self.offset + self.len;
        if end % SEGMENT_CAPACITY == 0 && end / SEGMENT_CAPACITY == self.segments.len() {
            let mut segment = Vec::with_capacity(SEGMENT_CAPACITY);
            segment.push(entry);
            self.segments.push(Arc::new(segment));
        } else {
            let segment = Arc::make_mut(&mut self.segments[end / SEGMENT_CAPACITY]);
            // A shared segment may hold entries past our end that belong to another instance.
            segment.truncate(end % SEGMENT_CAPACITY);
            segment.push(entry);
        }
        self.len += 1;
    }

    /// Returns a new log with `entries` appended.
    pub fn append<I>(&self, entries: I) -> Self
    where
        I: IntoIterator<Item = InMemoryLogEntry>,
    {
        let mut log = self.clone();
        for entry in entries {
            log.append_in_place(entry);
        }
        log
    }

    /// Entries in `[range.from, range.to)` clamped to what this log holds. The result shares
    /// storage with `self`.
    pub fn slice(&self, range: LogRange) -> Self {
        let range = range.intersect(LogRange::new(self.first_index, self.next_index()));
        if range.is_empty() {
            let first_index = range.from.max(self.first_index).min(self.next_index());
            let mut empty = InMemoryLog::new(first_index);
            empty.before_first = self
                .term_index_pair_of(first_index.saturating_minus(1))
                .unwrap_or(empty.before_first);
            return empty;
        }

        let start = self.offset + range.from.distance_from(self.first_index) as usize;
        let len = range.count() as usize;
        let first_segment = start / SEGMENT_CAPACITY;
        let last_segment = (start + len - 1) / SEGMENT_CAPACITY;
        let before_first = self
            .term_index_pair_of(range.from.saturating_minus(1))
            .unwrap_or(self.before_first);

        InMemoryLog {
            segments: self.segments[first_segment..=last_segment].to_vec(),
            offset: start % SEGMENT_CAPACITY,
            len,
            first_index: range.from,
            before_first,
        }
    }

    /// Drops every entry before `stop`.
    pub fn release(&self, stop: LogIndex) -> Self {
        if stop <= self.first_index {
            return self.clone();
        }
        self.slice(LogRange::new(stop, self.next_index().max(stop)))
    }

    /// Iterates over the entries with index `>= first`. The iterator owns a snapshot, so the
    /// log itself can change while it is in use.
    pub fn iter_from(&self, first: LogIndex) -> InMemoryLogIterator {
        InMemoryLogIterator {
            log: self.slice(LogRange::new(first.min(self.next_index()), self.next_index())),
            position: 0,
        }
    }

    pub fn persisting_iter_from(&self, first: LogIndex) -> impl Iterator<Item = PersistingLogEntry> + Send {
        self.iter_from(first).map(|entry| entry.entry().clone())
    }

    /// Whether any entry in `range` carries a payload.
    pub fn contains_payload(&self, range: LogRange) -> bool {
        self.slice(range).iter_from(LogIndex::zero()).any(|entry| entry.entry().has_payload())
    }

    /// Scans the whole log once.
    pub fn compute_term_index_map(&self) -> TermIndexMapping {
        let mut mapping = TermIndexMapping::new();
        for entry in self.iter_from(self.first_index) {
            mapping.insert_entry(entry.term_index_pair());
        }
        mapping
    }
}

pub struct InMemoryLogIterator {
    log: InMemoryLog,
    position: usize,
}

impl Iterator for InMemoryLogIterator {
    type Item = InMemoryLogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.log.len {
            return None;
        }
        let entry = self.log.entry_at(self.position).clone();
        self.position += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.log.len - self.position;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::{LogPayload, LogTerm};

    fn entry(term: u64, index: u64) -> InMemoryLogEntry {
        let payload = if index % 10 == 0 {
            None
        } else {
            Some(LogPayload::from(format!("{}", index).into_bytes()))
        };
        InMemoryLogEntry::new(
            PersistingLogEntry::new(TermIndexPair::new(LogTerm::new(term), LogIndex::new(index)), payload),
            false,
        )
    }

    fn log_with(range: std::ops::RangeInclusive<u64>) -> InMemoryLog {
        let mut log = InMemoryLog::new(LogIndex::new(*range.start()));
        for i in range {
            log.append_in_place(entry(1 + i / 100, i));
        }
        log
    }

    fn indexes(log: &InMemoryLog) -> Vec<u64> {
        log.iter_from(LogIndex::zero())
            .map(|e| e.term_index_pair().index.as_u64())
            .collect()
    }

    #[test]
    fn append_and_lookup_across_segments() {
        let log = log_with(1..=1000);

        assert_eq!(log.len(), 1000);
        assert_eq!(log.first_index(), LogIndex::new(1));
        assert_eq!(log.next_index(), LogIndex::new(1001));
        assert_eq!(
            log.last_term_index_pair(),
            TermIndexPair::new(LogTerm::new(11), LogIndex::new(1000))
        );
        for i in [1, 127, 128, 129, 500, 1000] {
            let found = log.entry_by_index(LogIndex::new(i)).unwrap();
            assert_eq!(found.term_index_pair().index, LogIndex::new(i));
        }
        assert!(log.entry_by_index(LogIndex::new(0)).is_none());
        assert!(log.entry_by_index(LogIndex::new(1001)).is_none());
    }

    #[test]
    #[should_panic(expected = "must directly follow")]
    fn append_with_gap_panics() {
        let mut log = log_with(1..=5);
        log.append_in_place(entry(1, 7));
    }

    #[test]
    fn slice_shares_and_does_not_leak_later_appends() {
        let original = log_with(1..=300);
        let slice = original.slice(LogRange::new(LogIndex::new(100), LogIndex::new(200)));
        assert_eq!(slice.len(), 100);
        assert_eq!(slice.first_index(), LogIndex::new(100));
        assert_eq!(slice.before_first().index, LogIndex::new(99));
        assert!(Arc::ptr_eq(&slice.segments[0], &original.segments[0]));

        // Appending to the slice must not change what the original sees, and vice versa.
        let grown = slice.append((200..=210).map(|i| entry(7, i)));
        assert_eq!(grown.entry_by_index(LogIndex::new(205)).unwrap().term_index_pair().term, LogTerm::new(7));
        assert_eq!(
            original.entry_by_index(LogIndex::new(205)).unwrap().term_index_pair().term,
            LogTerm::new(3)
        );
        assert_eq!(original.len(), 300);
        assert_eq!(slice.len(), 100);
        assert_eq!(indexes(&grown).len(), 111);
    }

    #[test]
    fn release_drops_prefix() {
        let log = log_with(1..=50);
        let released = log.release(LogIndex::new(31));

        assert_eq!(released.first_index(), LogIndex::new(31));
        assert_eq!(indexes(&released), (31..=50).collect::<Vec<_>>());
        assert_eq!(released.term_index_pair_of(LogIndex::new(30)).unwrap().index, LogIndex::new(30));
        assert!(released.entry_by_index(LogIndex::new(30)).is_none());

        let everything_released = log.release(LogIndex::new(51));
        assert!(everything_released.is_empty());
        assert_eq!(everything_released.next_index(), LogIndex::new(51));
        assert_eq!(everything_released.last_index(), LogIndex::new(50));

        // Releasing before the start is a no-op.
        assert_eq!(log.release(LogIndex::new(1)).len(), 50);
    }

    #[test]
    fn internal_entries_carry_no_payload() {
        let log = log_with(1..=25);
        assert!(!log.contains_payload(LogRange::new(LogIndex::new(10), LogIndex::new(11))));
        assert!(log.contains_payload(LogRange::new(LogIndex::new(10), LogIndex::new(12))));
    }

    #[test]
    fn term_index_map_matches_log() {
        let log = log_with(95..=230);
        let mapping = log.compute_term_index_map();

        assert_eq!(mapping.index_range(), LogRange::new(LogIndex::new(95), LogIndex::new(231)));
        assert_eq!(
            mapping.term_range(LogTerm::new(2)),
            Some(LogRange::new(LogIndex::new(100), LogIndex::new(200)))
        );
        assert_eq!(mapping.term_of_index(LogIndex::new(99)), Some(LogTerm::new(1)));
    }

    #[test]
    fn load_from_storage() {
        let stored: Vec<_> = (5..=8).map(|i| entry(2, i).entry().clone()).collect();
        let log = InMemoryLog::load(stored);
        assert_eq!(log.first_index(), LogIndex::new(5));
        assert_eq!(log.last_index(), LogIndex::new(8));

        let empty = InMemoryLog::load(Vec::new());
        assert!(empty.is_empty());
        assert_eq!(empty.next_index(), LogIndex::start_index());
        assert_eq!(empty.last_term_index_pair(), TermIndexPair::sentinel());
    }
}
