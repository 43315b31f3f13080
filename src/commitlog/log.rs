use bytes::Bytes;
use std::fmt;

/// LogIndex is the position of an entry in the log.
///
/// Index 0 is a sentinel meaning "before the beginning". No entry is ever stored at index 0, the
/// first entry of a fresh log is written at index 1.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct LogIndex(u64);

impl LogIndex {
    pub const fn new(index: u64) -> Self {
        LogIndex(index)
    }

    pub const fn zero() -> Self {
        LogIndex(0)
    }

    pub fn start_index() -> Self {
        Self::new(1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn plus(&self, delta: u64) -> LogIndex {
        LogIndex(self.0 + delta)
    }

    pub fn saturating_minus(&self, delta: u64) -> LogIndex {
        LogIndex(self.0.saturating_sub(delta))
    }

    pub fn checked_minus(&self, delta: u64) -> Option<LogIndex> {
        self.0.checked_sub(delta).map(LogIndex)
    }

    /// Number of indexes in `[other, self)`, or 0 if `other` is past `self`.
    pub fn distance_from(&self, other: LogIndex) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl fmt::Debug for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// LogTerm identifies one epoch of leadership. Terms only ever increase. Term 0 is reserved for
/// the sentinel at index 0.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct LogTerm(u64);

impl LogTerm {
    pub const fn new(term: u64) -> Self {
        LogTerm(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LogTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LogTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The minimal key identifying a log position. Ordered by term first, then by index.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct TermIndexPair {
    pub term: LogTerm,
    pub index: LogIndex,
}

impl TermIndexPair {
    pub fn new(term: LogTerm, index: LogIndex) -> Self {
        TermIndexPair { term, index }
    }

    /// `(0, 0)`, the position before the first entry of any log.
    pub fn sentinel() -> Self {
        TermIndexPair::default()
    }
}

impl fmt::Debug for TermIndexPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}:{})", self.term, self.index)
    }
}

/// Half-open range of log indexes `[from, to)`.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct LogRange {
    pub from: LogIndex,
    pub to: LogIndex,
}

impl LogRange {
    pub fn new(from: LogIndex, to: LogIndex) -> Self {
        assert!(from <= to, "Illegal log range [{:?}, {:?})", from, to);
        LogRange { from, to }
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    pub fn count(&self) -> u64 {
        self.to.distance_from(self.from)
    }

    pub fn contains(&self, index: LogIndex) -> bool {
        self.from <= index && index < self.to
    }

    /// Intersection of both ranges. Disjoint ranges intersect to an empty range.
    pub fn intersect(&self, other: LogRange) -> LogRange {
        let from = self.from.max(other.from);
        let to = self.to.min(other.to);
        if from >= to {
            LogRange::new(from, from)
        } else {
            LogRange::new(from, to)
        }
    }
}

impl fmt::Debug for LogRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

/// LogPayload is an opaque, immutable blob. Cloning is cheap, the bytes are shared.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPayload(Bytes);

impl LogPayload {
    pub fn new(data: Bytes) -> Self {
        LogPayload(data)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn byte_size(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for LogPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogPayload({} bytes)", self.0.len())
    }
}

impl From<Bytes> for LogPayload {
    fn from(data: Bytes) -> Self {
        LogPayload(data)
    }
}

impl From<Vec<u8>> for LogPayload {
    fn from(data: Vec<u8>) -> Self {
        LogPayload(Bytes::from(data))
    }
}

impl From<&'static str> for LogPayload {
    fn from(data: &'static str) -> Self {
        LogPayload(Bytes::from_static(data.as_bytes()))
    }
}

/// A log entry as it is written to durable storage and sent over the wire.
///
/// Entries with a payload are user-visible. Entries without one are internal (e.g. the marker a
/// new leader writes to establish its term) and are never surfaced to log readers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistingLogEntry {
    term_index: TermIndexPair,
    payload: Option<LogPayload>,
}

/// Fixed per-entry overhead used when estimating the size of a batch.
const ENTRY_HEADER_BYTES: usize = 16;

impl PersistingLogEntry {
    pub fn new(term_index: TermIndexPair, payload: Option<LogPayload>) -> Self {
        PersistingLogEntry { term_index, payload }
    }

    pub fn term_index_pair(&self) -> TermIndexPair {
        self.term_index
    }

    pub fn term(&self) -> LogTerm {
        self.term_index.term
    }

    pub fn index(&self) -> LogIndex {
        self.term_index.index
    }

    pub fn payload(&self) -> Option<&LogPayload> {
        self.payload.as_ref()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    pub fn approx_byte_size(&self) -> usize {
        ENTRY_HEADER_BYTES + self.payload.as_ref().map(|p| p.byte_size()).unwrap_or(0)
    }
}
