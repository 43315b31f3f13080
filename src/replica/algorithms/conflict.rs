use crate::commitlog::{TermIndexMapping, TermIndexPair};

/// Why an append-entries request can not be applied on top of a log.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConflictReason {
    LogEmpty,
    LogEntryBeforeBegin,
    LogEntryAfterEnd,
    LogEntryNoMatch,
}

/// Checks whether `prev` is present in the log described by `mapping`.
///
/// On conflict, also returns the position the leader should probe next, so it can skip whole
/// terms instead of walking back one entry at a time:
/// - empty log or `prev` before the first entry: `(0, 0)`,
/// - `prev` after the last entry: the last entry,
/// - term mismatch: the first entry of the term actually stored at `prev.index`.
///
/// The `(0, 0)` sentinel itself is not special cased, callers skip the check for it.
pub fn detect_conflict(mapping: &TermIndexMapping, prev: TermIndexPair) -> Option<(ConflictReason, TermIndexPair)> {
    let (first, last) = match (mapping.first_index(), mapping.last_index()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Some((ConflictReason::LogEmpty, TermIndexPair::sentinel())),
    };

    if prev.index < first.index {
        return Some((ConflictReason::LogEntryBeforeBegin, TermIndexPair::sentinel()));
    }
    if prev.index > last.index {
        return Some((ConflictReason::LogEntryAfterEnd, last));
    }

    match mapping.term_of_index(prev.index) {
        Some(term) if term == prev.term => None,
        Some(term) => {
            // The mapping covers prev.index, so the term has a first index.
            let first_of_term = mapping.first_index_of_term(term).unwrap_or(prev.index);
            Some((ConflictReason::LogEntryNoMatch, TermIndexPair::new(term, first_of_term)))
        }
        // Gap between terms.
        None => Some((ConflictReason::LogEntryNoMatch, TermIndexPair::new(Default::default(), prev.index))),
    }
}
