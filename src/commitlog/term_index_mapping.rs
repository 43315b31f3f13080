use crate::commitlog::{LogIndex, LogRange, LogTerm, TermIndexPair};
use std::collections::VecDeque;

/// TermIndexMapping answers "which term owns this index" and "which indexes belong to this term".
///
/// It is an ordered set of disjoint `range -> term` intervals. Because terms only increase along
/// the log, the intervals are sorted by index and by term at the same time, which lets both kinds
/// of lookups binary search the same deque. Appending at the end, which is by far the most
/// common mutation, is O(1) amortized.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TermIndexMapping {
    intervals: VecDeque<TermInterval>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct TermInterval {
    term: LogTerm,
    range: LogRange,
}

impl TermIndexMapping {
    pub fn new() -> Self {
        TermIndexMapping::default()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Associates `range` with `term`.
    ///
    /// Panics if the range overlaps an existing interval or if it would break the ordering of
    /// terms along the log. A range directly following an interval of the same term extends that
    /// interval.
    pub fn insert(&mut self, range: LogRange, term: LogTerm) {
        if range.is_empty() {
            return;
        }

        // Fast path: append at the end.
        if let Some(last) = self.intervals.back_mut() {
            if range.from >= last.range.to {
                assert!(
                    term >= last.term,
                    "Term must not decrease along the log. Last {:?}={:?}, new {:?}={:?}",
                    last.range,
                    last.term,
                    range,
                    term,
                );
                if term == last.term {
                    assert_eq!(
                        last.range.to, range.from,
                        "Ranges of term {:?} must be contiguous. Existing {:?}, new {:?}",
                        term, last.range, range,
                    );
                    last.range.to = range.to;
                } else {
                    self.intervals.push_back(TermInterval { term, range });
                }
                return;
            }
        } else {
            self.intervals.push_back(TermInterval { term, range });
            return;
        }

        let position = self.intervals.partition_point(|interval| interval.range.to <= range.from);
        if let Some(next) = self.intervals.get(position) {
            assert!(
                range.to <= next.range.from,
                "Range {:?} overlaps existing range {:?}",
                range,
                next.range,
            );
            assert!(term <= next.term, "Term must not decrease along the log");
            assert!(
                term != next.term || range.to == next.range.from,
                "Ranges of term {:?} must be contiguous",
                term
            );
        }
        if let Some(previous) = position.checked_sub(1).and_then(|p| self.intervals.get(p)) {
            assert!(term >= previous.term, "Term must not decrease along the log");
            assert!(
                term != previous.term || previous.range.to == range.from,
                "Ranges of term {:?} must be contiguous",
                term
            );
        }

        let merge_previous = position
            .checked_sub(1)
            .and_then(|p| self.intervals.get(p))
            .map_or(false, |previous| previous.term == term && previous.range.to == range.from);
        let merge_next = self
            .intervals
            .get(position)
            .map_or(false, |next| next.term == term && next.range.from == range.to);

        match (merge_previous, merge_next) {
            (true, true) => {
                let next_to = self.intervals[position].range.to;
                self.intervals.remove(position);
                self.intervals[position - 1].range.to = next_to;
            }
            (true, false) => self.intervals[position - 1].range.to = range.to,
            (false, true) => self.intervals[position].range.from = range.from,
            (false, false) => self.intervals.insert(position, TermInterval { term, range }),
        }
    }

    /// Records a single appended entry.
    pub fn insert_entry(&mut self, entry: TermIndexPair) {
        self.insert(LogRange::new(entry.index, entry.index.plus(1)), entry.term);
    }

    /// Drops everything before `stop`. The entry at `stop` is kept.
    pub fn remove_front(&mut self, stop: LogIndex) {
        while let Some(first) = self.intervals.front_mut() {
            if first.range.to <= stop {
                self.intervals.pop_front();
            } else {
                if first.range.from < stop {
                    first.range.from = stop;
                }
                return;
            }
        }
    }

    /// Drops everything from `start` onwards. The entry at `start` is removed.
    pub fn remove_back(&mut self, start: LogIndex) {
        while let Some(last) = self.intervals.back_mut() {
            if last.range.from >= start {
                self.intervals.pop_back();
            } else {
                if last.range.to > start {
                    last.range.to = start;
                }
                return;
            }
        }
    }

    pub fn term_range(&self, term: LogTerm) -> Option<LogRange> {
        self.intervals
            .binary_search_by(|interval| interval.term.cmp(&term))
            .ok()
            .map(|position| self.intervals[position].range)
    }

    pub fn first_index_of_term(&self, term: LogTerm) -> Option<LogIndex> {
        self.term_range(term).map(|range| range.from)
    }

    pub fn term_of_index(&self, index: LogIndex) -> Option<LogTerm> {
        let position = self.intervals.partition_point(|interval| interval.range.to <= index);
        self.intervals
            .get(position)
            .filter(|interval| interval.range.contains(index))
            .map(|interval| interval.term)
    }

    /// The full covered range, empty if the mapping is empty.
    pub fn index_range(&self) -> LogRange {
        match (self.intervals.front(), self.intervals.back()) {
            (Some(first), Some(last)) => LogRange::new(first.range.from, last.range.to),
            _ => LogRange::default(),
        }
    }

    pub fn first_index(&self) -> Option<TermIndexPair> {
        self.intervals
            .front()
            .map(|interval| TermIndexPair::new(interval.term, interval.range.from))
    }

    pub fn last_index(&self) -> Option<TermIndexPair> {
        self.intervals
            .back()
            .map(|interval| TermIndexPair::new(interval.term, interval.range.to.saturating_minus(1)))
    }

    /// The index the next appended entry must have, given the entries currently covered.
    pub fn next_index(&self) -> Option<LogIndex> {
        self.intervals.back().map(|interval| interval.range.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(from: u64, to: u64) -> LogRange {
        LogRange::new(LogIndex::new(from), LogIndex::new(to))
    }

    fn term(t: u64) -> LogTerm {
        LogTerm::new(t)
    }

    #[test]
    fn remove_front_drops_and_resizes_terms() {
        let mut mapping = TermIndexMapping::new();
        mapping.insert(range(10, 40), term(4));
        mapping.insert(range(40, 60), term(5));

        mapping.remove_front(LogIndex::new(30));
        assert_eq!(mapping.term_range(term(4)), Some(range(30, 40)));
        assert_eq!(mapping.term_range(term(5)), Some(range(40, 60)));

        mapping.remove_front(LogIndex::new(50));
        assert_eq!(mapping.term_range(term(4)), None);
        assert_eq!(mapping.term_range(term(5)), Some(range(50, 60)));
        assert_eq!(mapping.index_range(), range(50, 60));
    }

    #[test]
    fn remove_back_drops_and_resizes_terms() {
        let mut mapping = TermIndexMapping::new();
        mapping.insert(range(1, 10), term(1));
        mapping.insert(range(10, 20), term(3));
        mapping.insert(range(20, 25), term(4));

        mapping.remove_back(LogIndex::new(15));
        assert_eq!(mapping.term_range(term(4)), None);
        assert_eq!(mapping.term_range(term(3)), Some(range(10, 15)));
        assert_eq!(mapping.last_index(), Some(TermIndexPair::new(term(3), LogIndex::new(14))));

        mapping.remove_back(LogIndex::new(1));
        assert!(mapping.is_empty());
        assert!(mapping.index_range().is_empty());
    }

    #[test]
    fn appending_entries_merges_same_term() {
        let mut mapping = TermIndexMapping::new();
        for i in 1..=5 {
            mapping.insert_entry(TermIndexPair::new(term(1), LogIndex::new(i)));
        }
        for i in 6..=7 {
            mapping.insert_entry(TermIndexPair::new(term(2), LogIndex::new(i)));
        }

        assert_eq!(mapping.term_range(term(1)), Some(range(1, 6)));
        assert_eq!(mapping.term_range(term(2)), Some(range(6, 8)));
        assert_eq!(mapping.next_index(), Some(LogIndex::new(8)));
    }

    #[test]
    fn lookups() {
        let mut mapping = TermIndexMapping::new();
        mapping.insert(range(1, 5), term(1));
        mapping.insert(range(5, 9), term(2));
        mapping.insert(range(9, 12), term(5));

        assert_eq!(mapping.term_of_index(LogIndex::new(0)), None);
        assert_eq!(mapping.term_of_index(LogIndex::new(1)), Some(term(1)));
        assert_eq!(mapping.term_of_index(LogIndex::new(8)), Some(term(2)));
        assert_eq!(mapping.term_of_index(LogIndex::new(9)), Some(term(5)));
        assert_eq!(mapping.term_of_index(LogIndex::new(12)), None);

        assert_eq!(mapping.first_index_of_term(term(2)), Some(LogIndex::new(5)));
        assert_eq!(mapping.first_index_of_term(term(3)), None);
        assert_eq!(mapping.first_index(), Some(TermIndexPair::new(term(1), LogIndex::new(1))));
        assert_eq!(mapping.last_index(), Some(TermIndexPair::new(term(5), LogIndex::new(11))));
    }

    #[test]
    fn insert_in_the_middle_merges_neighbours() {
        let mut mapping = TermIndexMapping::new();
        mapping.insert(range(1, 5), term(1));
        mapping.insert(range(8, 10), term(2));
        mapping.insert(range(12, 14), term(4));

        mapping.insert(range(5, 8), term(2));
        assert_eq!(mapping.term_range(term(2)), Some(range(5, 10)));

        mapping.insert(range(10, 12), term(3));
        assert_eq!(mapping.term_of_index(LogIndex::new(11)), Some(term(3)));
        assert_eq!(mapping.index_range(), range(1, 14));
    }

    #[test]
    #[should_panic(expected = "overlaps")]
    fn overlapping_insert_panics() {
        let mut mapping = TermIndexMapping::new();
        mapping.insert(range(10, 20), term(1));
        mapping.insert(range(30, 40), term(2));
        mapping.insert(range(15, 25), term(1));
    }
}
