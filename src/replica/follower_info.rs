use crate::commitlog::{LogIndex, TermIndexPair};
use crate::replica::algorithms::ParticipantState;
use crate::replica::follower::{
    AppendEntriesError, AppendEntriesErrorReason, AppendEntriesRequest, AppendEntriesResult, Follower, MessageId,
};
use crate::replica::in_memory_log::InMemoryLog;
use crate::replica::peers::{ParticipantFlags, ParticipantId};
use std::cmp;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Replication state of one follower. At most one request per follower is outstanding.
///
/// `Idle -> Prepare -> RequestInFlight -> (Idle | ErrorBackoff)`, and `ErrorBackoff -> Prepare`
/// once the next request is built.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FollowerState {
    Idle,
    // Request is built and waits out `delay` before it is sent.
    Prepare { delay: Duration },
    RequestInFlight { sent_at: Instant },
    ErrorBackoff,
}

const MAX_BACKOFF_EXPONENT: usize = 17;

/// `100µs * 2^errors`, the exponent capped at 17. Zero without errors.
pub(super) fn backoff_delay(num_errors: usize) -> Duration {
    if num_errors == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(100) * (1u32 << cmp::min(num_errors, MAX_BACKOFF_EXPONENT))
}

/// What the request a response answers looked like.
#[derive(Copy, Clone, Debug)]
pub(super) struct SentRequest {
    pub(super) message_id: MessageId,
    pub(super) last_entry: TermIndexPair,
    pub(super) leader_commit: LogIndex,
    pub(super) largest_common_index: LogIndex,
}

impl SentRequest {
    pub(super) fn describe(request: &AppendEntriesRequest) -> Self {
        SentRequest {
            message_id: request.message_id,
            last_entry: request.last_entry(),
            leader_commit: request.leader_commit,
            largest_common_index: request.largest_common_index,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum ResponseOutcome {
    // Answers an older request. Nothing was changed.
    Stale,
    Success,
    Conflict,
    Error,
}

pub(super) struct FollowerInfo {
    follower: Arc<dyn Follower>,
    flags: ParticipantFlags,
    last_acked_entry: TermIndexPair,
    last_acked_commit_index: LogIndex,
    last_acked_lci: LogIndex,
    // The next request starts after this index.
    next_prev_log_index: LogIndex,
    state: FollowerState,
    num_errors_since_last_answer: usize,
    last_error_reason: Option<AppendEntriesErrorReason>,
    last_sent_message_id: MessageId,
    last_request_latency: Duration,
    snapshot_available: bool,
}

impl FollowerInfo {
    pub(super) fn new(follower: Arc<dyn Follower>, flags: ParticipantFlags, spearhead: TermIndexPair) -> Self {
        FollowerInfo {
            follower,
            flags,
            last_acked_entry: TermIndexPair::sentinel(),
            last_acked_commit_index: LogIndex::zero(),
            last_acked_lci: LogIndex::zero(),
            next_prev_log_index: spearhead.index,
            state: FollowerState::Idle,
            num_errors_since_last_answer: 0,
            last_error_reason: None,
            last_sent_message_id: MessageId::default(),
            last_request_latency: Duration::ZERO,
            snapshot_available: true,
        }
    }

    pub(super) fn id(&self) -> &ParticipantId {
        self.follower.participant_id()
    }

    pub(super) fn follower(&self) -> Arc<dyn Follower> {
        self.follower.clone()
    }

    pub(super) fn state(&self) -> FollowerState {
        self.state
    }

    pub(super) fn last_acked_entry(&self) -> TermIndexPair {
        self.last_acked_entry
    }

    pub(super) fn last_acked_commit_index(&self) -> LogIndex {
        self.last_acked_commit_index
    }

    pub(super) fn last_acked_lci(&self) -> LogIndex {
        self.last_acked_lci
    }

    pub(super) fn next_prev_log_index(&self) -> LogIndex {
        self.next_prev_log_index
    }

    pub(super) fn num_errors(&self) -> usize {
        self.num_errors_since_last_answer
    }

    pub(super) fn last_error_reason(&self) -> Option<AppendEntriesErrorReason> {
        self.last_error_reason
    }

    pub(super) fn last_sent_message_id(&self) -> MessageId {
        self.last_sent_message_id
    }

    pub(super) fn last_request_latency(&self) -> Duration {
        self.last_request_latency
    }

    pub(super) fn participant_state(&self) -> ParticipantState {
        ParticipantState {
            last_acked_entry: self.last_acked_entry,
            id: self.id().clone(),
            snapshot_available: self.snapshot_available,
            flags: self.flags,
        }
    }

    /// Whether the follower is missing entries or has not heard of the current commit index or
    /// largest common index yet.
    pub(super) fn needs_update(&self, spearhead: LogIndex, commit_index: LogIndex, lci: LogIndex) -> bool {
        self.next_prev_log_index < spearhead || self.last_acked_commit_index < commit_index || self.last_acked_lci < lci
    }

    pub(super) fn can_send(&self) -> bool {
        matches!(self.state, FollowerState::Idle | FollowerState::ErrorBackoff)
    }

    /// Moves to `Prepare` and hands out the id and delay of the next request.
    pub(super) fn prepare_request(&mut self) -> (MessageId, Duration) {
        debug_assert!(self.can_send(), "Preparing request in state {:?}", self.state);
        let message_id = self.last_sent_message_id.next();
        let delay = backoff_delay(self.num_errors_since_last_answer);
        self.last_sent_message_id = message_id;
        self.state = FollowerState::Prepare { delay };
        (message_id, delay)
    }

    /// Returns false if `message_id` is no longer the request the follower waits on.
    pub(super) fn mark_in_flight(&mut self, message_id: MessageId, now: Instant) -> bool {
        if message_id != self.last_sent_message_id || !matches!(self.state, FollowerState::Prepare { .. }) {
            return false;
        }
        self.state = FollowerState::RequestInFlight { sent_at: now };
        true
    }

    pub(super) fn handle_response(
        &mut self,
        logger: &slog::Logger,
        sent: SentRequest,
        response: Result<AppendEntriesResult, AppendEntriesError>,
        latency: Duration,
        log: &InMemoryLog,
    ) -> ResponseOutcome {
        if sent.message_id != self.last_sent_message_id {
            slog::warn!(
                logger,
                "Discarding stale response to {:?}, last sent {:?}",
                sent.message_id,
                self.last_sent_message_id
            );
            return ResponseOutcome::Stale;
        }
        self.last_request_latency = latency;

        match response {
            Ok(result) if result.is_success() => {
                self.num_errors_since_last_answer = 0;
                self.last_error_reason = None;
                self.last_acked_entry = sent.last_entry;
                // A follower only holds what it acknowledged, whatever the leader had committed.
                self.last_acked_commit_index = cmp::min(sent.leader_commit, sent.last_entry.index);
                self.last_acked_lci = cmp::min(sent.largest_common_index, sent.last_entry.index);
                self.next_prev_log_index = sent.last_entry.index;
                self.snapshot_available = result.snapshot_available;
                self.state = FollowerState::Idle;
                ResponseOutcome::Success
            }
            Ok(result) if result.reason == AppendEntriesErrorReason::NoPrevLogMatch && result.conflict.is_some() => {
                self.snapshot_available = result.snapshot_available;
                self.last_error_reason = Some(result.reason);
                let conflict = result.conflict.unwrap_or_default();
                self.handle_conflict(logger, conflict, log)
            }
            Ok(result) => {
                slog::warn!(
                    logger,
                    "Follower rejected append entries: {:?} in term {:?}",
                    result.reason,
                    result.log_term
                );
                self.snapshot_available = result.snapshot_available;
                self.record_error(result.reason)
            }
            Err(e) => {
                slog::warn!(logger, "Append entries failed: {}", e);
                self.record_error(AppendEntriesErrorReason::CommunicationError)
            }
        }
    }

    fn handle_conflict(&mut self, logger: &slog::Logger, conflict: TermIndexPair, log: &InMemoryLog) -> ResponseOutcome {
        let retry_after = conflict.index.saturating_minus(1);
        let oldest_available = log.before_first().index;
        slog::info!(logger, "Log conflict, follower suggested {:?}", conflict);

        if retry_after < oldest_available {
            // The follower needs entries that were already compacted.
            slog::warn!(
                logger,
                "Follower needs entries before {:?}, which are no longer available",
                oldest_available
            );
            self.next_prev_log_index = oldest_available;
            self.roll_back_acked_entry(oldest_available, log);
            return self.record_error(AppendEntriesErrorReason::NoPrevLogMatch);
        }

        self.num_errors_since_last_answer = 0;
        self.next_prev_log_index = retry_after;
        self.roll_back_acked_entry(retry_after, log);
        self.state = FollowerState::Idle;
        ResponseOutcome::Conflict
    }

    fn roll_back_acked_entry(&mut self, index: LogIndex, log: &InMemoryLog) {
        if self.last_acked_entry.index > index {
            self.last_acked_entry = log.term_index_pair_of(index).unwrap_or_default();
        }
    }

    fn record_error(&mut self, reason: AppendEntriesErrorReason) -> ResponseOutcome {
        self.num_errors_since_last_answer += 1;
        self.last_error_reason = Some(reason);
        self.state = FollowerState::ErrorBackoff;
        ResponseOutcome::Error
    }

    /// The local follower acknowledges everything it loaded from disk.
    pub(super) fn assume_acked(&mut self, entry: TermIndexPair) {
        self.last_acked_entry = entry;
        self.next_prev_log_index = entry.index;
    }
}
