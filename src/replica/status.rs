use crate::commitlog::{LogIndex, LogTerm, TermIndexPair};
use crate::replica::algorithms::{CommitFailReason, QuorumData};
use crate::replica::follower::{AppendEntriesErrorReason, MessageId};
use crate::replica::follower_info::FollowerState;
use crate::replica::peers::ParticipantId;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// Point in time view of a leader, for diagnostics.
#[derive(Clone, Debug)]
pub struct LeaderStatus {
    pub id: ParticipantId,
    pub term: LogTerm,
    pub resigned: bool,
    pub local: LocalStatistics,
    /// How long the oldest uncommitted entry has been waiting.
    pub commit_lag: Duration,
    pub last_commit_status: CommitFailReason,
    pub last_commit_status_since: DateTime<Utc>,
    pub last_quorum: QuorumData,
    /// Entries before this index may be compacted.
    pub lowest_index_to_keep: LogIndex,
    pub followers: BTreeMap<ParticipantId, FollowerStatistics>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalStatistics {
    pub spearhead: TermIndexPair,
    pub first_index: LogIndex,
    pub commit_index: LogIndex,
    pub largest_common_index: LogIndex,
    pub release_index: LogIndex,
    pub sync_index: LogIndex,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FollowerStatistics {
    pub last_acked_entry: TermIndexPair,
    pub last_acked_commit_index: LogIndex,
    pub last_acked_largest_common_index: LogIndex,
    pub next_prev_log_index: LogIndex,
    /// Entries the follower is behind the spearhead.
    pub lag: u64,
    pub state: FollowerState,
    pub num_errors_since_last_answer: usize,
    pub last_error_reason: Option<AppendEntriesErrorReason>,
    pub last_message_id: MessageId,
    pub last_request_latency: Duration,
}
