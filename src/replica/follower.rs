use crate::commitlog::{LogIndex, LogTerm, TermIndexPair};
use crate::replica::in_memory_log::InMemoryLog;
use crate::replica::peers::ParticipantId;
use std::fmt;
use std::time::Duration;

/// Per-follower counter. The leader only accepts the answer to the request it sent last.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

impl MessageId {
    pub fn new(id: u64) -> Self {
        MessageId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> MessageId {
        MessageId(self.0 + 1)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct AppendEntriesRequest {
    pub leader_term: LogTerm,
    pub leader_id: ParticipantId,
    pub prev_log_entry: TermIndexPair,
    pub leader_commit: LogIndex,
    pub largest_common_index: LogIndex,
    pub wait_for_sync: bool,
    pub message_id: MessageId,
    pub entries: InMemoryLog,
}

impl AppendEntriesRequest {
    /// The entry the follower has once it applied this request.
    pub fn last_entry(&self) -> TermIndexPair {
        if self.entries.is_empty() {
            self.prev_log_entry
        } else {
            self.entries.last_term_index_pair()
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AppendEntriesErrorReason {
    None,
    InvalidLeaderId,
    LostLogCore,
    MessageOutdated,
    WrongTerm,
    NoPrevLogMatch,
    PersistenceFailure,
    CommunicationError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendEntriesResult {
    pub log_term: LogTerm,
    pub error_code: i32,
    pub reason: AppendEntriesErrorReason,
    /// Where the leader should continue probing. Only set for `NoPrevLogMatch`.
    pub conflict: Option<TermIndexPair>,
    pub message_id: MessageId,
    pub snapshot_available: bool,
}

impl AppendEntriesResult {
    pub fn success(log_term: LogTerm, message_id: MessageId) -> Self {
        AppendEntriesResult {
            log_term,
            error_code: 0,
            reason: AppendEntriesErrorReason::None,
            conflict: None,
            message_id,
            snapshot_available: true,
        }
    }

    pub fn with_conflict(log_term: LogTerm, message_id: MessageId, conflict: TermIndexPair) -> Self {
        AppendEntriesResult {
            log_term,
            error_code: error_code(AppendEntriesErrorReason::NoPrevLogMatch),
            reason: AppendEntriesErrorReason::NoPrevLogMatch,
            conflict: Some(conflict),
            message_id,
            snapshot_available: true,
        }
    }

    pub fn failure(log_term: LogTerm, message_id: MessageId, reason: AppendEntriesErrorReason) -> Self {
        AppendEntriesResult {
            log_term,
            error_code: error_code(reason),
            reason,
            conflict: None,
            message_id,
            snapshot_available: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_code == 0 && self.reason == AppendEntriesErrorReason::None
    }
}

fn error_code(reason: AppendEntriesErrorReason) -> i32 {
    match reason {
        AppendEntriesErrorReason::None => 0,
        AppendEntriesErrorReason::InvalidLeaderId => 1,
        AppendEntriesErrorReason::LostLogCore => 2,
        AppendEntriesErrorReason::MessageOutdated => 3,
        AppendEntriesErrorReason::WrongTerm => 4,
        AppendEntriesErrorReason::NoPrevLogMatch => 5,
        AppendEntriesErrorReason::PersistenceFailure => 6,
        AppendEntriesErrorReason::CommunicationError => 7,
    }
}

/// Transport level failures. The leader treats all of them as `CommunicationError`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AppendEntriesError {
    #[error("Failed to reach follower: {0}")]
    Communication(String),
    #[error("No answer from follower within {0:?}")]
    Timeout(Duration),
    #[error("Malformed reply: {0}")]
    MalformedReply(String),
}

/// Follower is how the leader talks to one participant, remote or local.
#[async_trait::async_trait]
pub trait Follower: Send + Sync {
    fn participant_id(&self) -> &ParticipantId;

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, AppendEntriesError>;
}
