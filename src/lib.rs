mod api;
mod commitlog;
mod replica;
mod storage_manager;
#[cfg(test)]
mod test_utils;
mod grpc {
    include!("../generated/replicated_log.rs");
}

pub use api::try_create_leader;
pub use api::LeaderConfig;
pub use api::LeaderCreationError;
pub use api::LeaderOptions;
pub use api::LogConfig;
pub use commitlog::InMemoryPersistedLog;
pub use commitlog::LogIndex;
pub use commitlog::LogMetadata;
pub use commitlog::LogPayload;
pub use commitlog::LogRange;
pub use commitlog::LogTerm;
pub use commitlog::PersistedLog;
pub use commitlog::PersistedLogIterator;
pub use commitlog::PersistingLogEntry;
pub use commitlog::SequenceNumber;
pub use commitlog::StorageError;
pub use commitlog::StorageResult;
pub use commitlog::TermIndexMapping;
pub use commitlog::TermIndexPair;
pub use commitlog::WriteOptions;
pub use replica::abort_on_fatal_error;
pub use replica::calculate_commit_index;
pub use replica::detect_conflict;
pub use replica::AppendEntriesError;
pub use replica::AppendEntriesErrorReason;
pub use replica::AppendEntriesRequest;
pub use replica::AppendEntriesResult;
pub use replica::CommitFailReason;
pub use replica::CommitIndexOptions;
pub use replica::CommittedEntries;
pub use replica::ConflictReason;
pub use replica::ConnectError;
pub use replica::FatalErrorHandler;
pub use replica::Follower;
pub use replica::FollowerState;
pub use replica::FollowerStatistics;
pub use replica::GrpcFollower;
pub use replica::IneligibilityReason;
pub use replica::InMemoryLog;
pub use replica::InMemoryLogEntry;
pub use replica::InMemoryLogIterator;
pub use replica::Leader;
pub use replica::LeaderError;
pub use replica::LeaderStatus;
pub use replica::LocalFollower;
pub use replica::LocalStatistics;
pub use replica::MessageId;
pub use replica::ParticipantFlags;
pub use replica::ParticipantId;
pub use replica::ParticipantState;
pub use replica::QuorumData;
pub use replica::ScheduledTask;
pub use replica::Scheduler;
pub use replica::TokioScheduler;
pub use replica::WaitForResult;
pub use storage_manager::StorageFuture;
pub use storage_manager::StorageManager;
pub use storage_manager::StorageTransaction;

// `crate::{root_mod}` only holds `mod` and `pub use` statements. Modules are never `pub`, every
// exported type gets its own `pub use`.
