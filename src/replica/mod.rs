mod algorithms;
mod follower;
mod follower_info;
mod in_memory_log;
mod leader;
mod local_follower;
mod peer_client;
mod peers;
mod scheduler;
mod status;

pub use algorithms::calculate_commit_index;
pub use algorithms::detect_conflict;
pub use algorithms::CommitFailReason;
pub use algorithms::CommitIndexOptions;
pub use algorithms::ConflictReason;
pub use algorithms::IneligibilityReason;
pub use algorithms::ParticipantState;
pub use algorithms::QuorumData;
pub use follower::AppendEntriesError;
pub use follower::AppendEntriesErrorReason;
pub use follower::AppendEntriesRequest;
pub use follower::AppendEntriesResult;
pub use follower::Follower;
pub use follower::MessageId;
pub use follower_info::FollowerState;
pub use in_memory_log::InMemoryLog;
pub use in_memory_log::InMemoryLogEntry;
pub use in_memory_log::InMemoryLogIterator;
pub use leader::CommittedEntries;
pub use leader::Leader;
pub use leader::LeaderError;
pub use leader::WaitForResult;
pub use local_follower::abort_on_fatal_error;
pub use local_follower::FatalErrorHandler;
pub use local_follower::LocalFollower;
pub use peer_client::ConnectError;
pub use peer_client::GrpcFollower;
pub use peers::ParticipantFlags;
pub use peers::ParticipantId;
pub use scheduler::ScheduledTask;
pub use scheduler::Scheduler;
pub use scheduler::TokioScheduler;
pub use status::FollowerStatistics;
pub use status::LeaderStatus;
pub use status::LocalStatistics;

// So the api can assemble a leader.
pub(crate) use leader::LeaderParameters;
pub(crate) use leader::LeaderSettings;
