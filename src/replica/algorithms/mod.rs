//! Pure functions of the replication protocol. Nothing in here does I/O or fails, every outcome
//! is encoded in the return value.
mod commit_index;
mod conflict;

pub use commit_index::calculate_commit_index;
pub use commit_index::CommitFailReason;
pub use commit_index::CommitIndexOptions;
pub use commit_index::IneligibilityReason;
pub use commit_index::ParticipantState;
pub use commit_index::QuorumData;
pub use conflict::detect_conflict;
pub use conflict::ConflictReason;
