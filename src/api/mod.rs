//! Configuration and construction of a leader.
mod options;
mod wiring;

pub use options::LeaderOptions;
pub use options::LogConfig;
pub use wiring::try_create_leader;
pub use wiring::LeaderConfig;
pub use wiring::LeaderCreationError;
