mod in_memory;
mod log;
mod storage;
mod term_index_mapping;

pub use in_memory::InMemoryPersistedLog;
pub use log::LogIndex;
pub use log::LogPayload;
pub use log::LogRange;
pub use log::LogTerm;
pub use log::PersistingLogEntry;
pub use log::TermIndexPair;
pub use storage::LogMetadata;
pub use storage::PersistedLog;
pub use storage::PersistedLogIterator;
pub use storage::SequenceNumber;
pub use storage::StorageError;
pub use storage::StorageResult;
pub use storage::WriteOptions;
pub use term_index_mapping::TermIndexMapping;
