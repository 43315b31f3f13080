//! Serializes every write to the durable log through a single worker.
mod future;
mod manager;

pub use future::StorageFuture;
pub use manager::StorageManager;
pub use manager::StorageTransaction;
