use crate::commitlog::{LogIndex, LogTerm, PersistedLog, StorageError, StorageResult, WriteOptions};
use crate::replica::algorithms::detect_conflict;
use crate::replica::follower::{
    AppendEntriesError, AppendEntriesErrorReason, AppendEntriesRequest, AppendEntriesResult, Follower,
};
use crate::replica::peers::ParticipantId;
use crate::storage_manager::StorageManager;
use std::sync::Arc;

/// Called when the local log can no longer be written. The leader can not guarantee anything
/// without its own durable log, so the default handler aborts the process.
pub type FatalErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

pub fn abort_on_fatal_error(logger: slog::Logger) -> FatalErrorHandler {
    Arc::new(move |message: &str| {
        slog::crit!(logger, "Fatal local storage failure, aborting: {}", message);
        std::process::abort();
    })
}

/// LocalFollower lets the leader replicate to its own storage the same way it replicates to
/// every other participant.
pub struct LocalFollower {
    logger: slog::Logger,
    id: ParticipantId,
    term: LogTerm,
    storage: Arc<StorageManager>,
    on_fatal_error: FatalErrorHandler,
}

impl LocalFollower {
    pub fn new(
        logger: slog::Logger,
        id: ParticipantId,
        term: LogTerm,
        storage: Arc<StorageManager>,
        on_fatal_error: FatalErrorHandler,
    ) -> Self {
        let logger = logger.new(slog::o!("participant" => id.to_string(), "local" => true));
        LocalFollower {
            logger,
            id,
            term,
            storage,
            on_fatal_error,
        }
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    /// Removes everything before `stop` from the local log and lets the storage engine reclaim
    /// the space.
    pub async fn release(&self, stop: LogIndex) -> StorageResult<()> {
        let (removed, compacted) = {
            let mut tx = self.storage.transaction();
            (tx.remove_front(stop), tx.compact())
        };
        let removed = removed.await;
        let result = removed.and(compacted.await);
        match &result {
            Ok(()) => slog::info!(self.logger, "Compacted local log up to {:?}", stop),
            Err(e) => slog::error!(self.logger, "Failed to compact local log up to {:?}: {:?}", stop, e),
        }
        result
    }

    pub async fn resign(&self) -> Option<Arc<dyn PersistedLog>> {
        self.storage.resign().await
    }
}

#[async_trait::async_trait]
impl Follower for LocalFollower {
    fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, AppendEntriesError> {
        let message_id = request.message_id;
        if request.leader_term != self.term {
            slog::warn!(
                self.logger,
                "Append entries for term {:?}, but local follower belongs to term {:?}",
                request.leader_term,
                self.term
            );
            return Ok(AppendEntriesResult::failure(
                self.term,
                message_id,
                AppendEntriesErrorReason::WrongTerm,
            ));
        }

        let snapshot_available = self.storage.metadata().snapshot_available;
        let options = WriteOptions {
            wait_for_sync: request.wait_for_sync,
        };

        let (removed, appended) = {
            let mut tx = self.storage.transaction();
            let mapping = tx.spearhead_mapping();
            if request.prev_log_entry.index > LogIndex::zero() {
                if let Some((reason, conflict)) = detect_conflict(mapping, request.prev_log_entry) {
                    slog::warn!(
                        self.logger,
                        "Local log does not contain {:?}: {:?}",
                        request.prev_log_entry,
                        reason
                    );
                    return Ok(AppendEntriesResult::with_conflict(self.term, message_id, conflict));
                }
            }

            let overwrites_entries = !request.entries.is_empty()
                && mapping
                    .next_index()
                    .map_or(false, |next| next > request.entries.first_index());
            let removed = if overwrites_entries {
                Some(tx.remove_back(request.entries.first_index()))
            } else {
                None
            };
            (removed, tx.append_entries(request.entries, options))
        };

        let removed = match removed {
            Some(removed) => removed.await,
            None => Ok(()),
        };
        let result = removed.and(appended.await);

        match result {
            Ok(()) => {
                let mut response = AppendEntriesResult::success(self.term, message_id);
                response.snapshot_available = snapshot_available;
                Ok(response)
            }
            // Storage was handed over to the next leader, this is not a storage failure.
            Err(StorageError::ParticipantGone) => Ok(AppendEntriesResult::failure(
                self.term,
                message_id,
                AppendEntriesErrorReason::LostLogCore,
            )),
            Err(e) => {
                slog::error!(self.logger, "Failed to persist entries: {:?}", e);
                (self.on_fatal_error)(&format!("Persisting log entries failed: {}", e));
                Ok(AppendEntriesResult::failure(
                    self.term,
                    message_id,
                    AppendEntriesErrorReason::PersistenceFailure,
                ))
            }
        }
    }
}
