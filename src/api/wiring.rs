use crate::api::options::{LeaderOptionsValidated, LogConfig};
use crate::commitlog::{LogIndex, LogMetadata, LogTerm, PersistedLog, StorageError};
use crate::replica::{
    abort_on_fatal_error, FatalErrorHandler, Follower, InMemoryLog, Leader, LeaderParameters, LeaderSettings,
    LocalFollower, ParticipantFlags, ParticipantId, Scheduler, TokioScheduler,
};
use crate::storage_manager::StorageManager;
use crate::LeaderOptions;
use std::collections::{HashMap, HashSet};
use std::convert::TryFrom;
use std::sync::Arc;

pub struct LeaderConfig {
    pub logger: slog::Logger,
    pub my_id: ParticipantId,
    pub term: LogTerm,
    pub log_config: LogConfig,
    pub options: LeaderOptions,
    // The local durable log. Whatever it holds becomes the start of the leader's log.
    pub persisted_log: Arc<dyn PersistedLog>,
    pub followers: Vec<Arc<dyn Follower>>,
    // Participants without an entry get `ParticipantFlags::default()`.
    pub participant_flags: HashMap<ParticipantId, ParticipantFlags>,
    pub scheduler: Option<Arc<dyn Scheduler>>,
    pub fatal_error_handler: Option<FatalErrorHandler>,
}

#[derive(Debug, thiserror::Error)]
pub enum LeaderCreationError {
    #[error("Illegal options for configuring leader: {0}")]
    IllegalOptions(String),
    #[error("Local storage failure")]
    Storage(#[from] StorageError),
    #[error("Participant {0} is configured more than once")]
    DuplicateParticipant(ParticipantId),
    #[error("Term {term:?} is not newer than the stored term {stored:?}")]
    TermNotIncreasing { term: LogTerm, stored: LogTerm },
}

/// Loads the local log, records the new term in its metadata and starts replicating. The
/// returned leader has already appended the entry that establishes its term.
pub async fn try_create_leader(config: LeaderConfig) -> Result<Arc<Leader>, LeaderCreationError> {
    let root_logger = config.logger;

    config
        .log_config
        .validate()
        .map_err(|e| LeaderCreationError::IllegalOptions(e.to_string()))?;
    let options = LeaderOptionsValidated::try_from(config.options)
        .map_err(|e| LeaderCreationError::IllegalOptions(e.to_string()))?;

    let mut participants = HashSet::new();
    participants.insert(config.my_id.clone());
    for follower in &config.followers {
        if !participants.insert(follower.participant_id().clone()) {
            return Err(LeaderCreationError::DuplicateParticipant(
                follower.participant_id().clone(),
            ));
        }
    }

    let metadata = config.persisted_log.read_metadata()?;
    if config.term <= metadata.term {
        return Err(LeaderCreationError::TermNotIncreasing {
            term: config.term,
            stored: metadata.term,
        });
    }

    let scheduler: Arc<dyn Scheduler> = match config.scheduler {
        Some(scheduler) => scheduler,
        None => Arc::new(TokioScheduler),
    };

    let log = InMemoryLog::load(config.persisted_log.read(LogIndex::zero())?);
    let storage_logger = root_logger.new(slog::o!("participant" => config.my_id.to_string()));
    let storage = StorageManager::new(
        storage_logger,
        scheduler.clone(),
        config.persisted_log,
        log.compute_term_index_map(),
    )?;

    let metadata_updated = storage.transaction().update_metadata(LogMetadata {
        term: config.term,
        ..metadata
    });
    metadata_updated.await?;

    let on_fatal_error = config
        .fatal_error_handler
        .unwrap_or_else(|| abort_on_fatal_error(root_logger.clone()));
    let local_follower = Arc::new(LocalFollower::new(
        root_logger.clone(),
        config.my_id.clone(),
        config.term,
        storage,
        on_fatal_error,
    ));

    let flags_of = |id: &ParticipantId| config.participant_flags.get(id).copied().unwrap_or_default();
    let local_flags = flags_of(&config.my_id);
    let followers = config
        .followers
        .into_iter()
        .map(|follower| {
            let flags = flags_of(follower.participant_id());
            (follower, flags)
        })
        .collect();

    let leader = Leader::new(LeaderParameters {
        logger: root_logger,
        id: config.my_id,
        term: config.term,
        settings: LeaderSettings {
            write_concern: config.log_config.write_concern,
            soft_write_concern: config.log_config.soft_write_concern,
            wait_for_sync: config.log_config.wait_for_sync,
            max_batch_bytes: options.max_batch_bytes,
            compaction_threshold: options.compaction_threshold,
            append_entries_timeout: options.append_entries_timeout,
        },
        scheduler,
        local_follower,
        local_flags,
        followers,
        log,
    });
    leader.trigger_async_replication();

    Ok(leader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::{InMemoryPersistedLog, LogPayload, PersistingLogEntry, TermIndexPair};
    use crate::test_utils::{test_logger, FakeFollower};

    fn config(term: u64, persisted_log: Arc<dyn PersistedLog>, followers: Vec<Arc<dyn Follower>>) -> LeaderConfig {
        LeaderConfig {
            logger: test_logger(),
            my_id: ParticipantId::new("A"),
            term: LogTerm::new(term),
            log_config: LogConfig::default(),
            options: LeaderOptions::default(),
            persisted_log,
            followers,
            participant_flags: HashMap::new(),
            scheduler: None,
            fatal_error_handler: None,
        }
    }

    #[tokio::test]
    async fn records_term_and_continues_stored_log() {
        let entries = vec![
            PersistingLogEntry::new(TermIndexPair::new(LogTerm::new(1), LogIndex::new(1)), Some(LogPayload::from("a"))),
            PersistingLogEntry::new(TermIndexPair::new(LogTerm::new(1), LogIndex::new(2)), Some(LogPayload::from("b"))),
        ];
        let metadata = LogMetadata {
            term: LogTerm::new(1),
            snapshot_available: true,
        };
        let core = Arc::new(InMemoryPersistedLog::with_entries(entries, metadata));

        let leader = try_create_leader(config(2, core.clone(), Vec::new())).await.unwrap();

        assert_eq!(core.read_metadata().unwrap().term, LogTerm::new(2));
        assert_eq!(
            leader.get_status().local.spearhead,
            TermIndexPair::new(LogTerm::new(2), LogIndex::new(3))
        );
        // Committing the marker commits the stored entries.
        let committed = tokio::time::timeout(std::time::Duration::from_secs(5), leader.wait_for(LogIndex::new(1)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(committed.commit_index, LogIndex::new(3));
    }

    #[tokio::test]
    async fn rejects_stale_term() {
        let metadata = LogMetadata {
            term: LogTerm::new(5),
            snapshot_available: true,
        };
        let core = Arc::new(InMemoryPersistedLog::with_entries(Vec::new(), metadata));

        let result = try_create_leader(config(5, core, Vec::new())).await;

        assert!(matches!(
            result,
            Err(LeaderCreationError::TermNotIncreasing { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_duplicate_participants() {
        let followers: Vec<Arc<dyn Follower>> = vec![Arc::new(FakeFollower::new("B")), Arc::new(FakeFollower::new("B"))];

        let result = try_create_leader(config(1, Arc::new(InMemoryPersistedLog::new()), followers)).await;

        assert!(matches!(
            result,
            Err(LeaderCreationError::DuplicateParticipant(id)) if id == ParticipantId::new("B")
        ));
    }

    #[tokio::test]
    async fn rejects_illegal_options() {
        let mut config = config(1, Arc::new(InMemoryPersistedLog::new()), Vec::new());
        config.log_config.write_concern = 0;

        let result = try_create_leader(config).await;

        assert!(matches!(result, Err(LeaderCreationError::IllegalOptions(_))));
    }
}
