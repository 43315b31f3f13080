use replicated_log::{
    abort_on_fatal_error, AppendEntriesError, AppendEntriesErrorReason, AppendEntriesRequest, AppendEntriesResult,
    Follower, InMemoryLog, InMemoryPersistedLog, LeaderConfig, LeaderOptions, LocalFollower, LogConfig, LogIndex,
    LogPayload, LogTerm, ParticipantId, PersistedLog, StorageManager, TermIndexPair, TokioScheduler,
};
use slog::Drain;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

const SANITY_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn replicate_commit_and_hand_over() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger_for_stdout("A".to_string());
    let leader_log: Arc<dyn PersistedLog> = Arc::new(InMemoryPersistedLog::new());
    let follower_logs: Vec<Arc<dyn PersistedLog>> = vec![
        Arc::new(InMemoryPersistedLog::new()),
        Arc::new(InMemoryPersistedLog::new()),
    ];

    let followers = storage_followers(&["B", "C"], &follower_logs, 1)?;
    let leader = replicated_log::try_create_leader(config(logger.clone(), 1, leader_log, &followers)).await?;

    let mut last = LogIndex::zero();
    for data in ["Hello world", "it's me", "again"] {
        last = leader.insert(LogPayload::from(data), false)?;
    }
    // Index 1 is the leadership marker.
    assert_eq!(last, LogIndex::new(4));

    let committed = tokio::time::timeout(SANITY_TIMEOUT, leader.wait_for(last)).await??;
    assert!(committed.commit_index >= last);
    assert!(committed.quorum.quorum.len() >= 2);

    let entries: Vec<_> = tokio::time::timeout(SANITY_TIMEOUT, leader.wait_for_iterator(LogIndex::new(1)))
        .await??
        .collect();
    assert_eq!(
        entries,
        vec![
            (LogIndex::new(2), LogPayload::from("Hello world")),
            (LogIndex::new(3), LogPayload::from("it's me")),
            (LogIndex::new(4), LogPayload::from("again")),
        ]
    );

    let status = leader.get_status();
    println!("Leader status: {:?}", status);
    assert_eq!(status.local.spearhead, TermIndexPair::new(LogTerm::new(1), last));
    assert_eq!(status.followers.len(), 3);

    // The next leader continues on the same storage.
    let leader_log = leader.resign().await?;
    for follower in followers {
        follower.resign().await.ok_or("follower storage already released")?;
    }
    let successor_followers = storage_followers(&["B", "C"], &follower_logs, 2)?;

    let successor =
        replicated_log::try_create_leader(config(logger.clone(), 2, leader_log, &successor_followers)).await?;
    assert_eq!(
        successor.get_status().local.spearhead,
        TermIndexPair::new(LogTerm::new(2), LogIndex::new(5))
    );

    let entries: Vec<_> = tokio::time::timeout(SANITY_TIMEOUT, successor.wait_for_iterator(LogIndex::new(2)))
        .await??
        .map(|(index, _)| index)
        .collect();
    assert_eq!(entries, vec![LogIndex::new(2), LogIndex::new(3), LogIndex::new(4)]);

    let index = successor.insert(LogPayload::from("new term"), true)?;
    let committed = tokio::time::timeout(SANITY_TIMEOUT, successor.wait_for(index)).await??;
    assert_eq!(committed.quorum.term, LogTerm::new(2));

    Ok(())
}

#[tokio::test]
async fn silent_follower_does_not_block_commit() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger_for_stdout("A".to_string());
    let follower_logs: Vec<Arc<dyn PersistedLog>> = vec![Arc::new(InMemoryPersistedLog::new())];
    let mut followers: Vec<Arc<dyn Follower>> = storage_followers(&["B"], &follower_logs, 1)?
        .into_iter()
        .map(|f| f as Arc<dyn Follower>)
        .collect();
    followers.push(Arc::new(SilentFollower {
        id: ParticipantId::new("C"),
    }));

    let leader = replicated_log::try_create_leader(LeaderConfig {
        logger,
        my_id: ParticipantId::new("A"),
        term: LogTerm::new(1),
        log_config: LogConfig {
            write_concern: 2,
            soft_write_concern: 3,
            wait_for_sync: false,
        },
        options: LeaderOptions {
            append_entries_timeout: Some(Duration::from_millis(50)),
            ..LeaderOptions::default()
        },
        persisted_log: Arc::new(InMemoryPersistedLog::new()),
        followers,
        participant_flags: HashMap::new(),
        scheduler: None,
        fatal_error_handler: None,
    })
    .await?;

    let index = leader.insert(LogPayload::from("Hello world"), false)?;
    tokio::time::timeout(SANITY_TIMEOUT, leader.wait_for(index)).await??;

    let deadline = Instant::now() + SANITY_TIMEOUT;
    loop {
        let status = leader.get_status();
        let silent = &status.followers[&ParticipantId::new("C")];
        if silent.num_errors_since_last_answer > 0 {
            assert_eq!(silent.last_error_reason, Some(AppendEntriesErrorReason::CommunicationError));
            assert_eq!(silent.last_acked_entry, TermIndexPair::default());
            break;
        }
        assert!(Instant::now() < deadline, "Silent follower never timed out");
        sleep(Duration::from_millis(10)).await;
    }

    leader.resign().await?;
    Ok(())
}

/// Followers backed by their own storage, as they would run on another host.
fn storage_followers(
    ids: &[&str],
    logs: &[Arc<dyn PersistedLog>],
    term: u64,
) -> Result<Vec<Arc<LocalFollower>>, Box<dyn Error>> {
    let mut followers = Vec::with_capacity(ids.len());
    for (id, log) in ids.iter().zip(logs) {
        let logger = create_root_logger_for_stdout(id.to_string());
        let mapping = InMemoryLog::load(log.read(LogIndex::zero())?).compute_term_index_map();
        let storage = StorageManager::new(logger.clone(), Arc::new(TokioScheduler), log.clone(), mapping)?;
        followers.push(Arc::new(LocalFollower::new(
            logger.clone(),
            ParticipantId::new(*id),
            LogTerm::new(term),
            storage,
            abort_on_fatal_error(logger),
        )));
    }
    Ok(followers)
}

fn config(
    logger: slog::Logger,
    term: u64,
    persisted_log: Arc<dyn PersistedLog>,
    followers: &[Arc<LocalFollower>],
) -> LeaderConfig {
    LeaderConfig {
        logger,
        my_id: ParticipantId::new("A"),
        term: LogTerm::new(term),
        log_config: LogConfig {
            write_concern: 2,
            soft_write_concern: 3,
            wait_for_sync: false,
        },
        options: LeaderOptions::default(),
        persisted_log,
        followers: followers.iter().map(|f| f.clone() as Arc<dyn Follower>).collect(),
        participant_flags: HashMap::new(),
        scheduler: None,
        fatal_error_handler: None,
    }
}

/// Never answers.
struct SilentFollower {
    id: ParticipantId,
}

#[async_trait::async_trait]
impl Follower for SilentFollower {
    fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    async fn append_entries(&self, _request: AppendEntriesRequest) -> Result<AppendEntriesResult, AppendEntriesError> {
        std::future::pending().await
    }
}

fn create_root_logger_for_stdout(participant_id: String) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("ParticipantId" => participant_id))
}

async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}
