use crate::commitlog::{
    InMemoryPersistedLog, LogIndex, LogMetadata, LogTerm, PersistedLog, PersistedLogIterator, PersistingLogEntry,
    SequenceNumber, StorageError, StorageResult, TermIndexMapping, TermIndexPair, WriteOptions,
};
use crate::replica::{
    detect_conflict, AppendEntriesError, AppendEntriesRequest, AppendEntriesResult, Follower, MessageId,
    ParticipantId, ScheduledTask, Scheduler,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

pub(crate) fn test_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RecordedOp {
    // First and last index of the inserted entries.
    Insert(u64, u64),
    RemoveFront(LogIndex),
    RemoveBack(LogIndex),
    UpdateMetadata(LogMetadata),
    Compact,
}

/// Holds callers until it is opened, stays open afterwards.
struct Gate {
    open: AtomicBool,
    opened: Notify,
}

impl Gate {
    fn new() -> Self {
        Gate {
            open: AtomicBool::new(false),
            opened: Notify::new(),
        }
    }

    fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.opened.notify_waiters();
    }

    async fn pass(&self) {
        loop {
            let opened = self.opened.notified();
            if self.open.load(Ordering::SeqCst) {
                return;
            }
            opened.await;
        }
    }
}

/// In-memory storage that records every successful mutation. Can fail one operation, hold
/// every operation until the gate is opened, or hold every sync.
pub(crate) struct RecordingPersistedLog {
    inner: InMemoryPersistedLog,
    ops: Mutex<Vec<RecordedOp>>,
    num_ops: AtomicUsize,
    fail_at: Option<usize>,
    operation_gate: Option<Gate>,
    sync_gate: Option<Gate>,
    operation_started: Notify,
}

impl RecordingPersistedLog {
    pub(crate) fn new() -> Self {
        Self::build(InMemoryPersistedLog::new(), None)
    }

    pub(crate) fn with_entries(entries: Vec<PersistingLogEntry>, metadata: LogMetadata) -> Self {
        Self::build(InMemoryPersistedLog::with_entries(entries, metadata), None)
    }

    /// The `n`-th mutation (counting from zero) fails.
    pub(crate) fn failing_at(n: usize) -> Self {
        Self::build(InMemoryPersistedLog::new(), Some(n))
    }

    pub(crate) fn gated() -> Self {
        RecordingPersistedLog {
            operation_gate: Some(Gate::new()),
            ..Self::new()
        }
    }

    /// Writes succeed, but `wait_for_sync` only resolves after `release_syncs`.
    pub(crate) fn holding_syncs() -> Self {
        RecordingPersistedLog {
            sync_gate: Some(Gate::new()),
            ..Self::new()
        }
    }

    fn build(inner: InMemoryPersistedLog, fail_at: Option<usize>) -> Self {
        RecordingPersistedLog {
            inner,
            ops: Mutex::new(Vec::new()),
            num_ops: AtomicUsize::new(0),
            fail_at,
            operation_gate: None,
            sync_gate: None,
            operation_started: Notify::new(),
        }
    }

    pub(crate) fn recorded_ops(&self) -> Vec<RecordedOp> {
        self.ops.lock().clone()
    }

    pub(crate) fn entries(&self) -> Vec<PersistingLogEntry> {
        self.inner.entries()
    }

    pub(crate) async fn wait_until_operation_started(&self) {
        self.operation_started.notified().await;
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.operation_gate {
            gate.open();
        }
    }

    pub(crate) fn release_syncs(&self) {
        if let Some(gate) = &self.sync_gate {
            gate.open();
        }
    }

    async fn start_operation(&self) -> StorageResult<()> {
        self.operation_started.notify_one();
        if let Some(gate) = &self.operation_gate {
            gate.pass().await;
        }

        let n = self.num_ops.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(n) {
            return Err(StorageError::Backend(format!("injected failure of operation {}", n)));
        }
        Ok(())
    }

    fn record(&self, op: RecordedOp) {
        self.ops.lock().push(op);
    }
}

#[async_trait::async_trait]
impl PersistedLog for RecordingPersistedLog {
    async fn insert(&self, entries: PersistedLogIterator, options: WriteOptions) -> StorageResult<SequenceNumber> {
        self.start_operation().await?;
        let entries: Vec<_> = entries.collect();
        let range = match (entries.first(), entries.last()) {
            (Some(first), Some(last)) => Some((first.index().as_u64(), last.index().as_u64())),
            _ => None,
        };
        let seq = self.inner.insert(Box::new(entries.into_iter()), options).await?;
        if let Some((first, last)) = range {
            self.record(RecordedOp::Insert(first, last));
        }
        Ok(seq)
    }

    async fn remove_front(&self, stop: LogIndex, options: WriteOptions) -> StorageResult<SequenceNumber> {
        self.start_operation().await?;
        let seq = self.inner.remove_front(stop, options).await?;
        self.record(RecordedOp::RemoveFront(stop));
        Ok(seq)
    }

    async fn remove_back(&self, start: LogIndex, options: WriteOptions) -> StorageResult<SequenceNumber> {
        self.start_operation().await?;
        let seq = self.inner.remove_back(start, options).await?;
        self.record(RecordedOp::RemoveBack(start));
        Ok(seq)
    }

    fn read(&self, first: LogIndex) -> StorageResult<PersistedLogIterator> {
        self.inner.read(first)
    }

    fn read_metadata(&self) -> StorageResult<LogMetadata> {
        self.inner.read_metadata()
    }

    fn update_metadata(&self, metadata: LogMetadata) -> StorageResult<()> {
        let n = self.num_ops.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(n) {
            return Err(StorageError::Backend(format!("injected failure of operation {}", n)));
        }
        self.inner.update_metadata(metadata.clone())?;
        self.record(RecordedOp::UpdateMetadata(metadata));
        Ok(())
    }

    async fn wait_for_sync(&self, sequence_number: SequenceNumber) -> StorageResult<()> {
        if let Some(gate) = &self.sync_gate {
            gate.pass().await;
        }
        self.inner.wait_for_sync(sequence_number).await
    }

    fn wait_for_completion(&self) {}

    fn drop_log(&self) -> StorageResult<()> {
        self.inner.drop_log()
    }

    async fn compact(&self) -> StorageResult<()> {
        self.inner.compact().await?;
        self.record(RecordedOp::Compact);
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ReceivedRequest {
    pub(crate) message_id: MessageId,
    pub(crate) prev_log_entry: TermIndexPair,
    pub(crate) num_entries: usize,
    pub(crate) leader_commit: LogIndex,
    pub(crate) largest_common_index: LogIndex,
    pub(crate) wait_for_sync: bool,
}

struct FakeFollowerState {
    mapping: TermIndexMapping,
    requests: Vec<ReceivedRequest>,
    failures_left: usize,
}

/// Follower that keeps only the term/index layout of its log, but otherwise answers like a real
/// one.
pub(crate) struct FakeFollower {
    id: ParticipantId,
    term: Mutex<Option<LogTerm>>,
    state: Mutex<FakeFollowerState>,
    gated: bool,
    gate: Semaphore,
}

impl FakeFollower {
    pub(crate) fn new(id: &str) -> Self {
        Self::build(id, TermIndexMapping::new(), 0, false)
    }

    pub(crate) fn with_log(id: &str, entries: &[(u64, u64)]) -> Self {
        let mut mapping = TermIndexMapping::new();
        for &(term, index) in entries {
            mapping.insert_entry(TermIndexPair::new(LogTerm::new(term), LogIndex::new(index)));
        }
        Self::build(id, mapping, 0, false)
    }

    /// The first `n` requests fail with a communication error.
    pub(crate) fn failing(id: &str, n: usize) -> Self {
        Self::build(id, TermIndexMapping::new(), n, false)
    }

    /// Requests are held until `open_gate` is called.
    pub(crate) fn gated(id: &str) -> Self {
        Self::build(id, TermIndexMapping::new(), 0, true)
    }

    fn build(id: &str, mapping: TermIndexMapping, failures: usize, gated: bool) -> Self {
        FakeFollower {
            id: ParticipantId::new(id),
            term: Mutex::new(None),
            state: Mutex::new(FakeFollowerState {
                mapping,
                requests: Vec::new(),
                failures_left: failures,
            }),
            gated,
            gate: Semaphore::new(0),
        }
    }

    pub(crate) fn open_gate(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    /// Lets `n` more held requests through.
    pub(crate) fn allow(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub(crate) fn mapping(&self) -> TermIndexMapping {
        self.state.lock().mapping.clone()
    }

    pub(crate) fn requests(&self) -> Vec<ReceivedRequest> {
        self.state.lock().requests.clone()
    }

    fn answer(&self, request: &AppendEntriesRequest) -> Result<AppendEntriesResult, AppendEntriesError> {
        let mut state = self.state.lock();
        state.requests.push(ReceivedRequest {
            message_id: request.message_id,
            prev_log_entry: request.prev_log_entry,
            num_entries: request.entries.len(),
            leader_commit: request.leader_commit,
            largest_common_index: request.largest_common_index,
            wait_for_sync: request.wait_for_sync,
        });
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(AppendEntriesError::Communication("connection refused".to_string()));
        }

        let term = *self.term.lock().get_or_insert(request.leader_term);
        if request.prev_log_entry.index > LogIndex::zero() {
            if let Some((_, conflict)) = detect_conflict(&state.mapping, request.prev_log_entry) {
                return Ok(AppendEntriesResult::with_conflict(term, request.message_id, conflict));
            }
        }

        if !request.entries.is_empty() {
            let first = request.entries.first_index();
            if state.mapping.next_index().map_or(false, |next| next > first) {
                state.mapping.remove_back(first);
            }
            for entry in request.entries.iter_from(first) {
                state.mapping.insert_entry(entry.term_index_pair());
            }
        }
        Ok(AppendEntriesResult::success(term, request.message_id))
    }
}

#[async_trait::async_trait]
impl Follower for FakeFollower {
    fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, AppendEntriesError> {
        if self.gated {
            self.gate
                .acquire()
                .await
                .map_err(|e| AppendEntriesError::Communication(e.to_string()))?
                .forget();
        }
        self.answer(&request)
    }
}

/// Runs tasks on tokio but skips every backoff delay, remembering how long it would have waited.
/// Request deadlines are real.
#[derive(Default)]
pub(crate) struct RecordingScheduler {
    delays: Mutex<Vec<Duration>>,
    deadlines: Mutex<Vec<Duration>>,
    num_queued: AtomicUsize,
}

impl RecordingScheduler {
    pub(crate) fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }

    pub(crate) fn deadlines(&self) -> Vec<Duration> {
        self.deadlines.lock().clone()
    }

    pub(crate) fn num_queued(&self) -> usize {
        self.num_queued.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Scheduler for RecordingScheduler {
    fn queue(&self, task: ScheduledTask) {
        self.num_queued.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(task);
    }

    async fn delay(&self, duration: Duration) {
        self.delays.lock().push(duration);
        tokio::task::yield_now().await;
    }

    async fn request_deadline(&self, duration: Duration) {
        self.deadlines.lock().push(duration);
        tokio::time::sleep(duration).await;
    }
}
