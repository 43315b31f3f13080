use crate::commitlog::{LogIndex, LogPayload, LogRange, LogTerm, PersistedLog, PersistingLogEntry, StorageError, TermIndexPair};
use crate::replica::algorithms::{calculate_commit_index, CommitFailReason, CommitIndexOptions, QuorumData};
use crate::replica::follower::{AppendEntriesError, AppendEntriesRequest, AppendEntriesResult, Follower};
use crate::replica::follower_info::{FollowerInfo, ResponseOutcome, SentRequest};
use crate::replica::in_memory_log::{InMemoryLog, InMemoryLogEntry, InMemoryLogIterator};
use crate::replica::local_follower::LocalFollower;
use crate::replica::peers::{ParticipantFlags, ParticipantId};
use crate::replica::scheduler::Scheduler;
use crate::replica::status::{FollowerStatistics, LeaderStatus, LocalStatistics};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaderError {
    #[error("Leader resigned")]
    Resigned,
    #[error("Leadership changed before the entry was committed")]
    LeaderChanged,
    #[error("Local storage failure")]
    Storage(#[from] StorageError),
}

#[derive(Clone, Debug)]
pub struct WaitForResult {
    pub commit_index: LogIndex,
    pub quorum: Arc<QuorumData>,
}

/// Committed user entries, internal entries are skipped.
pub struct CommittedEntries {
    range: LogRange,
    entries: InMemoryLogIterator,
}

impl CommittedEntries {
    fn new(log: &InMemoryLog, range: LogRange) -> Self {
        CommittedEntries {
            range,
            entries: log.slice(range).iter_from(range.from),
        }
    }

    /// The indexes covered, including internal entries.
    pub fn range(&self) -> LogRange {
        self.range
    }
}

impl Iterator for CommittedEntries {
    type Item = (LogIndex, LogPayload);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = self.entries.next()?;
            if let Some(payload) = entry.entry().payload() {
                return Some((entry.term_index_pair().index, payload.clone()));
            }
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct LeaderSettings {
    pub(crate) write_concern: usize,
    pub(crate) soft_write_concern: usize,
    pub(crate) wait_for_sync: bool,
    pub(crate) max_batch_bytes: usize,
    pub(crate) compaction_threshold: u64,
    pub(crate) append_entries_timeout: Duration,
}

pub(crate) struct LeaderParameters {
    pub(crate) logger: slog::Logger,
    pub(crate) id: ParticipantId,
    pub(crate) term: LogTerm,
    pub(crate) settings: LeaderSettings,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) local_follower: Arc<LocalFollower>,
    pub(crate) local_flags: ParticipantFlags,
    pub(crate) followers: Vec<(Arc<dyn Follower>, ParticipantFlags)>,
    // Everything the local storage holds.
    pub(crate) log: InMemoryLog,
}

// Commit advances of at least this many entries are logged at info level.
const LARGE_COMMIT_STEP: u64 = 1000;

type WaitForPromise = oneshot::Sender<Result<WaitForResult, LeaderError>>;

/// Leader replicates its log to every participant, itself included, and advances the commit
/// index once enough of them acknowledged.
///
/// A leader lives for exactly one term. After `resign` it refuses every operation, the next
/// leader is built from the storage handle `resign` returned.
pub struct Leader {
    logger: slog::Logger,
    id: ParticipantId,
    term: LogTerm,
    settings: LeaderSettings,
    scheduler: Arc<dyn Scheduler>,
    local_follower: Arc<LocalFollower>,
    resigned: CancellationToken,
    guarded: Mutex<GuardedLeaderData>,
}

struct GuardedLeaderData {
    in_memory_log: InMemoryLog,
    // The local follower comes first.
    follower_info: Vec<FollowerInfo>,
    commit_index: LogIndex,
    largest_common_index: LogIndex,
    release_index: LogIndex,
    last_quorum: Arc<QuorumData>,
    wait_for_queue: BTreeMap<LogIndex, Vec<WaitForPromise>>,
    commit_fail_reason: CommitFailReason,
    commit_fail_reason_since: DateTime<Utc>,
    did_resign: bool,
}

struct PreparedRequest {
    follower_index: usize,
    follower: Arc<dyn Follower>,
    request: AppendEntriesRequest,
    delay: Duration,
}

struct ResolvedPromises {
    promises: Vec<WaitForPromise>,
    result: WaitForResult,
}

impl ResolvedPromises {
    fn resolve(self) {
        for promise in self.promises {
            // The waiter may have lost interest.
            let _ = promise.send(Ok(self.result.clone()));
        }
    }
}

enum WaitFor {
    Ready(Result<WaitForResult, LeaderError>),
    Pending(oneshot::Receiver<Result<WaitForResult, LeaderError>>),
}

impl Leader {
    pub(crate) fn new(params: LeaderParameters) -> Arc<Self> {
        let logger = params.logger.new(slog::o!(
            "term" => params.term.as_u64(),
            "participant" => params.id.to_string(),
        ));
        let mut log = params.log;
        let spearhead = log.last_term_index_pair();

        let mut local_info = FollowerInfo::new(params.local_follower.clone(), params.local_flags, spearhead);
        local_info.assume_acked(spearhead);
        let mut follower_info = vec![local_info];
        for (follower, flags) in params.followers {
            follower_info.push(FollowerInfo::new(follower, flags, spearhead));
        }

        // Entries of older terms only commit together with one of the current term.
        let marker = TermIndexPair::new(params.term, log.next_index());
        log.append_in_place(InMemoryLogEntry::new(PersistingLogEntry::new(marker, None), true));
        slog::info!(
            logger,
            "Leader established with {} participants, log {:?} to {:?}",
            follower_info.len(),
            log.first_index(),
            marker
        );

        Arc::new(Leader {
            logger,
            id: params.id,
            term: params.term,
            settings: params.settings,
            scheduler: params.scheduler,
            local_follower: params.local_follower,
            resigned: CancellationToken::new(),
            guarded: Mutex::new(GuardedLeaderData {
                in_memory_log: log,
                follower_info,
                commit_index: LogIndex::zero(),
                largest_common_index: LogIndex::zero(),
                release_index: LogIndex::zero(),
                last_quorum: Arc::new(QuorumData::new(LogIndex::zero(), params.term, Vec::new())),
                wait_for_queue: BTreeMap::new(),
                commit_fail_reason: CommitFailReason::NothingToCommit,
                commit_fail_reason_since: Utc::now(),
                did_resign: false,
            }),
        })
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn term(&self) -> LogTerm {
        self.term
    }

    pub fn commit_index(&self) -> LogIndex {
        self.guarded.lock().commit_index
    }

    /// Appends `payload` and starts replicating it. Returns the index of the new entry, it is
    /// not committed yet.
    pub fn insert(self: &Arc<Self>, payload: LogPayload, wait_for_sync: bool) -> Result<LogIndex, LeaderError> {
        let index = self.insert_entry(Some(payload), wait_for_sync)?;
        self.trigger_async_replication();
        Ok(index)
    }

    /// Like `insert`, but replication only starts with the next `trigger_async_replication`.
    pub fn insert_deferred(&self, payload: LogPayload, wait_for_sync: bool) -> Result<LogIndex, LeaderError> {
        self.insert_entry(Some(payload), wait_for_sync)
    }

    fn insert_entry(&self, payload: Option<LogPayload>, wait_for_sync: bool) -> Result<LogIndex, LeaderError> {
        let mut guarded = self.guarded.lock();
        if guarded.did_resign {
            return Err(LeaderError::Resigned);
        }
        let index = guarded.in_memory_log.next_index();
        let entry = PersistingLogEntry::new(TermIndexPair::new(self.term, index), payload);
        guarded
            .in_memory_log
            .append_in_place(InMemoryLogEntry::new(entry, wait_for_sync));
        Ok(index)
    }

    pub fn trigger_async_replication(self: &Arc<Self>) {
        let requests = {
            let mut guarded = self.guarded.lock();
            if guarded.did_resign {
                return;
            }
            self.prepare_append_entries(&mut guarded)
        };
        self.execute_append_entries_requests(requests);
    }

    /// Resolves once `index` is committed. The registration happens immediately, not when the
    /// returned future is first polled.
    pub fn wait_for(&self, index: LogIndex) -> impl Future<Output = Result<WaitForResult, LeaderError>> + Send + 'static {
        let registered = self.register_wait_for(index);
        async move {
            match registered {
                WaitFor::Ready(result) => result,
                // The leader went away without resigning.
                WaitFor::Pending(rx) => rx.await.unwrap_or(Err(LeaderError::LeaderChanged)),
            }
        }
    }

    fn register_wait_for(&self, index: LogIndex) -> WaitFor {
        let mut guarded = self.guarded.lock();
        if guarded.did_resign {
            return WaitFor::Ready(Err(LeaderError::Resigned));
        }
        if index <= guarded.commit_index {
            return WaitFor::Ready(Ok(WaitForResult {
                commit_index: guarded.commit_index,
                quorum: guarded.last_quorum.clone(),
            }));
        }
        let (tx, rx) = oneshot::channel();
        guarded.wait_for_queue.entry(index).or_default().push(tx);
        WaitFor::Pending(rx)
    }

    /// Waits until at least one user entry at or after `index` is committed and returns every
    /// committed user entry from `index` on.
    pub fn wait_for_iterator(
        self: &Arc<Self>,
        index: LogIndex,
    ) -> impl Future<Output = Result<CommittedEntries, LeaderError>> + Send + 'static {
        let leader = self.clone();
        let first = leader.wait_for(index.max(LogIndex::start_index()));
        async move {
            let mut index = index.max(LogIndex::start_index());
            let mut committed = first.await?;
            loop {
                let next = {
                    let guarded = leader.guarded.lock();
                    if guarded.did_resign {
                        return Err(LeaderError::Resigned);
                    }
                    let commit_index = guarded.commit_index.max(committed.commit_index);
                    let range = LogRange::new(index, commit_index.plus(1));
                    if guarded.in_memory_log.contains_payload(range) {
                        return Ok(CommittedEntries::new(&guarded.in_memory_log, range));
                    }
                    commit_index.plus(1)
                };
                index = next;
                committed = leader.wait_for(index).await?;
            }
        }
    }

    /// The caller no longer needs entries up to `done_with`. They are compacted once enough of
    /// them piled up.
    pub fn release(&self, done_with: LogIndex) -> Result<(), LeaderError> {
        let compaction = {
            let mut guarded = self.guarded.lock();
            if guarded.did_resign {
                return Err(LeaderError::Resigned);
            }
            let release_index = done_with.min(guarded.commit_index);
            if release_index > guarded.release_index {
                guarded.release_index = release_index;
            }
            self.check_compaction(&mut guarded, false)
        };
        if let Some(stop) = compaction {
            self.schedule_compaction(stop);
        }
        Ok(())
    }

    /// Compacts everything that may be compacted right away. Returns the compacted range.
    pub async fn compact(&self) -> Result<LogRange, LeaderError> {
        let (first, stop) = {
            let mut guarded = self.guarded.lock();
            if guarded.did_resign {
                return Err(LeaderError::Resigned);
            }
            let first = guarded.in_memory_log.first_index();
            match self.check_compaction(&mut guarded, true) {
                Some(stop) => (first, stop),
                None => return Ok(LogRange::new(first, first)),
            }
        };
        self.local_follower.release(stop).await?;
        Ok(LogRange::new(first, stop))
    }

    pub fn get_status(&self) -> LeaderStatus {
        let sync_index = self.local_follower.storage().sync_index();
        let guarded = self.guarded.lock();
        let log = &guarded.in_memory_log;
        let spearhead = log.last_term_index_pair();
        let commit_lag = log
            .entry_by_index(guarded.commit_index.plus(1))
            .map(|entry| self.scheduler.now().saturating_duration_since(entry.insert_tp()))
            .unwrap_or_default();

        let followers = guarded
            .follower_info
            .iter()
            .map(|info| {
                let statistics = FollowerStatistics {
                    last_acked_entry: info.last_acked_entry(),
                    last_acked_commit_index: info.last_acked_commit_index(),
                    last_acked_largest_common_index: info.last_acked_lci(),
                    next_prev_log_index: info.next_prev_log_index(),
                    lag: spearhead.index.distance_from(info.last_acked_entry().index),
                    state: info.state(),
                    num_errors_since_last_answer: info.num_errors(),
                    last_error_reason: info.last_error_reason(),
                    last_message_id: info.last_sent_message_id(),
                    last_request_latency: info.last_request_latency(),
                };
                (info.id().clone(), statistics)
            })
            .collect();

        LeaderStatus {
            id: self.id.clone(),
            term: self.term,
            resigned: guarded.did_resign,
            local: LocalStatistics {
                spearhead,
                first_index: log.first_index(),
                commit_index: guarded.commit_index,
                largest_common_index: guarded.largest_common_index,
                release_index: guarded.release_index,
                sync_index,
            },
            commit_lag,
            last_commit_status: guarded.commit_fail_reason.clone(),
            last_commit_status_since: guarded.commit_fail_reason_since,
            last_quorum: (*guarded.last_quorum).clone(),
            lowest_index_to_keep: lowest_index_to_keep(&guarded),
            followers,
        }
    }

    /// Stops the leader. Pending `wait_for` calls fail with `LeaderChanged`, every later call
    /// with `Resigned`. Returns the local storage so the next leader can take it over.
    pub async fn resign(&self) -> Result<Arc<dyn PersistedLog>, LeaderError> {
        let waiting = {
            let mut guarded = self.guarded.lock();
            if guarded.did_resign {
                return Err(LeaderError::Resigned);
            }
            guarded.did_resign = true;
            std::mem::take(&mut guarded.wait_for_queue)
        };
        self.resigned.cancel();
        slog::info!(self.logger, "Leader resigned, failing {} waiting callers", waiting.len());

        for promise in waiting.into_values().flatten() {
            let _ = promise.send(Err(LeaderError::LeaderChanged));
        }

        self.local_follower
            .resign()
            .await
            .ok_or(LeaderError::Storage(StorageError::ParticipantGone))
    }

    fn prepare_append_entries(&self, guarded: &mut GuardedLeaderData) -> Vec<PreparedRequest> {
        let GuardedLeaderData {
            in_memory_log,
            follower_info,
            commit_index,
            largest_common_index,
            ..
        } = guarded;
        let spearhead = in_memory_log.last_index();

        let mut requests = Vec::new();
        for (follower_index, info) in follower_info.iter_mut().enumerate() {
            if !info.can_send() || !info.needs_update(spearhead, *commit_index, *largest_common_index) {
                continue;
            }
            let (message_id, delay) = info.prepare_request();
            let prev_log_entry = in_memory_log
                .term_index_pair_of(info.next_prev_log_index())
                .unwrap_or_else(|| in_memory_log.before_first());
            let (entries, entries_need_sync) = self.next_batch(in_memory_log, prev_log_entry.index);

            requests.push(PreparedRequest {
                follower_index,
                follower: info.follower(),
                delay,
                request: AppendEntriesRequest {
                    leader_term: self.term,
                    leader_id: self.id.clone(),
                    prev_log_entry,
                    leader_commit: *commit_index,
                    largest_common_index: *largest_common_index,
                    wait_for_sync: self.settings.wait_for_sync || entries_need_sync,
                    message_id,
                    entries,
                },
            });
        }
        requests
    }

    /// Entries after `prev`, at least one if there is any, up to `max_batch_bytes`.
    fn next_batch(&self, log: &InMemoryLog, prev: LogIndex) -> (InMemoryLog, bool) {
        let first = prev.plus(1);
        let mut next = first;
        let mut bytes = 0;
        let mut needs_sync = false;
        for entry in log.iter_from(first) {
            let size = entry.entry().approx_byte_size();
            if next > first && bytes + size > self.settings.max_batch_bytes {
                break;
            }
            bytes += size;
            needs_sync |= entry.wait_for_sync();
            next = next.plus(1);
        }
        (log.slice(LogRange::new(first, next)), needs_sync)
    }

    fn execute_append_entries_requests(self: &Arc<Self>, requests: Vec<PreparedRequest>) {
        for prepared in requests {
            let leader = Arc::downgrade(self);
            let scheduler = self.scheduler.clone();
            let resigned = self.resigned.clone();
            let logger = self.logger.new(slog::o!(
                "follower" => prepared.follower.participant_id().to_string(),
                "message_id" => prepared.request.message_id.as_u64(),
            ));
            let timeout = self.settings.append_entries_timeout;

            self.scheduler.queue(Box::pin(async move {
                let PreparedRequest {
                    follower_index,
                    follower,
                    request,
                    delay,
                } = prepared;

                if !delay.is_zero() {
                    slog::debug!(logger, "Backing off for {:?}", delay);
                    tokio::select! {
                        _ = scheduler.delay(delay) => {}
                        _ = resigned.cancelled() => return,
                    }
                }

                let sent = SentRequest::describe(&request);
                let started = match leader.upgrade().and_then(|l| l.mark_in_flight(follower_index, &sent)) {
                    Some(started) => started,
                    None => return,
                };
                slog::debug!(
                    logger,
                    "Sending append entries after {:?} with {} entries",
                    request.prev_log_entry,
                    request.entries.len()
                );

                let response = send_with_timeout(scheduler.as_ref(), follower.as_ref(), request, timeout).await;
                let latency = scheduler.now().saturating_duration_since(started);

                if let Some(leader) = Weak::upgrade(&leader) {
                    leader.handle_append_entries_response(&logger, follower_index, sent, response, latency);
                }
            }));
        }
    }

    fn mark_in_flight(&self, follower_index: usize, sent: &SentRequest) -> Option<std::time::Instant> {
        let mut guarded = self.guarded.lock();
        if guarded.did_resign {
            return None;
        }
        let now = self.scheduler.now();
        if guarded.follower_info[follower_index].mark_in_flight(sent.message_id, now) {
            Some(now)
        } else {
            None
        }
    }

    fn handle_append_entries_response(
        self: &Arc<Self>,
        logger: &slog::Logger,
        follower_index: usize,
        sent: SentRequest,
        response: Result<AppendEntriesResult, AppendEntriesError>,
        latency: Duration,
    ) {
        let (resolved, compaction, requests) = {
            let mut guarded = self.guarded.lock();
            if guarded.did_resign {
                slog::debug!(logger, "Ignoring response, leader resigned");
                return;
            }

            let outcome = {
                let GuardedLeaderData {
                    follower_info,
                    in_memory_log,
                    ..
                } = &mut *guarded;
                follower_info[follower_index].handle_response(logger, sent, response, latency, in_memory_log)
            };
            if outcome == ResponseOutcome::Stale {
                return;
            }
            slog::debug!(logger, "Append entries answered: {:?} after {:?}", outcome, latency);

            let resolved = if outcome == ResponseOutcome::Success {
                self.check_commit_index(&mut guarded)
            } else {
                None
            };
            self.update_largest_common_index(&mut guarded);
            let compaction = self.check_compaction(&mut guarded, false);
            (resolved, compaction, self.prepare_append_entries(&mut guarded))
        };

        if let Some(resolved) = resolved {
            resolved.resolve();
        }
        if let Some(stop) = compaction {
            self.schedule_compaction(stop);
        }
        self.execute_append_entries_requests(requests);
    }

    fn check_commit_index(&self, guarded: &mut GuardedLeaderData) -> Option<ResolvedPromises> {
        let participants: Vec<_> = guarded
            .follower_info
            .iter()
            .map(FollowerInfo::participant_state)
            .collect();
        let options = CommitIndexOptions {
            write_concern: self.settings.write_concern,
            soft_write_concern: self.settings.soft_write_concern,
            participant_count: participants.len(),
        };
        let spearhead = guarded.in_memory_log.last_term_index_pair();
        let (commit_index, reason, quorum) =
            calculate_commit_index(&participants, options, guarded.commit_index, spearhead);

        if reason != guarded.commit_fail_reason {
            slog::debug!(self.logger, "Commit status changed to {:?}", reason);
            guarded.commit_fail_reason = reason;
            guarded.commit_fail_reason_since = Utc::now();
        }
        if commit_index <= guarded.commit_index {
            return None;
        }

        let previous = guarded.commit_index;
        if commit_index.distance_from(previous) >= LARGE_COMMIT_STEP {
            slog::info!(self.logger, "Commit index advanced from {:?} to {:?}", previous, commit_index);
        } else {
            slog::debug!(self.logger, "Commit index advanced from {:?} to {:?}", previous, commit_index);
        }
        let quorum = Arc::new(QuorumData::new(commit_index, self.term, quorum));
        guarded.commit_index = commit_index;
        guarded.last_quorum = quorum.clone();

        let still_waiting = guarded.wait_for_queue.split_off(&commit_index.plus(1));
        let committed = std::mem::replace(&mut guarded.wait_for_queue, still_waiting);
        Some(ResolvedPromises {
            promises: committed.into_values().flatten().collect(),
            result: WaitForResult { commit_index, quorum },
        })
    }

    fn update_largest_common_index(&self, guarded: &mut GuardedLeaderData) {
        let lci = guarded
            .follower_info
            .iter()
            .map(FollowerInfo::last_acked_commit_index)
            .min()
            .unwrap_or_default();
        if lci > guarded.largest_common_index {
            slog::debug!(self.logger, "Largest common index advanced to {:?}", lci);
            guarded.largest_common_index = lci;
        }
    }

    /// Releases the in-memory prefix that may be compacted and returns where the local log
    /// has to be cut. Without `force`, only once `compaction_threshold` entries piled up.
    fn check_compaction(&self, guarded: &mut GuardedLeaderData, force: bool) -> Option<LogIndex> {
        let stop = lowest_index_to_keep(guarded);
        let first = guarded.in_memory_log.first_index();
        if stop <= first {
            return None;
        }
        if !force && stop.distance_from(first) < self.settings.compaction_threshold {
            return None;
        }
        slog::info!(self.logger, "Compacting log from {:?} up to {:?}", first, stop);
        guarded.in_memory_log = guarded.in_memory_log.release(stop);
        Some(stop)
    }

    fn schedule_compaction(&self, stop: LogIndex) {
        let local_follower = self.local_follower.clone();
        self.scheduler.queue(Box::pin(async move {
            // Failures are logged by the follower, the next compaction covers this range again.
            let _ = local_follower.release(stop).await;
        }));
    }
}

impl Drop for Leader {
    fn drop(&mut self) {
        self.resigned.cancel();
    }
}

fn lowest_index_to_keep(guarded: &GuardedLeaderData) -> LogIndex {
    guarded
        .largest_common_index
        .min(guarded.release_index.plus(1))
}

async fn send_with_timeout(
    scheduler: &dyn Scheduler,
    follower: &dyn Follower,
    request: AppendEntriesRequest,
    timeout: Duration,
) -> Result<AppendEntriesResult, AppendEntriesError> {
    tokio::select! {
        response = follower.append_entries(request) => response,
        _ = scheduler.request_deadline(timeout) => Err(AppendEntriesError::Timeout(timeout)),
    }
}
