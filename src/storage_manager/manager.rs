use crate::commitlog::{
    LogIndex, LogMetadata, PersistedLog, PersistedLogIterator, SequenceNumber, StorageError, StorageResult,
    TermIndexMapping, WriteOptions,
};
use crate::replica::{InMemoryLog, Scheduler};
use crate::storage_manager::StorageFuture;
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};

/// StorageManager owns the durable log and applies writes to it strictly in the order they were
/// enqueued, one at a time, from a background worker.
///
/// It tracks two views of the log:
/// - the spearhead mapping includes every enqueued operation, it is updated when an operation
///   is enqueued,
/// - the on-disk mapping only includes operations the storage engine confirmed.
///
/// A failing operation fails every operation queued behind it with `SubsequentFault` and rolls
/// the spearhead back to what is on disk. Nothing is retried.
///
/// The worker and the sync watchers run on the given scheduler.
pub struct StorageManager {
    logger: slog::Logger,
    scheduler: Arc<dyn Scheduler>,
    guarded: Mutex<GuardedStorageData>,
    worker_idle: Notify,
}

struct GuardedStorageData {
    // None once the manager resigned.
    core: Option<Arc<dyn PersistedLog>>,
    queue: VecDeque<StorageRequest>,
    worker_active: bool,
    // Inserts whose sync is still awaited. Each of them holds on to the core.
    pending_syncs: usize,
    spearhead_mapping: TermIndexMapping,
    on_disk_mapping: TermIndexMapping,
    spearhead_metadata: LogMetadata,
    on_disk_metadata: LogMetadata,
    sync_index: LogIndex,
}

struct StorageRequest {
    action: StorageAction,
    mapping_result: TermIndexMapping,
    promise: oneshot::Sender<StorageResult<()>>,
}

enum StorageAction {
    Insert {
        entries: PersistedLogIterator,
        options: WriteOptions,
        last_index: LogIndex,
    },
    RemoveFront {
        stop: LogIndex,
    },
    RemoveBack {
        start: LogIndex,
    },
    UpdateMetadata(LogMetadata),
    Compact,
}

impl StorageAction {
    fn name(&self) -> &'static str {
        match self {
            StorageAction::Insert { .. } => "insert",
            StorageAction::RemoveFront { .. } => "remove_front",
            StorageAction::RemoveBack { .. } => "remove_back",
            StorageAction::UpdateMetadata(_) => "update_metadata",
            StorageAction::Compact => "compact",
        }
    }
}

// How far an applied insert got towards disk.
enum InsertSync {
    Synced(LogIndex),
    Pending(SequenceNumber, LogIndex),
}

impl StorageManager {
    /// `mapping` must describe what `core` currently holds.
    pub fn new(
        logger: slog::Logger,
        scheduler: Arc<dyn Scheduler>,
        core: Arc<dyn PersistedLog>,
        mapping: TermIndexMapping,
    ) -> StorageResult<Arc<Self>> {
        let metadata = core.read_metadata()?;
        let sync_index = mapping.last_index().map(|last| last.index).unwrap_or_default();

        Ok(Arc::new(StorageManager {
            logger,
            scheduler,
            guarded: Mutex::new(GuardedStorageData {
                core: Some(core),
                queue: VecDeque::new(),
                worker_active: false,
                pending_syncs: 0,
                spearhead_mapping: mapping.clone(),
                on_disk_mapping: mapping,
                spearhead_metadata: metadata.clone(),
                on_disk_metadata: metadata,
                sync_index,
            }),
            worker_idle: Notify::new(),
        }))
    }

    /// Starts a transaction. Operations enqueued through it are applied in the order they are
    /// called, after everything enqueued before.
    ///
    /// The transaction holds the manager's lock. Drop it before awaiting its futures.
    pub fn transaction(self: &Arc<Self>) -> StorageTransaction<'_> {
        StorageTransaction {
            manager: self,
            guard: self.guarded.lock(),
        }
    }

    pub fn spearhead_mapping(&self) -> TermIndexMapping {
        self.guarded.lock().spearhead_mapping.clone()
    }

    pub fn on_disk_mapping(&self) -> TermIndexMapping {
        self.guarded.lock().on_disk_mapping.clone()
    }

    /// Highest index known to be synced to disk.
    pub fn sync_index(&self) -> LogIndex {
        self.guarded.lock().sync_index
    }

    pub fn metadata(&self) -> LogMetadata {
        self.guarded.lock().spearhead_metadata.clone()
    }

    fn update_sync_index(guarded: &mut GuardedStorageData, index: LogIndex) {
        if index > guarded.sync_index {
            guarded.sync_index = index;
        }
    }

    /// Releases the durable log. Operations enqueued from now on fail with `ParticipantGone`,
    /// as do queued operations that have not started yet. Waits for the running operation and
    /// every pending sync to complete before handing the log back, so the caller is its only
    /// user afterwards.
    ///
    /// Returns `None` if the manager already resigned.
    pub async fn resign(&self) -> Option<Arc<dyn PersistedLog>> {
        let core = self.guarded.lock().core.take();
        loop {
            let idle = self.worker_idle.notified();
            {
                let guarded = self.guarded.lock();
                if !guarded.worker_active && guarded.pending_syncs == 0 {
                    break;
                }
            }
            idle.await;
        }

        let core = core?;
        core.wait_for_completion();
        slog::info!(self.logger, "Storage manager resigned");
        Some(core)
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            let (request, core) = {
                let mut guarded = self.guarded.lock();
                match guarded.queue.pop_front() {
                    Some(request) => (request, guarded.core.clone()),
                    None => {
                        guarded.worker_active = false;
                        drop(guarded);
                        self.worker_idle.notify_waiters();
                        return;
                    }
                }
            };

            let StorageRequest {
                action,
                mapping_result,
                promise,
            } = request;

            let core = match core {
                Some(core) => core,
                None => {
                    self.fail_queue(promise, StorageError::ParticipantGone);
                    continue;
                }
            };

            let action_name = action.name();
            let metadata_result = match &action {
                StorageAction::UpdateMetadata(metadata) => Some(metadata.clone()),
                _ => None,
            };
            match Self::apply(&core, action).await {
                Ok(insert_sync) => {
                    let pending_sync = {
                        let mut guarded = self.guarded.lock();
                        guarded.on_disk_mapping = mapping_result;
                        if let Some(metadata) = metadata_result {
                            guarded.on_disk_metadata = metadata;
                        }
                        match insert_sync {
                            Some(InsertSync::Synced(last_index)) => {
                                Self::update_sync_index(&mut guarded, last_index);
                                None
                            }
                            Some(InsertSync::Pending(sequence_number, last_index)) => {
                                guarded.pending_syncs += 1;
                                Some((sequence_number, last_index))
                            }
                            None => None,
                        }
                    };
                    if let Some((sequence_number, last_index)) = pending_sync {
                        self.queue_sync_watcher(core, sequence_number, last_index);
                    }
                    let _ = promise.send(Ok(()));
                }
                Err(e) => {
                    slog::error!(self.logger, "Storage operation {} failed: {:?}", action_name, e);
                    self.fail_queue(promise, e);
                }
            }
        }
    }

    // Fails `promise` with `error` and everything queued behind it with `SubsequentFault`.
    fn fail_queue(&self, promise: oneshot::Sender<StorageResult<()>>, error: StorageError) {
        let failed_requests = {
            let mut guarded = self.guarded.lock();
            guarded.spearhead_mapping = guarded.on_disk_mapping.clone();
            guarded.spearhead_metadata = guarded.on_disk_metadata.clone();
            std::mem::take(&mut guarded.queue)
        };

        if !failed_requests.is_empty() {
            slog::warn!(
                self.logger,
                "Aborting {} queued storage operations after failure",
                failed_requests.len()
            );
        }

        let subsequent_error = match error {
            StorageError::ParticipantGone => StorageError::ParticipantGone,
            _ => StorageError::SubsequentFault,
        };
        let _ = promise.send(Err(error));
        for request in failed_requests {
            let _ = request.promise.send(Err(subsequent_error.clone()));
        }
    }

    async fn apply(core: &Arc<dyn PersistedLog>, action: StorageAction) -> StorageResult<Option<InsertSync>> {
        match action {
            StorageAction::Insert {
                entries,
                options,
                last_index,
            } => {
                let sequence_number = core.insert(entries, options).await?;
                if options.wait_for_sync {
                    core.wait_for_sync(sequence_number).await?;
                    Ok(Some(InsertSync::Synced(last_index)))
                } else {
                    Ok(Some(InsertSync::Pending(sequence_number, last_index)))
                }
            }
            StorageAction::RemoveFront { stop } => {
                core.remove_front(stop, WriteOptions::default()).await?;
                Ok(None)
            }
            StorageAction::RemoveBack { start } => {
                core.remove_back(start, WriteOptions::default()).await?;
                Ok(None)
            }
            StorageAction::UpdateMetadata(metadata) => {
                core.update_metadata(metadata)?;
                Ok(None)
            }
            StorageAction::Compact => {
                core.compact().await?;
                Ok(None)
            }
        }
    }

    fn queue_sync_watcher(self: &Arc<Self>, core: Arc<dyn PersistedLog>, sequence_number: SequenceNumber, index: LogIndex) {
        let manager = Arc::downgrade(self);
        self.scheduler.queue(Box::pin(async move {
            let synced = core.wait_for_sync(sequence_number).await;
            drop(core);
            if let Some(manager) = manager.upgrade() {
                manager.finish_sync(index, synced);
            }
        }));
    }

    fn finish_sync(&self, index: LogIndex, synced: StorageResult<()>) {
        {
            let mut guarded = self.guarded.lock();
            guarded.pending_syncs -= 1;
            if synced.is_ok() {
                Self::update_sync_index(&mut guarded, index);
            }
        }
        if let Err(e) = synced {
            slog::warn!(self.logger, "Waiting for sync of {:?} failed: {:?}", index, e);
        }
        self.worker_idle.notify_waiters();
    }
}

pub struct StorageTransaction<'a> {
    manager: &'a Arc<StorageManager>,
    guard: MutexGuard<'a, GuardedStorageData>,
}

impl<'a> StorageTransaction<'a> {
    /// The spearhead including everything enqueued in this transaction so far.
    pub fn spearhead_mapping(&self) -> &TermIndexMapping {
        &self.guard.spearhead_mapping
    }

    pub fn append_entries(&mut self, entries: InMemoryLog, options: WriteOptions) -> StorageFuture {
        if entries.is_empty() {
            return StorageFuture::ready(Ok(()));
        }
        if let Some(next_index) = self.guard.spearhead_mapping.next_index() {
            assert_eq!(
                next_index,
                entries.first_index(),
                "Appended entries must continue the spearhead {:?}",
                self.guard.spearhead_mapping.last_index(),
            );
        }

        let mut mapping_result = self.guard.spearhead_mapping.clone();
        for entry in entries.iter_from(entries.first_index()) {
            mapping_result.insert_entry(entry.term_index_pair());
        }
        let action = StorageAction::Insert {
            entries: Box::new(entries.persisting_iter_from(entries.first_index())),
            options,
            last_index: entries.last_index(),
        };
        self.enqueue(action, mapping_result)
    }

    /// Removes every entry before `stop`.
    pub fn remove_front(&mut self, stop: LogIndex) -> StorageFuture {
        let mut mapping_result = self.guard.spearhead_mapping.clone();
        mapping_result.remove_front(stop);
        self.enqueue(StorageAction::RemoveFront { stop }, mapping_result)
    }

    /// Removes `start` and every entry after it.
    pub fn remove_back(&mut self, start: LogIndex) -> StorageFuture {
        let mut mapping_result = self.guard.spearhead_mapping.clone();
        mapping_result.remove_back(start);
        self.enqueue(StorageAction::RemoveBack { start }, mapping_result)
    }

    /// Lets the engine reclaim space, after everything enqueued before.
    pub fn compact(&mut self) -> StorageFuture {
        let mapping_result = self.guard.spearhead_mapping.clone();
        self.enqueue(StorageAction::Compact, mapping_result)
    }

    pub fn update_metadata(&mut self, metadata: LogMetadata) -> StorageFuture {
        let mapping_result = self.guard.spearhead_mapping.clone();
        let future = self.enqueue(StorageAction::UpdateMetadata(metadata.clone()), mapping_result);
        if self.guard.core.is_some() {
            self.guard.spearhead_metadata = metadata;
        }
        future
    }

    fn enqueue(&mut self, action: StorageAction, mapping_result: TermIndexMapping) -> StorageFuture {
        if self.guard.core.is_none() {
            return StorageFuture::ready(Err(StorageError::ParticipantGone));
        }

        let (tx, rx) = oneshot::channel();
        self.guard.spearhead_mapping = mapping_result.clone();
        self.guard.queue.push_back(StorageRequest {
            action,
            mapping_result,
            promise: tx,
        });

        if !self.guard.worker_active {
            self.guard.worker_active = true;
            let worker = StorageManager::run_worker(self.manager.clone());
            self.manager.scheduler.queue(Box::pin(worker));
        }

        StorageFuture::pending(rx)
    }
}
