use crate::commitlog::{StorageError, StorageResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Resolves once the storage operation it was returned for has been applied, or has failed.
#[must_use = "storage operations are only known to be durable once their future resolves"]
pub struct StorageFuture {
    state: FutureState,
}

enum FutureState {
    Ready(Option<StorageResult<()>>),
    Pending(oneshot::Receiver<StorageResult<()>>),
}

impl StorageFuture {
    pub(super) fn ready(result: StorageResult<()>) -> Self {
        StorageFuture {
            state: FutureState::Ready(Some(result)),
        }
    }

    pub(super) fn pending(rx: oneshot::Receiver<StorageResult<()>>) -> Self {
        StorageFuture {
            state: FutureState::Pending(rx),
        }
    }
}

impl Future for StorageFuture {
    type Output = StorageResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            FutureState::Ready(result) => Poll::Ready(result.take().unwrap_or(Err(StorageError::ParticipantGone))),
            // A dropped sender means the manager went away without answering.
            FutureState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(StorageError::ParticipantGone))),
        }
    }
}
