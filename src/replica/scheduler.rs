use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

pub type ScheduledTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Scheduler runs the replication's background work: sending requests, waiting out backoff
/// delays and request timeouts, compacting and writing to storage. Submitted tasks must
/// eventually run.
#[async_trait::async_trait]
pub trait Scheduler: Send + Sync {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn queue(&self, task: ScheduledTask);

    async fn delay(&self, duration: Duration);

    /// Resolves once a request sent now is overdue after `duration`.
    async fn request_deadline(&self, duration: Duration) {
        self.delay(duration).await
    }
}

/// Runs everything on the ambient tokio runtime.
#[derive(Clone, Default)]
pub struct TokioScheduler;

#[async_trait::async_trait]
impl Scheduler for TokioScheduler {
    fn queue(&self, task: ScheduledTask) {
        tokio::spawn(task);
    }

    async fn delay(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
