use crate::error::{Error, Result};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

pub const DEFAULT_WORKERS: usize = 10;

/// Bounded execution capacity shared by every call queue.
///
/// The pool does no ordering of its own: a queue takes one permit per
/// operation and holds it only while that operation runs.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            tasks: TaskTracker::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Number of queues whose drain loop is still running.
    pub fn active_queues(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    pub(crate) async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::QueueClosed)
    }

    /// Waits for every queue to drain. Returns false when `timeout` elapsed
    /// with queues still running.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tasks.close();
        let pending = self.tasks.len();
        if pending > 0 {
            info!(pending, ?timeout, "waiting for call queues to drain");
        }
        match tokio::time::timeout(timeout, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    pending = self.tasks.len(),
                    "call queues still running at shutdown"
                );
                false
            }
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}
