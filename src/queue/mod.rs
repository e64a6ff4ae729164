//! Per-call serialized operation queue.
//!
//! Every [`OperationQueue`] owns a drain task that pops one operation,
//! runs it to completion on the shared [`WorkerPool`] and only then pops
//! the next. Operations of one queue therefore never overlap and finish in
//! submission order; operations of different queues run in parallel up to
//! the pool size.
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::FutureExt;
use std::{
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Instant,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

mod pool;
#[cfg(test)]
mod tests;

pub use pool::{WorkerPool, DEFAULT_WORKERS};

pub type OperationResult = Result<()>;

/// A deferred unit of work run against the queue's state `S`.
#[async_trait]
pub trait Operation<S>: Send {
    fn name(&self) -> &str;
    async fn execute(self: Box<Self>, state: &mut S) -> Result<()>;
}

struct Invocation<S> {
    operation: Box<dyn Operation<S>>,
    sink: oneshot::Sender<OperationResult>,
}

/// Resolves to the result of one enqueued operation.
///
/// Dropping the handle does not cancel the operation.
pub struct OperationHandle {
    receiver: oneshot::Receiver<OperationResult>,
}

impl Future for OperationHandle {
    type Output = OperationResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|r| match r {
            Ok(result) => result,
            Err(_) => Err(Error::QueueClosed),
        })
    }
}

pub struct OperationQueue<S> {
    label: String,
    sender: mpsc::UnboundedSender<Invocation<S>>,
    pending: Arc<AtomicUsize>,
}

impl<S: Send + 'static> OperationQueue<S> {
    /// Starts the drain task. `state` is moved into it and handed to each
    /// operation in turn.
    pub fn spawn(label: impl Into<String>, state: S, pool: &WorkerPool) -> Self {
        let label = label.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        pool.spawn(drain(
            label.clone(),
            state,
            receiver,
            pool.clone(),
            pending.clone(),
        ));
        Self {
            label,
            sender,
            pending,
        }
    }

    pub fn enqueue<O>(&self, operation: O) -> OperationHandle
    where
        O: Operation<S> + 'static,
    {
        self.submit(Box::new(operation))
    }

    pub fn submit(&self, operation: Box<dyn Operation<S>>) -> OperationHandle {
        let (sink, receiver) = oneshot::channel();
        debug!(queue = %self.label, operation = operation.name(), "submit");
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(invocation)) =
            self.sender.send(Invocation { operation, sink })
        {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(
                queue = %self.label,
                operation = invocation.operation.name(),
                "queue is closed, operation dropped"
            );
        }
        OperationHandle { receiver }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Operations submitted but not yet finished, including the running one.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

async fn drain<S: Send + 'static>(
    label: String,
    mut state: S,
    mut receiver: mpsc::UnboundedReceiver<Invocation<S>>,
    pool: WorkerPool,
    pending: Arc<AtomicUsize>,
) {
    while let Some(Invocation { operation, sink }) = receiver.recv().await {
        let name = operation.name().to_string();
        let result = match pool.acquire().await {
            Ok(permit) => {
                let start_time = Instant::now();
                let outcome = AssertUnwindSafe(operation.execute(&mut state))
                    .catch_unwind()
                    .await;
                drop(permit);
                let elapsed = start_time.elapsed();
                match outcome {
                    Ok(Ok(())) => {
                        debug!(queue = %label, operation = %name, ?elapsed, "completed");
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        error!(queue = %label, operation = %name, ?elapsed, "operation failed: {}", e);
                        Err(e)
                    }
                    Err(_) => {
                        error!(queue = %label, operation = %name, "operation panicked");
                        Err(Error::Panicked(name))
                    }
                }
            }
            Err(e) => Err(e),
        };
        pending.fetch_sub(1, Ordering::SeqCst);
        sink.send(result).ok();
    }
    debug!(queue = %label, "drained");
}
