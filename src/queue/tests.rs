use super::*;
use anyhow::anyhow;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::time::sleep;

struct Push {
    value: usize,
    delay_ms: u64,
}

#[async_trait]
impl Operation<Vec<usize>> for Push {
    fn name(&self) -> &str {
        "push"
    }

    async fn execute(self: Box<Self>, state: &mut Vec<usize>) -> Result<()> {
        if self.delay_ms > 0 {
            sleep(Duration::from_millis(self.delay_ms)).await;
        }
        state.push(self.value);
        Ok(())
    }
}

struct Snapshot(oneshot::Sender<Vec<usize>>);

#[async_trait]
impl Operation<Vec<usize>> for Snapshot {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn execute(self: Box<Self>, state: &mut Vec<usize>) -> Result<()> {
        let Snapshot(sender) = *self;
        sender.send(state.clone()).ok();
        Ok(())
    }
}

struct Fail;

#[async_trait]
impl Operation<Vec<usize>> for Fail {
    fn name(&self) -> &str {
        "fail"
    }

    async fn execute(self: Box<Self>, _state: &mut Vec<usize>) -> Result<()> {
        Err(Error::Backend(anyhow!("backend down")))
    }
}

struct Explode;

#[async_trait]
impl Operation<Vec<usize>> for Explode {
    fn name(&self) -> &str {
        "explode"
    }

    async fn execute(self: Box<Self>, _state: &mut Vec<usize>) -> Result<()> {
        panic!("boom");
    }
}

/// Tracks how many operations are inside `execute` per queue and globally.
#[derive(Default)]
struct OverlapDetector {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl OverlapDetector {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn max(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct Counted {
    step: usize,
    delay_ms: u64,
    call: Arc<OverlapDetector>,
    global: Arc<OverlapDetector>,
}

#[async_trait]
impl Operation<Vec<usize>> for Counted {
    fn name(&self) -> &str {
        "counted"
    }

    async fn execute(self: Box<Self>, state: &mut Vec<usize>) -> Result<()> {
        self.call.enter();
        self.global.enter();
        sleep(Duration::from_millis(self.delay_ms)).await;
        state.push(self.step);
        self.global.leave();
        self.call.leave();
        Ok(())
    }
}

async fn snapshot(queue: &OperationQueue<Vec<usize>>) -> Vec<usize> {
    let (tx, rx) = oneshot::channel();
    queue.enqueue(Snapshot(tx)).await.expect("snapshot");
    rx.await.expect("snapshot result")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_operations_complete_in_submission_order() {
    let pool = WorkerPool::new(4);
    let queue = OperationQueue::spawn("fifo", Vec::new(), &pool);

    // Earlier operations are slower, so any reordering would show up.
    let mut handles = Vec::new();
    for value in 0..10 {
        handles.push(queue.enqueue(Push {
            value,
            delay_ms: (10 - value as u64) * 3,
        }));
    }
    for handle in handles {
        handle.await.expect("push");
    }

    assert_eq!(snapshot(&queue).await, (0..10).collect::<Vec<_>>());
    assert_eq!(queue.pending(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_overlap_within_a_call() {
    let pool = WorkerPool::new(3);
    let global = Arc::new(OverlapDetector::default());
    let mut calls = Vec::new();

    for call in 0..8usize {
        let detector = Arc::new(OverlapDetector::default());
        let queue = OperationQueue::spawn(format!("call-{}", call), Vec::new(), &pool);
        calls.push((queue, detector));
    }

    let mut handles = Vec::new();
    for step in 0..10usize {
        for (call, (queue, detector)) in calls.iter().enumerate() {
            handles.push(queue.enqueue(Counted {
                step,
                delay_ms: ((call * 7 + step * 13) % 5) as u64,
                call: detector.clone(),
                global: global.clone(),
            }));
        }
    }
    for handle in handles {
        handle.await.expect("counted");
    }

    for (queue, detector) in &calls {
        assert_eq!(detector.max(), 1, "{} overlapped", queue.label());
        assert_eq!(snapshot(queue).await, (0..10).collect::<Vec<_>>());
    }
    assert!(global.max() <= pool.size());
    assert_eq!(pool.idle_workers(), pool.size());
}

#[tokio::test]
async fn test_failures_do_not_block_the_queue() {
    let pool = WorkerPool::new(2);
    let queue = OperationQueue::spawn("failing", Vec::new(), &pool);

    let first = queue.enqueue(Push {
        value: 1,
        delay_ms: 0,
    });
    let failed = queue.enqueue(Fail);
    let exploded = queue.enqueue(Explode);
    let last = queue.enqueue(Push {
        value: 2,
        delay_ms: 0,
    });

    assert!(first.await.is_ok());
    assert!(matches!(failed.await, Err(Error::Backend(_))));
    match exploded.await {
        Err(Error::Panicked(name)) => assert_eq!(name, "explode"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(last.await.is_ok());
    assert_eq!(snapshot(&queue).await, vec![1, 2]);
}

#[tokio::test]
async fn test_dropped_handle_still_runs() {
    let pool = WorkerPool::default();
    let queue = OperationQueue::spawn("fire-and-forget", Vec::new(), &pool);

    drop(queue.enqueue(Push {
        value: 7,
        delay_ms: 5,
    }));

    assert_eq!(snapshot(&queue).await, vec![7]);
}

#[tokio::test]
async fn test_queue_drains_after_owner_is_dropped() {
    let pool = WorkerPool::new(1);
    let queue = OperationQueue::spawn("orphan", Vec::new(), &pool);
    let (tx, rx) = oneshot::channel();

    queue.enqueue(Push {
        value: 1,
        delay_ms: 20,
    });
    queue.enqueue(Snapshot(tx));
    drop(queue);

    assert!(pool.shutdown(Duration::from_secs(5)).await);
    assert_eq!(rx.await.expect("snapshot"), vec![1]);
    assert_eq!(pool.active_queues(), 0);
}

#[tokio::test]
async fn test_idle_queue_holds_no_worker() {
    let pool = WorkerPool::new(1);
    let _idle = OperationQueue::spawn("idle", Vec::<usize>::new(), &pool);
    let busy = OperationQueue::spawn("busy", Vec::new(), &pool);

    tokio::time::timeout(
        Duration::from_secs(5),
        busy.enqueue(Push {
            value: 3,
            delay_ms: 0,
        }),
    )
    .await
    .expect("idle queue must not starve the pool")
    .expect("push");
    assert_eq!(pool.idle_workers(), 1);
}
