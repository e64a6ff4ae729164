use crate::{
    call::{CallContext, CallTracker},
    event::{CallEvent, CallEventReceiver},
    queue::OperationHandle,
};
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters shared between the dispatch loop and the HTTP ingress.
#[derive(Debug, Default)]
pub struct RouterStats {
    active: AtomicUsize,
    total: AtomicU64,
    ignored: AtomicU64,
}

impl RouterStats {
    pub fn active_calls(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn total_calls(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn ignored_events(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }
}

/// Registry of live calls keyed by call id.
///
/// A tracker is created on `CallStarted` and removed when `CallEnded` is
/// dispatched; its queue keeps draining after removal. Events for ids that
/// are not registered are dropped.
pub struct EventRouter {
    context: Arc<CallContext>,
    trackers: HashMap<String, CallTracker>,
    stats: Arc<RouterStats>,
}

impl EventRouter {
    pub fn new(context: Arc<CallContext>) -> Self {
        Self::with_stats(context, Arc::new(RouterStats::default()))
    }

    pub fn with_stats(context: Arc<CallContext>, stats: Arc<RouterStats>) -> Self {
        Self {
            context,
            trackers: HashMap::new(),
            stats,
        }
    }

    pub fn stats(&self) -> Arc<RouterStats> {
        self.stats.clone()
    }

    pub fn dispatch(&mut self, event: CallEvent) -> Option<OperationHandle> {
        self.dispatch_at(event, Utc::now())
    }

    /// Routes `event` as if it happened at `now`. Returns the handle of the
    /// operation it enqueued, if any.
    pub fn dispatch_at(&mut self, event: CallEvent, now: DateTime<Utc>) -> Option<OperationHandle> {
        let handle = match event {
            CallEvent::CallStarted { call_id, caller_id } => {
                if self.trackers.contains_key(&call_id) {
                    warn!(call_id = %call_id, "duplicate call start ignored");
                    self.stats.ignored.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                let mut tracker =
                    CallTracker::new(call_id.clone(), caller_id, self.context.clone());
                let handle = tracker.start(now);
                self.trackers.insert(call_id, tracker);
                self.stats.total.fetch_add(1, Ordering::Relaxed);
                handle
            }
            CallEvent::MemberAnswered { call_id, member } => {
                match self.trackers.get_mut(&call_id) {
                    Some(tracker) => tracker.answer(&member, now),
                    None => return self.ignore(&call_id, "member_answered"),
                }
            }
            CallEvent::CallEnded { call_id } => match self.trackers.remove(&call_id) {
                Some(mut tracker) => tracker.hangup(now),
                None => return self.ignore(&call_id, "call_ended"),
            },
        };
        self.stats
            .active
            .store(self.trackers.len(), Ordering::Relaxed);
        handle
    }

    fn ignore(&self, call_id: &str, kind: &str) -> Option<OperationHandle> {
        debug!(call_id, event = kind, "event for unknown call ignored");
        self.stats.ignored.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.trackers.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Dispatches events until the channel closes or `token` is cancelled.
    ///
    /// On cancel the channel is closed to new events and everything already
    /// accepted is still dispatched before returning.
    pub async fn serve(mut self, mut receiver: CallEventReceiver, token: CancellationToken) {
        info!("event router started");
        loop {
            select! {
                _ = token.cancelled() => {
                    receiver.close();
                    while let Some(event) = receiver.recv().await {
                        debug!(call_id = event.call_id(), event = event.kind(), "dispatch on shutdown");
                        self.dispatch(event);
                    }
                    break;
                }
                event = receiver.recv() => match event {
                    Some(event) => {
                        debug!(call_id = event.call_id(), event = event.kind(), "dispatch");
                        self.dispatch(event);
                    }
                    None => break,
                },
            }
        }
        if !self.trackers.is_empty() {
            info!(calls = self.trackers.len(), "event router stopped with calls in progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{BackendCall, MemoryBackend},
        queue::WorkerPool,
        ticket::{TicketRef, User},
    };
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn router(backend: Arc<MemoryBackend>) -> EventRouter {
        let templates = r#"
[IssueCreate]
subject = "Call from %(callerid)s"

[IssueHangupNotAnswered]
status_id = 5
"#;
        EventRouter::new(Arc::new(CallContext {
            templates: Arc::new(templates.parse().unwrap()),
            tickets: backend.clone(),
            users: backend,
            user_map: HashMap::new(),
            pool: WorkerPool::new(4),
        }))
    }

    fn started(call_id: &str) -> CallEvent {
        CallEvent::CallStarted {
            call_id: call_id.to_string(),
            caller_id: "555".to_string(),
        }
    }

    fn ended(call_id: &str) -> CallEvent {
        CallEvent::CallEnded {
            call_id: call_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_on_start_remove_on_hangup() {
        let backend = Arc::new(MemoryBackend::default());
        let mut router = router(backend.clone());

        router.dispatch(started("a")).unwrap().await.unwrap();
        assert!(router.contains("a"));
        assert_eq!(router.stats().active_calls(), 1);

        let hangup = router.dispatch(ended("a")).unwrap();
        assert!(!router.contains("a"));
        assert!(router.is_empty());
        hangup.await.unwrap();

        let ticket = backend.ticket(&TicketRef::from("1")).await.unwrap();
        assert_eq!(ticket.get("subject"), Some(&json!("Call from 555")));
        assert_eq!(ticket.get("status_id"), Some(&json!(5)));
        assert_eq!(router.stats().total_calls(), 1);
        assert_eq!(router.stats().active_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_ignored() {
        let backend = Arc::new(MemoryBackend::default());
        let mut router = router(backend.clone());

        assert!(router.dispatch(ended("ghost")).is_none());
        assert!(router
            .dispatch(CallEvent::MemberAnswered {
                call_id: "ghost".to_string(),
                member: "sip/bob".to_string(),
            })
            .is_none());

        router.dispatch(started("a"));
        router.dispatch(ended("a")).unwrap().await.unwrap();
        // late duplicate hangup
        assert!(router.dispatch(ended("a")).is_none());

        assert_eq!(router.stats().ignored_events(), 3);
        assert_eq!(backend.journal().await.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_start_keeps_existing_tracker() {
        let backend = Arc::new(MemoryBackend::default());
        let mut router = router(backend.clone());

        router.dispatch(started("a")).unwrap().await.unwrap();
        assert!(router.dispatch(started("a")).is_none());
        assert_eq!(router.len(), 1);
        assert_eq!(backend.ticket_count().await, 1);
        assert_eq!(router.stats().ignored_events(), 1);
    }

    #[tokio::test]
    async fn test_same_id_reused_after_hangup() {
        let backend = Arc::new(MemoryBackend::default());
        let mut router = router(backend.clone());

        let first = router.dispatch(started("a")).unwrap();
        let first_end = router.dispatch(ended("a")).unwrap();
        router.dispatch(started("a")).unwrap().await.unwrap();
        first.await.unwrap();
        first_end.await.unwrap();
        assert!(router.contains("a"));
        assert_eq!(backend.ticket_count().await, 2);
        assert_eq!(router.stats().total_calls(), 2);
    }

    #[tokio::test]
    async fn test_serve_stops_when_channel_closes() {
        let backend = Arc::new(MemoryBackend::new(vec![User {
            id: 7,
            login: "bob".to_string(),
        }]));
        let router = router(backend.clone());
        let pool = router.context.pool.clone();
        let stats = router.stats();
        let (sender, receiver) = mpsc::unbounded_channel();

        sender.send(started("a")).unwrap();
        sender
            .send(CallEvent::MemberAnswered {
                call_id: "a".to_string(),
                member: "sip/bob".to_string(),
            })
            .unwrap();
        sender.send(ended("a")).unwrap();
        drop(sender);

        router.serve(receiver, CancellationToken::new()).await;
        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(stats.total_calls(), 1);
        assert_eq!(stats.active_calls(), 0);

        // no assign or answered-hangup sections, so nothing is saved
        let journal = backend.journal().await;
        assert_eq!(journal.len(), 2);
        assert!(matches!(journal[0], BackendCall::Create(..)));
        assert_eq!(journal[1], BackendCall::FindUsers);
    }

    #[tokio::test]
    async fn test_cancel_dispatches_accepted_events() {
        for _ in 0..20 {
            let backend = Arc::new(MemoryBackend::default());
            let router = router(backend.clone());
            let pool = router.context.pool.clone();
            let stats = router.stats();
            let (sender, receiver) = mpsc::unbounded_channel();

            sender.send(started("a")).unwrap();
            sender.send(ended("a")).unwrap();
            let token = CancellationToken::new();
            token.cancel();

            router.serve(receiver, token).await;
            assert!(sender.send(started("b")).is_err());
            assert!(pool.shutdown(Duration::from_secs(5)).await);
            assert_eq!(stats.total_calls(), 1);
            assert_eq!(stats.active_calls(), 0);

            let ticket = backend.ticket(&TicketRef::from("1")).await.unwrap();
            assert_eq!(ticket.get("subject"), Some(&json!("Call from 555")));
            assert_eq!(ticket.get("status_id"), Some(&json!(5)));
        }
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let router = router(Arc::new(MemoryBackend::default()));
        let (_sender, receiver) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), router.serve(receiver, token))
            .await
            .unwrap();
    }
}
