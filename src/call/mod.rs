//! Call lifecycle tracking.
//!
//! A [`CallTracker`] turns the `start`, `answer` and `hangup` signals of one
//! call into ticket operations on the call's own [`OperationQueue`]. The
//! tracker methods never block: they update the lifecycle state, snapshot
//! the placeholder values for the transition and enqueue.
use crate::{
    queue::{OperationHandle, OperationQueue, WorkerPool},
    template::{PlaceholderValue, TemplateSet},
    ticket::{TicketBackend, UserDirectory},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::{debug, info, warn};

pub mod member;
pub mod operation;

pub use operation::{AssignTicket, CreateTicket, TicketSession, UpdateHangup};

/// Everything the queued operations of any call need.
pub struct CallContext {
    pub templates: Arc<TemplateSet>,
    pub tickets: Arc<dyn TicketBackend>,
    pub users: Arc<dyn UserDirectory>,
    pub user_map: HashMap<String, u64>,
    pub pool: WorkerPool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Created,
    Active,
    Answered,
    Ended,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Created => "created",
            CallState::Active => "active",
            CallState::Answered => "answered",
            CallState::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of one call.
///
/// The ticket reference and the placeholder map live in the queue's
/// [`TicketSession`], so the tracker can be dropped at hangup while its
/// last operation is still draining.
pub struct CallTracker {
    call_id: String,
    caller_id: String,
    state: CallState,
    start_time: Option<DateTime<Utc>>,
    answer_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    answered: bool,
    queue_member: Option<String>,
    queue: OperationQueue<TicketSession>,
}

impl CallTracker {
    pub fn new(
        call_id: impl Into<String>,
        caller_id: impl Into<String>,
        context: Arc<CallContext>,
    ) -> Self {
        let call_id = call_id.into();
        let session = TicketSession::new(call_id.clone(), context.clone());
        let queue = OperationQueue::spawn(format!("call-{}", call_id), session, &context.pool);
        Self {
            call_id,
            caller_id: caller_id.into(),
            state: CallState::Created,
            start_time: None,
            answer_time: None,
            end_time: None,
            answered: false,
            queue_member: None,
            queue,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Option<OperationHandle> {
        if self.state != CallState::Created {
            warn!(call_id = %self.call_id, state = %self.state, "start ignored");
            return None;
        }
        self.state = CallState::Active;
        self.start_time = Some(now);
        info!(call_id = %self.call_id, caller_id = %self.caller_id, "call started");

        Some(self.queue.enqueue(CreateTicket {
            placeholders: vec![
                ("callerid", self.caller_id.clone().into()),
                ("uniqueid", self.call_id.clone().into()),
                ("startTime", epoch_seconds(now).into()),
            ],
        }))
    }

    /// Only the first answer of a call is tracked.
    pub fn answer(&mut self, member: &str, now: DateTime<Utc>) -> Option<OperationHandle> {
        if !matches!(self.state, CallState::Created | CallState::Active) {
            debug!(call_id = %self.call_id, state = %self.state, member, "answer ignored");
            return None;
        }
        self.state = CallState::Answered;
        self.answered = true;
        self.answer_time = Some(now);
        self.queue_member = Some(member.to_string());
        info!(call_id = %self.call_id, member, "member answered");

        Some(self.queue.enqueue(AssignTicket {
            member: member.to_string(),
            placeholders: vec![
                ("queueMember", member.into()),
                ("callAnswered", true.into()),
            ],
        }))
    }

    pub fn hangup(&mut self, now: DateTime<Utc>) -> Option<OperationHandle> {
        if self.state == CallState::Ended {
            debug!(call_id = %self.call_id, "hangup ignored");
            return None;
        }
        let call_duration = duration_seconds(self.start_time.unwrap_or(now), now);
        let talk_duration = self.answer_time.map(|t| duration_seconds(t, now));
        self.state = CallState::Ended;
        self.end_time = Some(now);

        match talk_duration {
            Some(talk_duration) => info!(
                call_id = %self.call_id,
                call_duration,
                talk_duration,
                "call ended"
            ),
            None => info!(call_id = %self.call_id, call_duration, "call ended unanswered"),
        }

        Some(self.queue.enqueue(UpdateHangup {
            answered: self.answered,
            placeholders: vec![
                ("stopTime", epoch_seconds(now).into()),
                ("callDuration", call_duration.into()),
                ("talkDuration", PlaceholderValue::from(talk_duration)),
            ],
        }))
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn answered(&self) -> bool {
        self.answered
    }

    pub fn queue_member(&self) -> Option<&str> {
        self.queue_member.as_deref()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn answer_time(&self) -> Option<DateTime<Utc>> {
        self.answer_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn pending_operations(&self) -> usize {
        self.queue.pending()
    }
}

impl fmt::Debug for CallTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallTracker")
            .field("call_id", &self.call_id)
            .field("caller_id", &self.caller_id)
            .field("state", &self.state)
            .finish()
    }
}

fn epoch_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp_millis() as f64 / 1000.0
}

fn duration_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 1000.0
}
