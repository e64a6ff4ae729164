use serde::{Deserialize, Serialize};

/// CallEvent is one telephony call lifecycle signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallEvent {
    /// A call entered the system
    CallStarted { call_id: String, caller_id: String },

    /// A queue member picked up the call
    MemberAnswered { call_id: String, member: String },

    /// The call hung up
    CallEnded { call_id: String },
}

impl CallEvent {
    pub fn call_id(&self) -> &str {
        match self {
            CallEvent::CallStarted { call_id, .. } => call_id,
            CallEvent::MemberAnswered { call_id, .. } => call_id,
            CallEvent::CallEnded { call_id } => call_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CallEvent::CallStarted { .. } => "call_started",
            CallEvent::MemberAnswered { .. } => "member_answered",
            CallEvent::CallEnded { .. } => "call_ended",
        }
    }
}

/// Type alias for the event sender
pub type CallEventSender = tokio::sync::mpsc::UnboundedSender<CallEvent>;

/// Type alias for the event receiver
pub type CallEventReceiver = tokio::sync::mpsc::UnboundedReceiver<CallEvent>;
