use super::{member::resolve, CallContext};
use crate::{
    error::{Error, Result},
    queue::Operation,
    template::{
        self, PlaceholderValue, Placeholders, ISSUE_ASSIGN, ISSUE_CREATE, ISSUE_HANGUP_ANSWERED,
        ISSUE_HANGUP_NOT_ANSWERED, ISSUE_USER_NOT_FOUND,
    },
    ticket::{Ticket, TicketRef},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Queue-owned ticket state of one call. Only the call's own queue ever
/// touches it, one operation at a time.
pub struct TicketSession {
    call_id: String,
    context: Arc<CallContext>,
    placeholders: Placeholders,
    ticket: Ticket,
    ticket_ref: Option<TicketRef>,
}

impl TicketSession {
    pub fn new(call_id: impl Into<String>, context: Arc<CallContext>) -> Self {
        Self {
            call_id: call_id.into(),
            context,
            placeholders: Placeholders::new(),
            ticket: Ticket::default(),
            ticket_ref: None,
        }
    }

    pub fn placeholders(&self) -> &Placeholders {
        &self.placeholders
    }

    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    pub fn ticket_ref(&self) -> Option<&TicketRef> {
        self.ticket_ref.as_ref()
    }

    fn merge(&mut self, section: &str) -> Result<bool> {
        let changed = template::merge(
            &self.context.templates,
            section,
            &self.placeholders,
            &mut self.ticket,
        )?;
        debug!(call_id = %self.call_id, section, changed, "template merged");
        Ok(changed)
    }

    async fn save(&self) -> Result<()> {
        let ticket_ref = self
            .ticket_ref
            .as_ref()
            .ok_or_else(|| Error::TicketMissing(self.call_id.clone()))?;
        self.context
            .tickets
            .save(ticket_ref, &self.ticket)
            .await
            .map_err(Error::Backend)?;
        info!(call_id = %self.call_id, ticket = %ticket_ref, "ticket saved");
        Ok(())
    }
}

pub type PlaceholderUpdate = Vec<(&'static str, PlaceholderValue)>;

/// Builds the ticket from `IssueCreate` and creates it.
pub struct CreateTicket {
    pub placeholders: PlaceholderUpdate,
}

#[async_trait]
impl Operation<TicketSession> for CreateTicket {
    fn name(&self) -> &str {
        "create_ticket"
    }

    async fn execute(self: Box<Self>, session: &mut TicketSession) -> Result<()> {
        session.placeholders.extend(self.placeholders);
        session.ticket = Ticket::default();
        session.merge(ISSUE_CREATE)?;

        let ticket_ref = session
            .context
            .tickets
            .create(&session.ticket)
            .await
            .map_err(Error::Backend)?;
        info!(call_id = %session.call_id, ticket = %ticket_ref, "ticket created");
        session.ticket_ref = Some(ticket_ref);
        Ok(())
    }
}

/// Resolves the answering member and applies `IssueAssign`, or
/// `IssueUserNotFound` when no backend user matches.
pub struct AssignTicket {
    pub member: String,
    pub placeholders: PlaceholderUpdate,
}

#[async_trait]
impl Operation<TicketSession> for AssignTicket {
    fn name(&self) -> &str {
        "assign_ticket"
    }

    async fn execute(self: Box<Self>, session: &mut TicketSession) -> Result<()> {
        let AssignTicket {
            member,
            placeholders,
        } = *self;
        session.placeholders.extend(placeholders);

        let user_id = resolve(
            &member,
            &session.context.user_map,
            session.context.users.as_ref(),
        )
        .await
        .map_err(Error::Backend)?;

        let changed = match user_id {
            Some(user_id) => {
                debug!(call_id = %session.call_id, member = %member, user_id, "queue member resolved");
                session.placeholders.insert("assigned_to_id", user_id);
                session.merge(ISSUE_ASSIGN)?
            }
            None => {
                warn!(call_id = %session.call_id, member = %member, "no ticket user matches queue member");
                session.merge(ISSUE_USER_NOT_FOUND)?
            }
        };
        if changed {
            session.save().await?;
        }
        Ok(())
    }
}

/// Applies the hangup section matching whether the call was answered.
pub struct UpdateHangup {
    pub answered: bool,
    pub placeholders: PlaceholderUpdate,
}

#[async_trait]
impl Operation<TicketSession> for UpdateHangup {
    fn name(&self) -> &str {
        "update_hangup"
    }

    async fn execute(self: Box<Self>, session: &mut TicketSession) -> Result<()> {
        session.placeholders.extend(self.placeholders);
        let section = if self.answered {
            ISSUE_HANGUP_ANSWERED
        } else {
            ISSUE_HANGUP_NOT_ANSWERED
        };
        if session.merge(section)? {
            session.save().await?;
        }
        Ok(())
    }
}
