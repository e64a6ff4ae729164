use crate::ticket::{Ticket, TicketBackend, TicketRef, User, UserDirectory};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::info;

/// One call made against a [`MemoryBackend`], with the ticket as sent.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Create(TicketRef, Ticket),
    Save(TicketRef, Ticket),
    Find(TicketRef),
    FindUsers,
}

/// In-process ticket store. Keeps a journal of every call so the order of
/// side effects can be inspected.
pub struct MemoryBackend {
    tickets: Mutex<HashMap<TicketRef, Ticket>>,
    users: Mutex<Vec<User>>,
    journal: Mutex<Vec<BackendCall>>,
    next_id: AtomicU64,
}

impl MemoryBackend {
    pub fn new(users: Vec<User>) -> Self {
        info!("Creating MemoryBackend, users: {}", users.len());
        Self {
            tickets: Mutex::new(HashMap::new()),
            users: Mutex::new(users),
            journal: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn add_user(&self, user: User) {
        self.users.lock().await.push(user);
    }

    pub async fn ticket(&self, ticket_ref: &TicketRef) -> Option<Ticket> {
        self.tickets.lock().await.get(ticket_ref).cloned()
    }

    pub async fn ticket_count(&self) -> usize {
        self.tickets.lock().await.len()
    }

    pub async fn journal(&self) -> Vec<BackendCall> {
        self.journal.lock().await.clone()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl TicketBackend for MemoryBackend {
    async fn create(&self, ticket: &Ticket) -> Result<TicketRef> {
        let ticket_ref = TicketRef(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
        self.journal
            .lock()
            .await
            .push(BackendCall::Create(ticket_ref.clone(), ticket.clone()));
        self.tickets
            .lock()
            .await
            .insert(ticket_ref.clone(), ticket.clone());
        Ok(ticket_ref)
    }

    async fn save(&self, ticket_ref: &TicketRef, ticket: &Ticket) -> Result<()> {
        self.journal
            .lock()
            .await
            .push(BackendCall::Save(ticket_ref.clone(), ticket.clone()));
        let mut tickets = self.tickets.lock().await;
        let stored = tickets
            .get_mut(ticket_ref)
            .ok_or_else(|| anyhow!("ticket {} not found", ticket_ref))?;
        *stored = ticket.clone();
        Ok(())
    }

    async fn find(&self, ticket_ref: &TicketRef) -> Result<Ticket> {
        self.journal
            .lock()
            .await
            .push(BackendCall::Find(ticket_ref.clone()));
        self.tickets
            .lock()
            .await
            .get(ticket_ref)
            .cloned()
            .ok_or_else(|| anyhow!("ticket {} not found", ticket_ref))
    }
}

#[async_trait]
impl UserDirectory for MemoryBackend {
    async fn find_all(&self) -> Result<Vec<User>> {
        self.journal.lock().await.push(BackendCall::FindUsers);
        Ok(self.users.lock().await.clone())
    }
}
