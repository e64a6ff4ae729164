use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A ticket field addressed by id rather than by schema name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    pub id: String,
    pub value: Value,
}

/// Field set of a ticket as it is sent to, or read from, the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ticket {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom_fields: Vec<CustomField>,
}

impl Ticket {
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn custom_field(&self, id: &str) -> Option<&Value> {
        self.custom_fields
            .iter()
            .find(|f| f.id == id)
            .map(|f| &f.value)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.custom_fields.is_empty()
    }
}

/// Opaque backend identifier of a created ticket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketRef(pub String);

impl fmt::Display for TicketRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TicketRef {
    fn from(value: &str) -> Self {
        TicketRef(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub login: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TicketBackend: Send + Sync {
    async fn create(&self, ticket: &Ticket) -> Result<TicketRef>;
    async fn save(&self, ticket_ref: &TicketRef, ticket: &Ticket) -> Result<()>;
    async fn find(&self, ticket_ref: &TicketRef) -> Result<Ticket>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_all(&self) -> Result<Vec<User>>;
}
