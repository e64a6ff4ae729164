use crate::{
    config::BackendConfig,
    ticket::{TicketBackend, UserDirectory},
};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub mod memory;
pub mod redmine;

pub use memory::{BackendCall, MemoryBackend};
pub use redmine::RedmineBackend;

/// The two backend capabilities a call needs, usually served by one adapter.
#[derive(Clone)]
pub struct Backends {
    pub tickets: Arc<dyn TicketBackend>,
    pub users: Arc<dyn UserDirectory>,
}

impl Backends {
    pub fn shared<B>(backend: Arc<B>) -> Self
    where
        B: TicketBackend + UserDirectory + 'static,
    {
        Self {
            tickets: backend.clone(),
            users: backend,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        match config {
            BackendConfig::Memory { users } => {
                info!("using in-memory ticket backend");
                Ok(Self::shared(Arc::new(MemoryBackend::new(users.clone()))))
            }
            BackendConfig::Redmine {
                site,
                api_key,
                username,
                password,
                headers,
                page_size,
            } => {
                let backend =
                    RedmineBackend::new(site, api_key, username, password, headers, *page_size)?;
                info!(site = %backend.site(), "using redmine ticket backend");
                Ok(Self::shared(Arc::new(backend)))
            }
        }
    }
}
