pub mod app;
pub mod backend;
pub mod call;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod queue;
pub mod router;
pub mod template;
pub mod ticket;
pub mod version;

pub use error::{Error, Result};
