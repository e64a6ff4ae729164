use crate::template::PatternError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A template field could not be parsed or rendered. This is a
    /// configuration bug and only fails the operation that hit it.
    #[error("template [{section}] {field}: {source}")]
    Template {
        section: String,
        field: String,
        #[source]
        source: PatternError,
    },

    #[error("template section [{0}] must be a table")]
    InvalidSection(String),

    #[error("backend: {0:#}")]
    Backend(#[source] anyhow::Error),

    #[error("ticket was never created for call {0}")]
    TicketMissing(String),

    #[error("operation {0} panicked")]
    Panicked(String),

    #[error("operation queue closed")]
    QueueClosed,
}

impl Error {
    pub fn template(section: &str, field: &str, source: PatternError) -> Self {
        Error::Template {
            section: section.to_string(),
            field: field.to_string(),
            source,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Template { .. } | Error::InvalidSection(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Backend(e)
    }
}
