use thiserror::Error;

/// Failure kinds the maintenance scripts distinguish when reporting.
///
/// Everything else travels as a plain `anyhow::Error` with context attached.
#[derive(Error, Debug)]
pub enum UpkeepError {
    #[error("missing required configuration: {}", .keys.join(", "))]
    MissingConfig { keys: Vec<String> },

    #[error("{what} not found: {detail}")]
    NotFound { what: &'static str, detail: String },

    #[error("{remaining} record(s) still unlinked after the pass")]
    NotConverged { remaining: i64 },

    #[error("{service} error: {message}")]
    Remote {
        service: &'static str,
        message: String,
    },

    #[error("could not allocate a free objectId in {table} after {attempts} attempts")]
    IdExhausted { table: &'static str, attempts: usize },
}

impl UpkeepError {
    pub fn not_found(what: &'static str, detail: impl Into<String>) -> Self {
        UpkeepError::NotFound {
            what,
            detail: detail.into(),
        }
    }

    pub fn remote(service: &'static str, message: impl Into<String>) -> Self {
        UpkeepError::Remote {
            service,
            message: message.into(),
        }
    }
}
