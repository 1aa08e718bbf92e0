use thiserror::Error;

/// Errors raised by the logger's configuration loading and its sinks.
///
/// The middleware itself never turns one of these into a failed request:
/// sink failures are traced and swallowed by [`crate::backend::TransportBackend`].
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Failed to load logger configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Failed to serialize log record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Transport '{transport}' failed to write record: {source}")]
    Transport {
        transport: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, LoggerError>;
