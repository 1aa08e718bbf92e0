//! Request/response logging middleware for axum.
//!
//! [`middleware::logger`] records every completed response,
//! [`middleware::error_logger`] records failed requests. Both build a meta
//! object from whitelisted request/response fields and hand a
//! [`backend::LogRecord`] to a pluggable [`backend::LogBackend`].

pub mod backend;
pub mod capture;
pub mod config;
pub mod error;
pub mod filter;
pub mod level;
pub mod meta;
pub mod middleware;
pub mod report;

pub use backend::{LogBackend, LogRecord, Transport};
pub use config::{AccessLogConfig, ErrorLogConfig, LoggerConfig};
pub use error::LoggerError;
pub use level::{LogLevel, StatusLevels};
pub use middleware::{error_logger, logger, AccessLogger, ErrorLogger, RouteFields};
pub use report::{ErrorReport, RouteError};
