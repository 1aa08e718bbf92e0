// Middleware modules
pub mod error_logging;
pub mod finalize;
pub mod logging;

use crate::config::{AccessLogConfig, ErrorLogConfig};

pub use error_logging::{ErrorLogLayer, ErrorLogService, ErrorLogger};
pub use finalize::LoggedBody;
pub use logging::{AccessLogLayer, AccessLogService, AccessLogger, RouteFields};

/// Success-path layer with default callbacks and the tracing backend.
/// Use [`AccessLogger`] directly to customize beyond `config`.
pub fn logger(config: AccessLogConfig) -> AccessLogLayer {
    AccessLogger::new(config).layer()
}

/// Error-path layer with default callbacks and the tracing backend.
pub fn error_logger(config: ErrorLogConfig) -> ErrorLogLayer {
    ErrorLogger::new(config).layer()
}
