//! Log sinks. The middleware hands each finished [`LogRecord`] to a
//! [`LogBackend`]; rendering and persistence are the backend's business.

use serde::Serialize;
use serde_json::{Map, Value};
use std::{io::Write, sync::Arc};
use tracing::{debug, error, info, trace, warn};

use crate::{
    error::{LoggerError, Result},
    level::LogLevel,
};

/// One leveled message with its structured metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub meta: Map<String, Value>,
}

pub trait LogBackend: Send + Sync {
    fn log(&self, record: LogRecord);
}

impl<T: LogBackend + ?Sized> LogBackend for Arc<T> {
    fn log(&self, record: LogRecord) {
        (**self).log(record)
    }
}

/// Destination a [`TransportBackend`] writes records to.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    fn write(&self, record: &LogRecord) -> Result<()>;
}

/// Default backend: one `tracing` event per record, meta rendered as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBackend;

impl LogBackend for TracingBackend {
    fn log(&self, record: LogRecord) {
        let meta = Value::Object(record.meta).to_string();
        let message = record.message;

        match record.level {
            LogLevel::Error => error!(target: "request_logger", meta = %meta, "{}", message),
            LogLevel::Warn => warn!(target: "request_logger", meta = %meta, "{}", message),
            LogLevel::Info => info!(target: "request_logger", meta = %meta, "{}", message),
            LogLevel::Debug => debug!(target: "request_logger", meta = %meta, "{}", message),
            LogLevel::Trace => trace!(target: "request_logger", meta = %meta, "{}", message),
        }
    }
}

/// Fans each record out to a list of transports. A failing transport is
/// reported and skipped; the rest still receive the record.
#[derive(Clone, Default)]
pub struct TransportBackend {
    transports: Vec<Arc<dyn Transport>>,
}

impl TransportBackend {
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        Self { transports }
    }

    pub fn transports(&self) -> &[Arc<dyn Transport>] {
        &self.transports
    }
}

impl LogBackend for TransportBackend {
    fn log(&self, record: LogRecord) {
        for transport in &self.transports {
            if let Err(e) = transport.write(&record) {
                error!(
                    transport = transport.name(),
                    error = %e,
                    "Failed to deliver log record"
                );
            }
        }
    }
}

/// Builds a backend over `transports`, used for per-call overrides.
pub fn create_backend(transports: Vec<Arc<dyn Transport>>) -> TransportBackend {
    TransportBackend::new(transports)
}

/// Where a logger sends its records: the shared backend, or, when
/// transports are configured, a fresh backend over them for every record.
#[derive(Clone)]
pub struct Sink {
    backend: Arc<dyn LogBackend>,
    transports: Option<Vec<Arc<dyn Transport>>>,
}

impl Sink {
    pub fn new(backend: Arc<dyn LogBackend>) -> Self {
        Self {
            backend,
            transports: None,
        }
    }

    pub fn set_backend(&mut self, backend: Arc<dyn LogBackend>) {
        self.backend = backend;
    }

    pub fn set_transports(&mut self, transports: Vec<Arc<dyn Transport>>) {
        self.transports = Some(transports);
    }

    pub fn emit(&self, record: LogRecord) {
        match &self.transports {
            Some(transports) => create_backend(transports.clone()).log(record),
            None => self.backend.log(record),
        }
    }
}

impl Default for Sink {
    fn default() -> Self {
        Self::new(Arc::new(TracingBackend))
    }
}

/// Writes records as JSON to stdout.
#[derive(Debug, Clone)]
pub struct ConsoleTransport {
    pretty: bool,
}

impl ConsoleTransport {
    pub fn json() -> Self {
        Self { pretty: false }
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    pub fn render(&self, record: &LogRecord) -> Result<String> {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(record)?
        } else {
            serde_json::to_string(record)?
        };
        Ok(rendered)
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::pretty()
    }
}

impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    fn write(&self, record: &LogRecord) -> Result<()> {
        let rendered = self.render(record)?;
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", rendered).map_err(|source| LoggerError::Transport {
            transport: self.name().to_string(),
            source,
        })
    }
}
