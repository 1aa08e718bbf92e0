//! Error diagnostics for the error-path logger.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use std::{error::Error, fmt, sync::Arc};

/// A failed request's error plus everything known about it.
///
/// Cloning shares the underlying error, so the report found in a response's
/// extensions is the same allocation the handler produced.
#[derive(Clone)]
pub struct ErrorReport {
    error: Arc<dyn Error + Send + Sync + 'static>,
    name: &'static str,
}

impl ErrorReport {
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            error: Arc::new(error),
            name: std::any::type_name::<E>(),
        }
    }

    pub fn error(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.error.as_ref()
    }

    pub fn shared(&self) -> &Arc<dyn Error + Send + Sync + 'static> {
        &self.error
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }

    pub fn all_info(&self) -> Map<String, Value> {
        error_info(self.error.as_ref(), self.name)
    }
}

impl fmt::Debug for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReport")
            .field("name", &self.name)
            .field("error", &self.error)
            .finish()
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

/// Full diagnostic view of an error: message, type name, source chain,
/// debug rendering, timestamp and process details.
pub fn error_info(error: &(dyn Error + 'static), name: &str) -> Map<String, Value> {
    let message = error.to_string();

    let mut trace = Vec::new();
    let mut current: Option<&(dyn Error + 'static)> = Some(error);
    while let Some(err) = current {
        trace.push(Value::String(err.to_string()));
        current = err.source();
    }

    let mut info = Map::new();
    info.insert("error".to_string(), Value::String(message.clone()));
    info.insert("message".to_string(), Value::String(message));
    info.insert("name".to_string(), Value::String(name.to_string()));
    info.insert("stack".to_string(), Value::String(format!("{:?}", error)));
    info.insert("trace".to_string(), Value::Array(trace));
    info.insert(
        "date".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    info.insert("process".to_string(), process_info());
    info
}

fn process_info() -> Value {
    json!({
        "pid": std::process::id(),
        "cwd": std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        "execPath": std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        "argv": std::env::args().collect::<Vec<_>>(),
        "version": env!("CARGO_PKG_VERSION"),
    })
}

/// Handler error that renders as a JSON error response and carries its
/// [`ErrorReport`] in the response extensions for the error logger.
///
/// Any `std::error::Error` converts into it, so handlers can use `?`.
#[derive(Debug, Clone)]
pub struct RouteError {
    status: StatusCode,
    report: ErrorReport,
}

impl RouteError {
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            report: ErrorReport::new(error),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn report(&self) -> &ErrorReport {
        &self.report
    }
}

impl<E> From<E> for RouteError
where
    E: Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        RouteError::new(error)
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "message": self.report.message() }));
        let mut response = (self.status, body).into_response();
        response.extensions_mut().insert(self.report);
        response
    }
}
