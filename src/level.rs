use serde::{Deserialize, Serialize};
use std::{error::Error, fmt, str::FromStr, sync::Arc};

use crate::capture::{RequestInfo, ResponseInfo};

/// Severity attached to every emitted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Overrides for the status-code thresholds. Unset entries fall back to
/// `info`, `warn` and `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusLevels {
    pub success: Option<LogLevel>,
    pub warn: Option<LogLevel>,
    pub error: Option<LogLevel>,
}

/// Threshold rule: `>= 200` success, `>= 400` warn, `>= 500` error. The
/// highest threshold the status satisfies wins; anything below 200 is `info`.
pub fn level_from_status(status: u16, levels: &StatusLevels) -> LogLevel {
    let mut level = LogLevel::Info;
    if status >= 200 {
        level = levels.success.unwrap_or(LogLevel::Info);
    }
    if status >= 400 {
        level = levels.warn.unwrap_or(LogLevel::Warn);
    }
    if status >= 500 {
        level = levels.error.unwrap_or(LogLevel::Error);
    }
    level
}

pub type LevelFn = Arc<dyn Fn(&RequestInfo, &ResponseInfo) -> LogLevel + Send + Sync>;

pub type ErrorLevelFn = Arc<
    dyn Fn(&RequestInfo, Option<&ResponseInfo>, &(dyn Error + 'static)) -> LogLevel + Send + Sync,
>;

/// How the success path picks its level, resolved once per record.
#[derive(Clone)]
pub enum LevelSpec {
    Static(LogLevel),
    FromStatus(StatusLevels),
    Computed(LevelFn),
}

impl LevelSpec {
    pub fn resolve(&self, request: &RequestInfo, response: &ResponseInfo) -> LogLevel {
        match self {
            LevelSpec::Static(level) => *level,
            LevelSpec::FromStatus(levels) => level_from_status(response.status.as_u16(), levels),
            LevelSpec::Computed(f) => f(request, response),
        }
    }
}

impl fmt::Debug for LevelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelSpec::Static(level) => f.debug_tuple("Static").field(level).finish(),
            LevelSpec::FromStatus(levels) => f.debug_tuple("FromStatus").field(levels).finish(),
            LevelSpec::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

#[derive(Clone)]
pub enum ErrorLevelSpec {
    Static(LogLevel),
    Computed(ErrorLevelFn),
}

impl ErrorLevelSpec {
    pub fn resolve(
        &self,
        request: &RequestInfo,
        response: Option<&ResponseInfo>,
        error: &(dyn Error + 'static),
    ) -> LogLevel {
        match self {
            ErrorLevelSpec::Static(level) => *level,
            ErrorLevelSpec::Computed(f) => f(request, response, error),
        }
    }
}

impl fmt::Debug for ErrorLevelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorLevelSpec::Static(level) => f.debug_tuple("Static").field(level).finish(),
            ErrorLevelSpec::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}
