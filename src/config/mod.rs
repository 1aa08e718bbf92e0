use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::Result,
    level::{LogLevel, StatusLevels},
};

/// Request fields logged unless configured otherwise. `body` is left out
/// on purpose: request bodies routinely carry credentials.
pub const DEFAULT_REQUEST_WHITELIST: &[&str] = &[
    "url",
    "headers",
    "method",
    "httpVersion",
    "originalUrl",
    "query",
];

pub const DEFAULT_RESPONSE_WHITELIST: &[&str] = &["statusCode"];

pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

const ENV_PREFIX: &str = "REQUEST_LOGGER";

const LIST_KEYS: &[&str] = &[
    "access.request_whitelist",
    "access.response_whitelist",
    "access.body_whitelist",
    "access.body_blacklist",
    "access.ignored_routes",
    "error.request_whitelist",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub access: AccessLogConfig,
    pub error: ErrorLogConfig,
}

/// Data options of the success-path logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessLogConfig {
    pub request_whitelist: Vec<String>,
    pub response_whitelist: Vec<String>,
    pub body_whitelist: Vec<String>,
    pub body_blacklist: Vec<String>,
    /// Exact URL matches that are passed through without a record.
    pub ignored_routes: Vec<String>,
    pub level: LogLevel,
    /// When set, the level comes from the response status instead of `level`.
    pub status_levels: Option<StatusLevels>,
    /// `false` keeps level and message but drops all metadata.
    pub meta: bool,
    pub meta_field: Option<String>,
    pub base_meta: Map<String, Value>,
    /// Largest JSON request body buffered for logging.
    pub max_body_bytes: usize,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            request_whitelist: to_owned(DEFAULT_REQUEST_WHITELIST),
            response_whitelist: to_owned(DEFAULT_RESPONSE_WHITELIST),
            body_whitelist: Vec::new(),
            body_blacklist: Vec::new(),
            ignored_routes: Vec::new(),
            level: LogLevel::Info,
            status_levels: None,
            meta: true,
            meta_field: None,
            base_meta: Map::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Data options of the error-path logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorLogConfig {
    pub request_whitelist: Vec<String>,
    pub level: LogLevel,
    pub meta_field: Option<String>,
    pub base_meta: Map<String, Value>,
}

impl Default for ErrorLogConfig {
    fn default() -> Self {
        Self {
            request_whitelist: to_owned(DEFAULT_REQUEST_WHITELIST),
            level: LogLevel::Error,
            meta_field: None,
            base_meta: Map::new(),
        }
    }
}

impl LoggerConfig {
    /// Loads `path` (any format the `config` crate knows; missing is fine)
    /// and overlays `REQUEST_LOGGER__<SECTION>__<KEY>` environment variables.
    /// List values in the environment are comma separated.
    pub fn load(path: &str) -> Result<Self> {
        let mut environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",");
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(environment)
            .build()?;

        let config: LoggerConfig = settings.try_deserialize()?;
        Ok(config)
    }
}

fn to_owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}
