use axum::{extract::Request, response::Response};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::{
    error::Error,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};

use crate::{
    backend::{LogBackend, LogRecord, Sink, Transport},
    capture::{RequestInfo, ResponseInfo},
    config::ErrorLogConfig,
    filter::{default_field_filter, filter_object, FieldFilter, FieldSource},
    level::{ErrorLevelSpec, LogLevel},
    meta::enrich,
    report::{error_info, ErrorReport},
};

pub type ErrorMessageFn = Arc<
    dyn Fn(&RequestInfo, Option<&ResponseInfo>, &(dyn Error + 'static)) -> String + Send + Sync,
>;
pub type ErrorDynamicMetaFn = Arc<
    dyn Fn(&RequestInfo, Option<&ResponseInfo>, &(dyn Error + 'static)) -> Map<String, Value>
        + Send
        + Sync,
>;

/// Error-path logger: records failed requests and forwards the failure
/// untouched.
#[derive(Clone)]
pub struct ErrorLogger {
    config: ErrorLogConfig,
    request_filter: FieldFilter,
    level: ErrorLevelSpec,
    msg: ErrorMessageFn,
    dynamic_meta: Option<ErrorDynamicMetaFn>,
    sink: Sink,
}

impl ErrorLogger {
    pub fn new(config: ErrorLogConfig) -> Self {
        let level = ErrorLevelSpec::Static(config.level);
        Self {
            config,
            request_filter: default_field_filter(),
            level,
            msg: Arc::new(
                |req: &RequestInfo, _res: Option<&ResponseInfo>, err: &(dyn Error + 'static)| {
                    format!("HTTP {} {} {}", req.method, req.url, err)
                },
            ),
            dynamic_meta: None,
            sink: Sink::default(),
        }
    }

    pub fn config(&self) -> &ErrorLogConfig {
        &self.config
    }

    pub fn with_request_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&dyn FieldSource, &str) -> Option<Value> + Send + Sync + 'static,
    {
        self.request_filter = Arc::new(filter);
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        if matches!(self.level, ErrorLevelSpec::Static(_)) {
            self.level = ErrorLevelSpec::Static(level);
        }
        self
    }

    pub fn with_level_fn<F>(mut self, level: F) -> Self
    where
        F: Fn(&RequestInfo, Option<&ResponseInfo>, &(dyn Error + 'static)) -> LogLevel
            + Send
            + Sync
            + 'static,
    {
        self.level = ErrorLevelSpec::Computed(Arc::new(level));
        self
    }

    pub fn with_msg<F>(mut self, msg: F) -> Self
    where
        F: Fn(&RequestInfo, Option<&ResponseInfo>, &(dyn Error + 'static)) -> String
            + Send
            + Sync
            + 'static,
    {
        self.msg = Arc::new(msg);
        self
    }

    pub fn with_dynamic_meta<F>(mut self, dynamic: F) -> Self
    where
        F: Fn(&RequestInfo, Option<&ResponseInfo>, &(dyn Error + 'static)) -> Map<String, Value>
            + Send
            + Sync
            + 'static,
    {
        self.dynamic_meta = Some(Arc::new(dynamic));
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn LogBackend>) -> Self {
        self.sink.set_backend(backend);
        self
    }

    pub fn with_transports(mut self, transports: Vec<Arc<dyn Transport>>) -> Self {
        self.sink.set_transports(transports);
        self
    }

    pub fn layer(self) -> ErrorLogLayer {
        ErrorLogLayer::new(self)
    }

    /// Builds the record for one error occurrence. The error's full
    /// diagnostics form the base of the meta object.
    pub fn record(
        &self,
        request: &RequestInfo,
        response: Option<&ResponseInfo>,
        error: &(dyn Error + 'static),
        name: &str,
    ) -> LogRecord {
        let mut meta = error_info(error, name);
        match filter_object(request, &self.config.request_whitelist, &*self.request_filter) {
            Some(req) => {
                meta.insert("req".to_string(), Value::Object(req));
            }
            None => {
                meta.remove("req");
            }
        }

        let dynamic = self
            .dynamic_meta
            .as_ref()
            .map(|f| f(request, response, error));
        let meta = enrich(
            meta,
            dynamic,
            self.config.meta_field.as_deref(),
            &self.config.base_meta,
        );

        LogRecord {
            level: self.level.resolve(request, response, error),
            message: (self.msg)(request, response, error),
            meta,
        }
    }

    /// Logs a handler failure carried by `report`.
    pub fn observe(
        &self,
        request: &RequestInfo,
        response: Option<&ResponseInfo>,
        report: &ErrorReport,
    ) {
        let record = self.record(request, response, report.error(), report.name());
        self.sink.emit(record);
    }
}

#[derive(Clone)]
pub struct ErrorLogLayer {
    logger: Arc<ErrorLogger>,
}

impl ErrorLogLayer {
    pub fn new(logger: ErrorLogger) -> Self {
        Self {
            logger: Arc::new(logger),
        }
    }
}

impl<S> Layer<S> for ErrorLogLayer {
    type Service = ErrorLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ErrorLogService {
            inner,
            logger: self.logger.clone(),
        }
    }
}

/// Logs `Err` results of the inner service and responses carrying an
/// [`ErrorReport`]; both are returned exactly as received.
#[derive(Clone)]
pub struct ErrorLogService<S> {
    inner: S,
    logger: Arc<ErrorLogger>,
}

impl<S> Service<Request> for ErrorLogService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Error + Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let logger = self.logger.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let info = RequestInfo::from_request(&request);

            match inner.call(request).await {
                Ok(response) => {
                    if let Some(report) = response.extensions().get::<ErrorReport>() {
                        let res = ResponseInfo::new(response.status(), response.headers().clone());
                        logger.observe(&info, Some(&res), report);
                    }
                    Ok(response)
                }
                Err(error) => {
                    let record =
                        logger.record(&info, None, &error, std::any::type_name::<S::Error>());
                    logger.sink.emit(record);
                    Err(error)
                }
            }
        })
    }
}
