use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::{
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};
use tower::{Layer, Service};
use tracing::warn;

use crate::{
    backend::{LogBackend, LogRecord, Sink, Transport},
    capture::{capture_body, should_capture_body, RequestInfo, ResponseInfo},
    config::AccessLogConfig,
    filter::{default_field_filter, filter_body, filter_object, union, FieldFilter, FieldSource},
    level::{LevelFn, LevelSpec, LogLevel, StatusLevels},
    meta::enrich,
    middleware::finalize::LoggedBody,
};

pub type RequestPredicate = Arc<dyn Fn(&RequestInfo) -> bool + Send + Sync>;
pub type MessageFn = Arc<dyn Fn(&RequestInfo, &ResponseInfo) -> String + Send + Sync>;
pub type DynamicMetaFn =
    Arc<dyn Fn(&RequestInfo, &ResponseInfo) -> Map<String, Value> + Send + Sync>;

/// Extra fields a handler wants logged for its own route, on top of the
/// global configuration. Attach it to the response:
///
/// ```ignore
/// (Extension(RouteFields::default().with_body_field("email")), Json(user))
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteFields {
    pub request: Vec<String>,
    pub response: Vec<String>,
    pub body_whitelist: Vec<String>,
    pub body_blacklist: Vec<String>,
}

impl RouteFields {
    pub fn with_request_field(mut self, field: impl Into<String>) -> Self {
        self.request.push(field.into());
        self
    }

    pub fn with_response_field(mut self, field: impl Into<String>) -> Self {
        self.response.push(field.into());
        self
    }

    pub fn with_body_field(mut self, field: impl Into<String>) -> Self {
        self.body_whitelist.push(field.into());
        self
    }

    pub fn without_body_field(mut self, field: impl Into<String>) -> Self {
        self.body_blacklist.push(field.into());
        self
    }
}

/// Marks a request an access logger has taken charge of, so a second one
/// further in does not log it again.
#[derive(Debug, Clone, Copy)]
struct AccessLogged;

/// Success-path logger: one record per completed response.
#[derive(Clone)]
pub struct AccessLogger {
    config: AccessLogConfig,
    request_filter: FieldFilter,
    response_filter: FieldFilter,
    level_fn: Option<LevelFn>,
    msg: MessageFn,
    ignore_route: Option<RequestPredicate>,
    skip: Option<RequestPredicate>,
    dynamic_meta: Option<DynamicMetaFn>,
    sink: Sink,
}

impl AccessLogger {
    pub fn new(config: AccessLogConfig) -> Self {
        Self {
            config,
            request_filter: default_field_filter(),
            response_filter: default_field_filter(),
            level_fn: None,
            msg: Arc::new(|req: &RequestInfo, _res: &ResponseInfo| {
                format!("HTTP {} {}", req.method, req.url)
            }),
            ignore_route: None,
            skip: None,
            dynamic_meta: None,
            sink: Sink::default(),
        }
    }

    pub fn config(&self) -> &AccessLogConfig {
        &self.config
    }

    pub fn with_request_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&dyn FieldSource, &str) -> Option<Value> + Send + Sync + 'static,
    {
        self.request_filter = Arc::new(filter);
        self
    }

    pub fn with_response_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&dyn FieldSource, &str) -> Option<Value> + Send + Sync + 'static,
    {
        self.response_filter = Arc::new(filter);
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    pub fn with_status_levels(mut self, levels: StatusLevels) -> Self {
        self.config.status_levels = Some(levels);
        self
    }

    /// Takes precedence over both the static level and status levels.
    pub fn with_level_fn<F>(mut self, level: F) -> Self
    where
        F: Fn(&RequestInfo, &ResponseInfo) -> LogLevel + Send + Sync + 'static,
    {
        self.level_fn = Some(Arc::new(level));
        self
    }

    pub fn with_msg<F>(mut self, msg: F) -> Self
    where
        F: Fn(&RequestInfo, &ResponseInfo) -> String + Send + Sync + 'static,
    {
        self.msg = Arc::new(msg);
        self
    }

    pub fn with_ignore_route<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RequestInfo) -> bool + Send + Sync + 'static,
    {
        self.ignore_route = Some(Arc::new(predicate));
        self
    }

    pub fn with_skip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RequestInfo) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(predicate));
        self
    }

    pub fn with_dynamic_meta<F>(mut self, dynamic: F) -> Self
    where
        F: Fn(&RequestInfo, &ResponseInfo) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.dynamic_meta = Some(Arc::new(dynamic));
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn LogBackend>) -> Self {
        self.sink.set_backend(backend);
        self
    }

    /// Every record goes to a one-off backend built over these transports
    /// instead of the shared backend.
    pub fn with_transports(mut self, transports: Vec<Arc<dyn Transport>>) -> Self {
        self.sink.set_transports(transports);
        self
    }

    pub fn layer(self) -> AccessLogLayer {
        AccessLogLayer::new(self)
    }

    pub fn level_spec(&self) -> LevelSpec {
        if let Some(level) = &self.level_fn {
            LevelSpec::Computed(level.clone())
        } else if let Some(levels) = &self.config.status_levels {
            LevelSpec::FromStatus(levels.clone())
        } else {
            LevelSpec::Static(self.config.level)
        }
    }

    /// Whether the request passes through without a record.
    pub fn skips(&self, request: &RequestInfo) -> bool {
        if self.config.ignored_routes.iter().any(|route| *route == request.url) {
            return true;
        }
        if self.ignore_route.as_ref().is_some_and(|ignore| ignore(request)) {
            return true;
        }
        self.skip.as_ref().is_some_and(|skip| skip(request))
    }

    /// Assembles the meta object for a finished response.
    pub fn build_meta(
        &self,
        request: &RequestInfo,
        response: &ResponseInfo,
        route: &RouteFields,
        response_body: Option<Bytes>,
    ) -> Map<String, Value> {
        let config = &self.config;
        let request_whitelist = union(&config.request_whitelist, &route.request);
        let response_whitelist = union(&config.response_whitelist, &route.response);

        let mut req = filter_object(request, &request_whitelist, &*self.request_filter);
        let mut res = filter_object(response, &response_whitelist, &*self.response_filter);

        if response_whitelist.iter().any(|f| f == "body") {
            let body = response_body
                .and_then(|bytes| decode_response_body(&bytes, response.is_json()));
            if let Some(body) = body {
                res.get_or_insert_with(Map::new).insert("body".to_string(), body);
            }
        }

        let filtered_body = filter_body(
            request.body.as_ref(),
            &config.request_whitelist,
            &*self.request_filter,
            &union(&config.body_whitelist, &route.body_whitelist),
            &union(&config.body_blacklist, &route.body_blacklist),
        );
        if let Some(req) = req.as_mut() {
            match filtered_body {
                Some(body) => {
                    req.insert("body".to_string(), Value::Object(body));
                }
                None => {
                    req.remove("body");
                }
            }
        }

        let mut meta = Map::new();
        if let Some(req) = req {
            meta.insert("req".to_string(), Value::Object(req));
        }
        if let Some(res) = res {
            meta.insert("res".to_string(), Value::Object(res));
        }
        if let Some(elapsed) = response.response_time {
            meta.insert("responseTime".to_string(), Value::from(elapsed));
        }

        let dynamic = self.dynamic_meta.as_ref().map(|f| f(request, response));
        enrich(meta, dynamic, config.meta_field.as_deref(), &config.base_meta)
    }

    pub fn record(
        &self,
        level: &LevelSpec,
        request: &RequestInfo,
        response: &ResponseInfo,
        route: &RouteFields,
        response_body: Option<Bytes>,
    ) -> LogRecord {
        let meta = if self.config.meta {
            self.build_meta(request, response, route, response_body)
        } else {
            Map::new()
        };

        LogRecord {
            level: level.resolve(request, response),
            message: (self.msg)(request, response),
            meta,
        }
    }

    fn emit(&self, record: LogRecord) {
        self.sink.emit(record);
    }
}

/// JSON bodies are parsed; anything else is kept as text. A JSON body that
/// fails to parse is logged as text rather than dropped.
fn decode_response_body(bytes: &Bytes, is_json: bool) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }

    let text = || Value::String(String::from_utf8_lossy(bytes).into_owned());
    if !is_json {
        return Some(text());
    }

    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Response declared JSON but did not parse, logging it as text");
            Some(text())
        }
    }
}

struct AccessShared {
    logger: AccessLogger,
    level: LevelSpec,
}

#[derive(Clone)]
pub struct AccessLogLayer {
    shared: Arc<AccessShared>,
}

impl AccessLogLayer {
    pub fn new(logger: AccessLogger) -> Self {
        let level = logger.level_spec();
        Self {
            shared: Arc::new(AccessShared { logger, level }),
        }
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            shared: self.shared.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AccessLogService<S> {
    inner: S,
    shared: Arc<AccessShared>,
}

impl<S> Service<Request> for AccessLogService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        let shared = self.shared.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            if request.extensions().get::<AccessLogged>().is_some() {
                return inner.call(request).await;
            }

            let start = Instant::now();
            let mut info = RequestInfo::from_request(&request);
            if shared.logger.skips(&info) {
                return inner.call(request).await;
            }
            request.extensions_mut().insert(AccessLogged);

            let config = shared.logger.config();
            if config.meta && should_capture_body(request.headers(), config.max_body_bytes) {
                let (captured, body) = capture_body(request, config.max_body_bytes).await;
                request = captured;
                info.body = body;
            }

            let response = inner.call(request).await?;

            let route = response
                .extensions()
                .get::<RouteFields>()
                .cloned()
                .unwrap_or_default();
            let capture = config.meta
                && config
                    .response_whitelist
                    .iter()
                    .chain(&route.response)
                    .any(|f| f == "body");
            let capture_limit = capture.then_some(config.max_body_bytes);
            let pending = PendingRecord {
                shared: shared.clone(),
                request: info,
                route,
                start,
                status: response.status(),
                headers: response.headers().clone(),
            };

            Ok(response.map(|body| {
                Body::new(LoggedBody::new(body, capture_limit, move |bytes| pending.emit(bytes)))
            }))
        })
    }
}

/// Everything needed to log a response once its body has been sent.
struct PendingRecord {
    shared: Arc<AccessShared>,
    request: RequestInfo,
    route: RouteFields,
    start: Instant,
    status: StatusCode,
    headers: HeaderMap,
}

impl PendingRecord {
    fn emit(self, body: Option<Bytes>) {
        let mut response = ResponseInfo::new(self.status, self.headers);
        response.response_time = Some(self.start.elapsed().as_millis() as u64);

        let logger = &self.shared.logger;
        let record = logger.record(&self.shared.level, &self.request, &response, &self.route, body);
        logger.emit(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue, Method, Request as HttpRequest};
    use serde_json::json;

    fn request_info(uri: &str, body: Option<Value>) -> RequestInfo {
        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri(uri)
            .body(())
            .unwrap();
        let mut info = RequestInfo::from_request(&request);
        info.body = body;
        info
    }

    fn response_info(status: StatusCode, content_type: &str) -> ResponseInfo {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        let mut info = ResponseInfo::new(status, headers);
        info.response_time = Some(7);
        info
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_meta_shape() {
        let logger = AccessLogger::new(AccessLogConfig::default());
        let meta = logger.build_meta(
            &request_info("/ok?x=1", None),
            &response_info(StatusCode::OK, "text/plain"),
            &RouteFields::default(),
            None,
        );

        assert_eq!(meta["res"], json!({"statusCode": 200}));
        assert_eq!(meta["responseTime"], json!(7));
        assert_eq!(meta["req"]["url"], json!("/ok?x=1"));
        assert_eq!(meta["req"]["method"], json!("POST"));
        assert_eq!(meta["req"]["query"], json!({"x": "1"}));
        assert!(meta["req"].get("body").is_none());
    }

    #[test]
    fn empty_request_whitelist_omits_req() {
        let config = AccessLogConfig {
            request_whitelist: Vec::new(),
            body_whitelist: strings(&["name"]),
            ..AccessLogConfig::default()
        };
        let logger = AccessLogger::new(config);
        let meta = logger.build_meta(
            &request_info("/", Some(json!({"name": "bob"}))),
            &response_info(StatusCode::OK, "text/plain"),
            &RouteFields::default(),
            None,
        );
        assert!(!meta.contains_key("req"));
    }

    #[test]
    fn route_fields_extend_globals() {
        let logger = AccessLogger::new(AccessLogConfig::default());
        let route = RouteFields::default()
            .with_request_field("path")
            .with_response_field("statusMessage")
            .with_body_field("name");
        let meta = logger.build_meta(
            &request_info("/users?page=1", Some(json!({"name": "bob", "password": "x"}))),
            &response_info(StatusCode::CREATED, "application/json"),
            &route,
            None,
        );
        assert_eq!(meta["req"]["path"], json!("/users"));
        assert_eq!(meta["req"]["body"], json!({"name": "bob"}));
        assert_eq!(meta["res"]["statusMessage"], json!("Created"));
    }

    #[test]
    fn response_body_capture() {
        let config = AccessLogConfig {
            response_whitelist: strings(&["statusCode", "body"]),
            ..AccessLogConfig::default()
        };
        let logger = AccessLogger::new(config);
        let request = request_info("/", None);

        let meta = logger.build_meta(
            &request,
            &response_info(StatusCode::OK, "application/json"),
            &RouteFields::default(),
            Some(Bytes::from_static(br#"{"message":"OK"}"#)),
        );
        assert_eq!(meta["res"]["body"], json!({"message": "OK"}));

        let meta = logger.build_meta(
            &request,
            &response_info(StatusCode::OK, "application/xml"),
            &RouteFields::default(),
            Some(Bytes::from_static(b"<ok/>")),
        );
        assert_eq!(meta["res"]["body"], json!("<ok/>"));

        let meta = logger.build_meta(
            &request,
            &response_info(StatusCode::OK, "application/json"),
            &RouteFields::default(),
            Some(Bytes::from_static(b"not json")),
        );
        assert_eq!(meta["res"]["body"], json!("not json"));
    }

    #[test]
    fn level_precedence() {
        let levels = StatusLevels::default();
        let logger = AccessLogger::new(AccessLogConfig::default()).with_level(LogLevel::Debug);
        assert!(matches!(logger.level_spec(), LevelSpec::Static(LogLevel::Debug)));

        let logger = logger.with_status_levels(levels);
        assert!(matches!(logger.level_spec(), LevelSpec::FromStatus(_)));

        let logger = logger.with_level_fn(|_, _| LogLevel::Trace);
        let level = logger.level_spec().resolve(
            &request_info("/", None),
            &response_info(StatusCode::INTERNAL_SERVER_ERROR, "text/plain"),
        );
        assert_eq!(level, LogLevel::Trace);
    }

    #[test]
    fn meta_disabled_keeps_message() {
        let config = AccessLogConfig {
            meta: false,
            base_meta: json!({"service": "api"}).as_object().cloned().unwrap(),
            ..AccessLogConfig::default()
        };
        let logger = AccessLogger::new(config);
        let record = logger.record(
            &LevelSpec::Static(LogLevel::Info),
            &request_info("/ok", None),
            &response_info(StatusCode::OK, "text/plain"),
            &RouteFields::default(),
            None,
        );
        assert_eq!(record.message, "HTTP POST /ok");
        assert!(record.meta.is_empty());
    }

    #[test]
    fn skip_rules() {
        let logger = AccessLogger::new(AccessLogConfig {
            ignored_routes: strings(&["/health"]),
            ..AccessLogConfig::default()
        })
        .with_ignore_route(|req| req.path.starts_with("/static"))
        .with_skip(|req| req.method == Method::OPTIONS);

        assert!(logger.skips(&request_info("/health", None)));
        assert!(!logger.skips(&request_info("/health?deep=1", None)));
        assert!(logger.skips(&request_info("/static/app.js", None)));
        assert!(!logger.skips(&request_info("/api", None)));
    }
}
