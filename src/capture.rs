//! Snapshots of the request and response the loggers filter fields from.

use axum::{
    body::Body,
    extract::OriginalUri,
    http::{header, request::Parts, Extensions, HeaderMap, Method, Request, StatusCode, Uri, Version},
};
use bytes::BytesMut;
use futures::{stream, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::filter::FieldSource;

/// Parsed JSON request body, left in the request extensions by the access
/// logger so the error logger further in can reuse it.
#[derive(Debug, Clone)]
pub struct CapturedBody(pub Value);

/// Request as seen at pipeline entry.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    /// Normalized URL: the original URI when the framework recorded one.
    pub url: String,
    pub path: String,
    pub query: Option<String>,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl RequestInfo {
    pub fn from_parts(parts: &Parts) -> Self {
        Self::snapshot(
            &parts.method,
            &parts.uri,
            parts.version,
            &parts.headers,
            &parts.extensions,
        )
    }

    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self::snapshot(
            request.method(),
            request.uri(),
            request.version(),
            request.headers(),
            request.extensions(),
        )
    }

    fn snapshot(
        method: &Method,
        uri: &Uri,
        version: Version,
        headers: &HeaderMap,
        extensions: &Extensions,
    ) -> Self {
        let uri = extensions
            .get::<OriginalUri>()
            .map(|original| &original.0)
            .unwrap_or(uri);

        Self {
            method: method.clone(),
            url: uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| uri.path().to_string()),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            version,
            headers: headers.clone(),
            body: extensions
                .get::<CapturedBody>()
                .map(|captured| captured.0.clone()),
        }
    }
}

impl FieldSource for RequestInfo {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "method" => Some(Value::String(self.method.to_string())),
            "url" | "originalUrl" => Some(Value::String(self.url.clone())),
            "path" => Some(Value::String(self.path.clone())),
            "httpVersion" => Some(Value::String(http_version(self.version).to_string())),
            "headers" => Some(Value::Object(headers_to_map(&self.headers))),
            "query" => Some(Value::Object(parse_query(self.query.as_deref()))),
            "body" => self.body.clone(),
            _ => None,
        }
    }

    fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = [
            "method",
            "url",
            "originalUrl",
            "path",
            "httpVersion",
            "headers",
            "query",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        if self.body.is_some() {
            names.push("body".to_string());
        }
        names
    }
}

/// Response as seen when its body finishes streaming.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Milliseconds since the request entered the pipeline, once finalized.
    pub response_time: Option<u64>,
}

impl ResponseInfo {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            status,
            headers,
            response_time: None,
        }
    }

    pub fn is_json(&self) -> bool {
        is_json_content(&self.headers)
    }
}

impl FieldSource for ResponseInfo {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "statusCode" => Some(Value::from(self.status.as_u16())),
            "statusMessage" => self
                .status
                .canonical_reason()
                .map(|reason| Value::String(reason.to_string())),
            "headers" => Some(Value::Object(headers_to_map(&self.headers))),
            "responseTime" => self.response_time.map(Value::from),
            _ => None,
        }
    }

    fn field_names(&self) -> Vec<String> {
        let mut names = vec!["statusCode".to_string(), "headers".to_string()];
        if self.status.canonical_reason().is_some() {
            names.push("statusMessage".to_string());
        }
        if self.response_time.is_some() {
            names.push("responseTime".to_string());
        }
        names
    }
}

pub fn http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_11 => "1.1",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "unknown",
    }
}

/// Header names to string values; repeated headers are joined with `", "`
/// and values that are not valid UTF-8 are rendered lossily.
pub fn headers_to_map(headers: &HeaderMap) -> Map<String, Value> {
    let mut map = Map::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        map.insert(name.as_str().to_string(), Value::String(joined));
    }
    map
}

/// Query string to an object. Repeated keys collect into arrays.
pub fn parse_query(query: Option<&str>) -> Map<String, Value> {
    let mut map = Map::new();
    let Some(query) = query else {
        return map;
    };

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let value = Value::String(value.into_owned());
        match map.get_mut(key.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    map
}

pub fn is_json_content(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("json"))
        .unwrap_or(false)
}

/// Whether the body should be buffered and parsed: JSON content with a
/// declared length no larger than `limit`.
pub fn should_capture_body(headers: &HeaderMap, limit: usize) -> bool {
    if !is_json_content(headers) {
        return false;
    }

    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .map(|len| len > 0 && len <= limit)
        .unwrap_or(false)
}

/// Buffers a JSON body, parses it and hands back a request carrying the
/// same bytes. On success the parsed value is also stored as [`CapturedBody`].
///
/// Never fails the request: a body that errors while being read, or turns out
/// longer than `limit`, is forwarded unparsed. The handler sees the bytes
/// already read followed by the rest of the stream, error included.
pub async fn capture_body(
    request: Request<Body>,
    limit: usize,
) -> (Request<Body>, Option<Value>) {
    let (mut parts, body) = request.into_parts();
    let mut data = body.into_data_stream();
    let mut buf = BytesMut::new();

    while let Some(chunk) = data.next().await {
        match chunk {
            Ok(chunk) => {
                buf.extend_from_slice(&chunk);
                if buf.len() > limit {
                    debug!(limit, "Request body longer than declared, forwarding it unparsed");
                    let replay = stream::once(async move { Ok(buf.freeze()) }).chain(data);
                    return (Request::from_parts(parts, Body::from_stream(replay)), None);
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read request body, forwarding it unparsed");
                let replay = stream::iter(vec![Ok(buf.freeze()), Err(e)]);
                return (Request::from_parts(parts, Body::from_stream(replay)), None);
            }
        }
    }

    let bytes = buf.freeze();
    let parsed = match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, "Request body is not valid JSON, logging it without a body");
            None
        }
    };

    if let Some(value) = &parsed {
        parts.extensions.insert(CapturedBody(value.clone()));
    }

    (Request::from_parts(parts, Body::from(bytes)), parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn request_fields() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/users?page=2&tag=a&tag=b")
            .header("x-trace", "1")
            .header("accept", "text/plain")
            .header("accept", "application/json")
            .body(())
            .unwrap();
        let info = RequestInfo::from_request(&request);

        assert_eq!(info.field("method"), Some(json!("POST")));
        assert_eq!(info.field("url"), Some(json!("/users?page=2&tag=a&tag=b")));
        assert_eq!(info.field("path"), Some(json!("/users")));
        assert_eq!(info.field("httpVersion"), Some(json!("1.1")));
        assert_eq!(
            info.field("query"),
            Some(json!({"page": "2", "tag": ["a", "b"]}))
        );
        assert_eq!(
            info.field("headers"),
            Some(json!({"x-trace": "1", "accept": "text/plain, application/json"}))
        );
        assert_eq!(info.field("body"), None);
        assert_eq!(info.field("nope"), None);
    }

    #[test]
    fn original_uri_wins() {
        let mut request = Request::builder().uri("/inner").body(()).unwrap();
        request
            .extensions_mut()
            .insert(OriginalUri(Uri::from_static("/api/inner?x=1")));
        let info = RequestInfo::from_request(&request);
        assert_eq!(info.url, "/api/inner?x=1");
        assert_eq!(info.field("originalUrl"), Some(json!("/api/inner?x=1")));

        let (parts, ()) = request.into_parts();
        assert_eq!(RequestInfo::from_parts(&parts).url, "/api/inner?x=1");
    }

    #[test]
    fn empty_query_is_an_empty_object() {
        let request = Request::builder().uri("/").body(()).unwrap();
        let info = RequestInfo::from_request(&request);
        assert_eq!(info.field("query"), Some(json!({})));
    }

    #[test]
    fn response_fields() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut info = ResponseInfo::new(StatusCode::NOT_FOUND, headers);
        assert!(info.is_json());
        assert_eq!(info.field("statusCode"), Some(json!(404)));
        assert_eq!(info.field("statusMessage"), Some(json!("Not Found")));
        assert_eq!(info.field("responseTime"), None);
        info.response_time = Some(12);
        assert_eq!(info.field("responseTime"), Some(json!(12)));
    }

    #[test]
    fn capture_requires_json_with_length() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!should_capture_body(&headers, 1024));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("20"));
        assert!(should_capture_body(&headers, 1024));
        assert!(!should_capture_body(&headers, 10));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(!should_capture_body(&headers, 1024));
    }

    #[tokio::test]
    async fn capture_body_keeps_bytes() {
        let raw = r#"{"name":"bob"}"#;
        let request = Request::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(raw))
            .unwrap();
        let (request, parsed) = capture_body(request, 1024).await;
        assert_eq!(parsed, Some(json!({"name": "bob"})));
        assert!(request.extensions().get::<CapturedBody>().is_some());

        let bytes = axum::body::to_bytes(request.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], raw.as_bytes());
    }

    #[tokio::test]
    async fn capture_body_tolerates_invalid_json() {
        let request = Request::builder().body(Body::from("{not json")).unwrap();
        let (request, parsed) = capture_body(request, 1024).await;
        assert!(parsed.is_none());
        assert!(request.extensions().get::<CapturedBody>().is_none());
    }

    #[tokio::test]
    async fn capture_body_replays_read_error() {
        let chunks = stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"{\"a\"")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let request = Request::builder().body(Body::from_stream(chunks)).unwrap();
        let (request, parsed) = capture_body(request, 1024).await;
        assert!(parsed.is_none());

        let mut data = request.into_body().into_data_stream();
        assert_eq!(&data.next().await.unwrap().unwrap()[..], b"{\"a\"");
        let err = data.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("reset"));
    }

    #[tokio::test]
    async fn capture_body_forwards_oversized_body() {
        let raw = r#"{"name":"a long name"}"#;
        let request = Request::builder().body(Body::from(raw)).unwrap();
        let (request, parsed) = capture_body(request, 4).await;
        assert!(parsed.is_none());

        let bytes = axum::body::to_bytes(request.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], raw.as_bytes());
    }
}
