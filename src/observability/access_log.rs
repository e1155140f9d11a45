//! Access logging (the access-log pipeline slot).
//!
//! # Responsibilities
//! - Observe the final response once per request, after every other handler
//! - Render the configured fields, in configured order, as one JSON object
//! - Hand the entry to a sink (tracing target or JSON-lines file)
//!
//! # Design Decisions
//! - Field names are validated at setup; unknown names never reach serving
//! - The response body is only buffered when a field needs its bytes

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap};
use bytes::Bytes;
use chrono::SecondsFormat;
use http_body::Body as _;
use serde_json::{Map, Value};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::{AccessLogConfig, ConfigError};
use crate::http::context::RequestCtx;
use crate::http::handler::{middleware, Handler, Middleware, SharedHandler};

/// Tracing target used by the default sink.
pub const ACCESS_TARGET: &str = "edgeway::access";

/// Fields logged when no format is configured.
pub const DEFAULT_FORMAT: &[&str] = &[
    "remote_addr",
    "host",
    "method",
    "request_uri",
    "status",
    "start_time",
    "process_time",
    "bytes_sent",
    "referer",
    "user_agent",
];

/// One loggable per-request field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessField {
    Host,
    RequestId,
    StartTime,
    Referer,
    BytesSent,
    BodyBytesSent,
    ProcessTime,
    RequestLength,
    Status,
    UserAgent,
    RemoteAddr,
    RequestUri,
    QueryString,
    RequestBody,
    RequestHeader,
    Method,
    ResponseBody,
    ResponseHeader,
}

impl AccessField {
    pub fn from_name(name: &str) -> Option<Self> {
        let field = match name {
            "host" => Self::Host,
            "request_id" => Self::RequestId,
            "start_time" => Self::StartTime,
            "referer" => Self::Referer,
            "bytes_sent" => Self::BytesSent,
            "body_bytes_sent" => Self::BodyBytesSent,
            "process_time" => Self::ProcessTime,
            "request_length" => Self::RequestLength,
            "status" => Self::Status,
            "user_agent" => Self::UserAgent,
            "remote_addr" => Self::RemoteAddr,
            "request_uri" => Self::RequestUri,
            "query_string" => Self::QueryString,
            "request_body" => Self::RequestBody,
            "request_header" => Self::RequestHeader,
            "method" => Self::Method,
            "response_body" => Self::ResponseBody,
            "response_header" => Self::ResponseHeader,
            _ => return None,
        };
        Some(field)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::RequestId => "request_id",
            Self::StartTime => "start_time",
            Self::Referer => "referer",
            Self::BytesSent => "bytes_sent",
            Self::BodyBytesSent => "body_bytes_sent",
            Self::ProcessTime => "process_time",
            Self::RequestLength => "request_length",
            Self::Status => "status",
            Self::UserAgent => "user_agent",
            Self::RemoteAddr => "remote_addr",
            Self::RequestUri => "request_uri",
            Self::QueryString => "query_string",
            Self::RequestBody => "request_body",
            Self::RequestHeader => "request_header",
            Self::Method => "method",
            Self::ResponseBody => "response_body",
            Self::ResponseHeader => "response_header",
        }
    }

    fn needs_body_len(self) -> bool {
        matches!(self, Self::BytesSent | Self::BodyBytesSent)
    }
}

/// Parse a configured format, dropping duplicates.
pub fn parse_format<S: AsRef<str>>(names: &[S]) -> Result<Vec<AccessField>, ConfigError> {
    let mut fields = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        let field = AccessField::from_name(name).ok_or_else(|| {
            ConfigError::Directive(format!("unknown access log field {name:?}"))
        })?;
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    Ok(fields)
}

/// Destination for rendered access log entries.
#[async_trait]
pub trait AccessSink: Send + Sync {
    async fn record(&self, entry: &Value);
}

/// Emits each entry as a tracing event on [`ACCESS_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl AccessSink for TracingSink {
    async fn record(&self, entry: &Value) {
        tracing::info!(target: ACCESS_TARGET, "{}", entry);
    }
}

/// Appends one JSON object per line to a file. Writes go through
/// `tokio::fs`, off the request worker.
#[derive(Debug)]
pub struct FileSink {
    out: Mutex<File>,
}

impl FileSink {
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: Mutex::new(File::from_std(file)),
        })
    }
}

#[async_trait]
impl AccessSink for FileSink {
    async fn record(&self, entry: &Value) {
        let line = format!("{entry}\n");
        let mut out = self.out.lock().await;
        let written = match out.write_all(line.as_bytes()).await {
            Ok(()) => out.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::warn!(error = %e, "Failed to write access log entry");
        }
    }
}

/// Declared length of a response body, from `Content-Length`.
fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

struct AccessLogHandler {
    fields: Arc<[AccessField]>,
    sink: Arc<dyn AccessSink>,
    next: SharedHandler,
}

#[async_trait]
impl Handler for AccessLogHandler {
    async fn handle(&self, ctx: &mut RequestCtx) {
        self.next.handle(ctx).await;

        let wants_body = self.fields.contains(&AccessField::ResponseBody);
        let known_len = ctx
            .response
            .body()
            .size_hint()
            .exact()
            .or_else(|| content_length(ctx.response.headers()));
        let needs_len = self.fields.iter().any(|f| f.needs_body_len()) && known_len.is_none();

        let mut body_bytes = None;
        if wants_body || needs_len {
            let body = std::mem::replace(ctx.response.body_mut(), Body::empty());
            match axum::body::to_bytes(body, usize::MAX).await {
                Ok(bytes) => {
                    *ctx.response.body_mut() = Body::from(bytes.clone());
                    body_bytes = Some(bytes);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to buffer response body for access log");
                }
            }
        }

        let body_len = body_bytes
            .as_ref()
            .map(|b| b.len() as u64)
            .or(known_len)
            .unwrap_or(0);
        let entry = render(ctx, &self.fields, body_bytes.as_ref(), body_len);
        self.sink.record(&entry).await;
    }
}

fn header_block(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for (name, value) in headers {
        out.push_str(name.as_str());
        out.push_str(": ");
        out.push_str(&String::from_utf8_lossy(value.as_bytes()));
        out.push_str("\r\n");
    }
    out
}

fn response_head(ctx: &RequestCtx) -> String {
    format!(
        "{:?} {}\r\n{}\r\n",
        ctx.response.version(),
        ctx.response.status(),
        header_block(ctx.response.headers())
    )
}

fn request_head(ctx: &RequestCtx) -> String {
    format!(
        "{} {} {:?}\r\n{}\r\n",
        ctx.request.method(),
        ctx.request_uri(),
        ctx.request.version(),
        header_block(ctx.request.headers())
    )
}

/// Render the selected fields into one JSON object.
pub fn render(
    ctx: &RequestCtx,
    fields: &[AccessField],
    response_body: Option<&Bytes>,
    body_len: u64,
) -> Value {
    let mut map = Map::with_capacity(fields.len());
    for &field in fields {
        let value = match field {
            AccessField::Host => Value::from(ctx.host()),
            AccessField::RequestId => Value::from(ctx.request_id.as_deref().unwrap_or("-")),
            AccessField::StartTime => Value::from(
                ctx.received_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            AccessField::Referer => {
                Value::from(ctx.request_header(header::REFERER.as_str()).unwrap_or(""))
            }
            AccessField::BytesSent => {
                Value::from(response_head(ctx).len() as u64 + body_len)
            }
            AccessField::BodyBytesSent => Value::from(body_len),
            AccessField::ProcessTime => Value::from(format!("{:?}", ctx.elapsed())),
            AccessField::RequestLength => {
                Value::from((request_head(ctx).len() + ctx.request.body().len()) as u64)
            }
            AccessField::Status => Value::from(ctx.status().as_u16()),
            AccessField::UserAgent => {
                Value::from(ctx.request_header(header::USER_AGENT.as_str()).unwrap_or(""))
            }
            AccessField::RemoteAddr => Value::from(ctx.remote_addr.to_string()),
            AccessField::RequestUri => Value::from(ctx.path()),
            AccessField::QueryString => Value::from(ctx.query()),
            AccessField::RequestBody => {
                Value::from(String::from_utf8_lossy(ctx.request.body()).into_owned())
            }
            AccessField::RequestHeader => Value::from(request_head(ctx)),
            AccessField::Method => Value::from(ctx.request.method().as_str()),
            AccessField::ResponseBody => Value::from(
                response_body
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default(),
            ),
            AccessField::ResponseHeader => Value::from(response_head(ctx)),
        };
        map.insert(field.name().to_string(), value);
    }
    Value::Object(map)
}

/// Build the access-log slot middleware from its sink.
pub fn access_log_middleware_with_sink(
    fields: Vec<AccessField>,
    sink: Arc<dyn AccessSink>,
) -> Middleware {
    let fields: Arc<[AccessField]> = fields.into();
    middleware(move |next| Arc::new(AccessLogHandler { fields, sink, next }))
}

/// Build the access-log slot middleware from configuration.
pub fn access_log_middleware(config: &AccessLogConfig) -> Result<Middleware, ConfigError> {
    let fields = parse_format(&config.format)?;
    let sink: Arc<dyn AccessSink> = match &config.access_path {
        Some(path) => Arc::new(FileSink::open(path)?),
        None => Arc::new(TracingSink),
    };
    Ok(access_log_middleware_with_sink(fields, sink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::context::test_support::ctx_with;
    use axum::http::{HeaderValue, Request, StatusCode};
    use futures_util::stream;
    use http_body::Body as _;

    #[derive(Default)]
    struct MemorySink(std::sync::Mutex<Vec<Value>>);

    #[async_trait]
    impl AccessSink for MemorySink {
        async fn record(&self, entry: &Value) {
            self.0.lock().unwrap().push(entry.clone());
        }
    }

    struct Teapot;

    #[async_trait]
    impl Handler for Teapot {
        async fn handle(&self, ctx: &mut RequestCtx) {
            ctx.error(StatusCode::IM_A_TEAPOT, "short and stout");
        }
    }

    #[test]
    fn test_parse_format() {
        let fields = parse_format(&["status", "host", "status"]).unwrap();
        assert_eq!(fields, [AccessField::Status, AccessField::Host]);
        assert!(parse_format(&["status", "nope"]).is_err());
        assert!(parse_format(DEFAULT_FORMAT).is_ok());
    }

    #[tokio::test]
    async fn test_logs_final_response_once() {
        let sink = Arc::new(MemorySink::default());
        let fields = parse_format(&[
            "method",
            "request_uri",
            "status",
            "request_id",
            "body_bytes_sent",
            "response_body",
            "user_agent",
        ])
        .unwrap();
        let m = access_log_middleware_with_sink(fields, sink.clone());
        let teapot: SharedHandler = Arc::new(Teapot);
        let handler = m(teapot);

        let request = Request::get("/brew?kind=earl")
            .header("user-agent", "kettle/1")
            .body(Bytes::new())
            .unwrap();
        let mut ctx = ctx_with(request);
        handler.handle(&mut ctx).await;

        let entries = sink.0.lock().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry["method"], "GET");
        assert_eq!(entry["request_uri"], "/brew");
        assert_eq!(entry["status"], 418);
        assert_eq!(entry["request_id"], "-");
        assert_eq!(entry["body_bytes_sent"], 15);
        assert_eq!(entry["response_body"], "short and stout");
        assert_eq!(entry["user_agent"], "kettle/1");

        let keys: Vec<_> = entry.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), 7);

        // body is still readable after logging
        drop(entries);
        let body = axum::body::to_bytes(ctx.into_response().into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"short and stout");
    }

    /// Streams its body with a declared length and no exact size hint.
    struct Streamed;

    #[async_trait]
    impl Handler for Streamed {
        async fn handle(&self, ctx: &mut RequestCtx) {
            let chunks = vec![Ok::<_, std::io::Error>(Bytes::from_static(b"abc"))];
            *ctx.response.body_mut() = Body::from_stream(stream::iter(chunks));
            ctx.response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from_static("3"));
        }
    }

    #[tokio::test]
    async fn test_declared_length_avoids_buffering() {
        let sink = Arc::new(MemorySink::default());
        let fields = parse_format(&["bytes_sent", "body_bytes_sent"]).unwrap();
        let handler = access_log_middleware_with_sink(fields, sink.clone())(Arc::new(Streamed));

        let mut ctx = ctx_with(Request::get("/").body(Bytes::new()).unwrap());
        handler.handle(&mut ctx).await;

        assert_eq!(sink.0.lock().unwrap()[0]["body_bytes_sent"], 3);
        // still the original stream, not a buffered copy
        assert_eq!(ctx.response.body().size_hint().exact(), None);
    }

    #[tokio::test]
    async fn test_file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("access.log");
        let sink = FileSink::open(&path).unwrap();
        sink.record(&serde_json::json!({"status": 200})).await;
        sink.record(&serde_json::json!({"status": 404})).await;
        drop(sink);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines, [r#"{"status":200}"#, r#"{"status":404}"#]);
    }
}
