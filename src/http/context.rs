//! Per-request context.
//!
//! # Responsibilities
//! - Own the buffered request and the response being built
//! - Carry connection addresses and timing for logging and CGI variables
//! - Hold typed per-request scratch state (request id, path info)
//!
//! # Design Decisions
//! - Passed by `&mut` through the handler chain; never shared across requests
//! - Error pages replace the response wholesale, so a client never sees a
//!   partial backend response mixed with an error

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response, StatusCode};
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::fastcgi::PathInfo;

/// Address of one end of a client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnAddr {
    Ip(SocketAddr),
    Unix(PathBuf),
}

impl ConnAddr {
    /// The IP socket address, if this is an IP connection.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            ConnAddr::Ip(addr) => Some(*addr),
            ConnAddr::Unix(_) => None,
        }
    }
}

impl fmt::Display for ConnAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnAddr::Ip(addr) => write!(f, "{addr}"),
            ConnAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl From<SocketAddr> for ConnAddr {
    fn from(addr: SocketAddr) -> Self {
        ConnAddr::Ip(addr)
    }
}

/// Everything a handler sees about one request.
#[derive(Debug)]
pub struct RequestCtx {
    pub request: Request<Bytes>,
    pub response: Response<Body>,
    pub remote_addr: ConnAddr,
    pub local_addr: ConnAddr,
    /// Wall-clock receive time.
    pub received_at: DateTime<Utc>,
    /// Monotonic start, for latency.
    pub started: Instant,
    /// Correlation id set by the identity slot.
    pub request_id: Option<String>,
    /// Script name and path info computed by the gateway adapter.
    pub path_info: Option<PathInfo>,
}

impl RequestCtx {
    pub fn new(request: Request<Bytes>, remote_addr: ConnAddr, local_addr: ConnAddr) -> Self {
        Self {
            request,
            response: Response::new(Body::empty()),
            remote_addr,
            local_addr,
            received_at: Utc::now(),
            started: Instant::now(),
            request_id: None,
            path_info: None,
        }
    }

    pub fn path(&self) -> &str {
        self.request.uri().path()
    }

    /// Raw query string without the leading `?`.
    pub fn query(&self) -> &str {
        self.request.uri().query().unwrap_or("")
    }

    /// Path plus query, as sent by the client.
    pub fn request_uri(&self) -> &str {
        self.request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    }

    /// `Host` header, falling back to the URI authority.
    pub fn host(&self) -> &str {
        self.request_header(header::HOST.as_str())
            .or_else(|| self.request.uri().authority().map(|a| a.as_str()))
            .unwrap_or("")
    }

    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
    }

    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
    }

    /// Decoded value of the first query argument named `key`.
    pub fn query_arg(&self, key: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query().as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Value of the cookie named `name`.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.request
            .headers()
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Replace the response with a plain-text error page.
    pub fn error(&mut self, status: StatusCode, text: impl Into<String>) {
        let mut response = Response::new(Body::from(text.into()));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.response = response;
    }

    /// Replace the response with a body of the given content type.
    pub fn respond(&mut self, status: StatusCode, content_type: &HeaderValue, body: impl Into<Body>) {
        let mut response = Response::new(body.into());
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type.clone());
        self.response = response;
    }

    /// Clone the request into a streaming body, for tower services.
    pub fn request_with_body(&self) -> Request<Body> {
        let mut builder = Request::builder()
            .method(self.request.method().clone())
            .uri(self.request.uri().clone())
            .version(self.request.version());
        if let Some(headers) = builder.headers_mut() {
            *headers = self.request.headers().clone();
        }
        let mut request = builder
            .body(Body::from(self.request.body().clone()))
            .unwrap_or_else(|_| Request::new(Body::empty()));
        *request.extensions_mut() = self.request.extensions().clone();
        request
    }

    pub fn into_response(self) -> Response<Body> {
        self.response
    }
}
