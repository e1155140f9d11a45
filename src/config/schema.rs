//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the edge.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EdgeConfig {
    /// Diagnostic logging settings.
    pub logging: LoggingConfig,

    /// Prometheus exporter settings.
    pub metrics: MetricsConfig,

    /// Named backend pools shared by every server.
    pub upstreams: Vec<UpstreamConfig>,

    /// One entry per listener.
    pub servers: Vec<ServerConfig>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Scrape endpoint bind address.
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// A named pool of backends.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    pub name: String,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// Backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// `host:port`, or `unix:/path/to.sock` for a unix socket.
    pub address: String,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Only used when the upstream has no primary backend.
    #[serde(default)]
    pub backup: bool,
}

fn default_weight() -> u32 {
    1
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub address: String,

    /// Document root used by static and fastcgi directives.
    pub root: PathBuf,

    pub server_name: String,

    /// Maximum in-flight requests (backpressure).
    pub concurrency: usize,

    /// Request bodies above this size are rejected with 413.
    pub max_request_body_size: usize,

    pub timeouts: TimeoutConfig,

    pub gzip: Option<GzipConfig>,

    /// Enables the identity slot.
    pub request_id: Option<RequestIdConfig>,

    /// Enables the access-log slot.
    pub access_log: Option<AccessLogConfig>,

    pub not_found: Option<NotFoundConfig>,

    /// Enables the router slot when a router factory is installed.
    pub router: Option<RouterConfig>,

    /// Ordered feature directives, registered in file order.
    pub directives: Vec<Directive>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
            root: PathBuf::from("."),
            server_name: "localhost".to_string(),
            concurrency: 10_000,
            max_request_body_size: 4 * 1024 * 1024,
            timeouts: TimeoutConfig::default(),
            gzip: None,
            request_id: None,
            access_log: None,
            not_found: None,
            router: None,
            directives: Vec::new(),
        }
    }
}

/// Timeout configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request budget enforced at the listener.
    #[serde(with = "humantime_serde")]
    pub request: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GzipConfig {
    pub level: u32,
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self { level: 6 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestIdConfig {
    pub header: String,
}

impl Default for RequestIdConfig {
    fn default() -> Self {
        Self {
            header: "X-Request-Id".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessLogConfig {
    /// Field names, in output order.
    pub format: Vec<String>,

    /// Append JSON lines to this file instead of the tracing sink.
    pub access_path: Option<PathBuf>,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            format: crate::observability::access_log::DEFAULT_FORMAT
                .iter()
                .map(|s| s.to_string())
                .collect(),
            access_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotFoundConfig {
    pub code: u16,
    pub content_type: String,
    pub body: Option<String>,
    /// Streamed from disk instead of `body`.
    pub file: Option<PathBuf>,
}

impl Default for NotFoundConfig {
    fn default() -> Self {
        Self {
            code: 404,
            content_type: "text/html; charset=utf-8".to_string(),
            body: None,
            file: None,
        }
    }
}

/// Opaque settings handed to the injected router factory.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    pub config: String,
}

/// A location as written in config: `"/prefix"` or `["label", "regex"]`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum LocationSpec {
    Prefix(String),
    Tokens(Vec<String>),
}

impl LocationSpec {
    pub fn tokens(&self) -> Vec<&str> {
        match self {
            LocationSpec::Prefix(p) => vec![p.as_str()],
            LocationSpec::Tokens(t) => t.iter().map(String::as_str).collect(),
        }
    }
}

impl Default for LocationSpec {
    fn default() -> Self {
        LocationSpec::Prefix("/".to_string())
    }
}

/// One feature directive.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Directive {
    Proxy(ProxyDirective),
    Fastcgi(FastcgiDirective),
    Header(HeaderDirective),
    Rewrite(RewriteDirective),
    Status(StatusDirective),
    Response(ResponseDirective),
    Static(StaticDirective),
}

impl Directive {
    pub fn kind(&self) -> &'static str {
        match self {
            Directive::Proxy(_) => "proxy",
            Directive::Fastcgi(_) => "fastcgi",
            Directive::Header(_) => "header",
            Directive::Rewrite(_) => "rewrite",
            Directive::Status(_) => "status",
            Directive::Response(_) => "response",
            Directive::Static(_) => "static",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyDirective {
    pub location: LocationSpec,
    pub exclude: Option<LocationSpec>,

    /// Inline backend addresses.
    pub backends: Vec<String>,

    /// Named upstream, used when `backends` is empty.
    pub upstream: Option<String>,

    /// Overwritten on the outbound request.
    pub header_upstream: Vec<(String, String)>,

    /// Overwritten on the response before it reaches the client.
    pub header_downstream: Vec<(String, String)>,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Per-backend cap on concurrent connections.
    pub max_connections: Option<usize>,
}

impl Default for ProxyDirective {
    fn default() -> Self {
        Self {
            location: LocationSpec::default(),
            exclude: None,
            backends: Vec::new(),
            upstream: None,
            header_upstream: Vec::new(),
            header_downstream: Vec::new(),
            timeout: Duration::from_secs(30),
            max_connections: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FastcgiDirective {
    pub location: LocationSpec,
    pub exclude: Option<LocationSpec>,

    /// Upstream pool of FastCGI backends (required).
    pub upstream: String,

    /// Defaults to the server root.
    pub root: Option<PathBuf>,

    pub index: String,

    /// Regex whose group 1 is the script name and group 2 the path info.
    pub split_path_info: Option<String>,

    /// Template using `$document_root` and `$fastcgi_script_name`.
    pub script_filename: Option<String>,

    /// Replaces the root as SCRIPT_FILENAME base.
    pub script_filename_prefix: Option<String>,

    /// Extra environment variables; values are templates.
    pub params: Vec<(String, String)>,

    pub server_software: String,

    /// Defaults to the server's `server_name`.
    pub server_name: Option<String>,

    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,

    /// Log per-request failures with full context.
    pub debug: bool,
}

impl Default for FastcgiDirective {
    fn default() -> Self {
        Self {
            location: LocationSpec::default(),
            exclude: None,
            upstream: String::new(),
            root: None,
            index: "index.php".to_string(),
            split_path_info: None,
            script_filename: None,
            script_filename_prefix: None,
            params: Vec::new(),
            server_software: "edgeway".to_string(),
            server_name: None,
            read_timeout: Duration::from_secs(60),
            send_timeout: Duration::from_secs(60),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HeaderDirective {
    /// Path prefix the headers apply to.
    pub path: String,
    /// Header name and value template pairs.
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteDirective {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusDirective {
    pub code: u16,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResponseDirective {
    /// Prefix rule (exclusive with `pattern`).
    pub path: Option<String>,
    /// Regex rule (exclusive with `path`).
    pub pattern: Option<String>,
    pub code: u16,
    pub content_type: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl Default for ResponseDirective {
    fn default() -> Self {
        Self {
            path: None,
            pattern: None,
            code: 200,
            content_type: "text/html; charset=utf-8".to_string(),
            body: String::new(),
            headers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticDirective {
    /// URL prefix, stripped before the file lookup.
    pub path: String,
    /// Directory served; defaults to the server root.
    pub root: Option<PathBuf>,
    /// Index names tried in order for directory requests.
    pub index: Vec<String>,
    pub precompressed_gzip: bool,
}

impl Default for StaticDirective {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            root: None,
            index: vec!["index.html".to_string()],
            precompressed_gzip: false,
        }
    }
}
