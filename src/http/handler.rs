//! Handler and middleware model.
//!
//! A handler consumes a `RequestCtx` and leaves the response in it. A
//! middleware wraps a handler into a new handler; wrapping happens once,
//! when the pipeline is compiled.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use bytes::Bytes;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::config::NotFoundConfig;
use crate::http::context::RequestCtx;

/// A request handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &mut RequestCtx);
}

pub type SharedHandler = Arc<dyn Handler>;

/// Wraps `next` into a new handler.
pub type Middleware = Box<dyn FnOnce(SharedHandler) -> SharedHandler + Send>;

/// Build a middleware from a constructor taking the next handler.
pub fn middleware<F>(f: F) -> Middleware
where
    F: FnOnce(SharedHandler) -> SharedHandler + Send + 'static,
{
    Box::new(f)
}

const DEFAULT_NOT_FOUND_BODY: &str = "not found";

/// Default pipeline terminal.
#[derive(Debug, Clone)]
pub enum NotFound {
    Body {
        status: StatusCode,
        content_type: HeaderValue,
        body: Bytes,
    },
    File {
        status: StatusCode,
        path: PathBuf,
    },
}

impl Default for NotFound {
    fn default() -> Self {
        Self::Body {
            status: StatusCode::NOT_FOUND,
            content_type: HeaderValue::from_static("text/plain; charset=utf-8"),
            body: Bytes::from_static(DEFAULT_NOT_FOUND_BODY.as_bytes()),
        }
    }
}

impl NotFound {
    /// Build the terminal from a `[servers.not_found]` section.
    pub fn from_config(config: &NotFoundConfig) -> Result<Self, crate::config::ConfigError> {
        let status = StatusCode::from_u16(config.code).map_err(|e| {
            crate::config::ConfigError::Directive(format!("not_found code {}: {e}", config.code))
        })?;
        if let Some(path) = &config.file {
            return Ok(Self::File {
                status,
                path: path.clone(),
            });
        }
        let content_type = HeaderValue::from_str(&config.content_type).map_err(|e| {
            crate::config::ConfigError::Directive(format!("not_found content_type: {e}"))
        })?;
        let body = config
            .body
            .clone()
            .unwrap_or_else(|| DEFAULT_NOT_FOUND_BODY.to_string());
        Ok(Self::Body {
            status,
            content_type,
            body: Bytes::from(body),
        })
    }
}

#[async_trait]
impl Handler for NotFound {
    async fn handle(&self, ctx: &mut RequestCtx) {
        match self {
            NotFound::Body {
                status,
                content_type,
                body,
            } => ctx.respond(*status, content_type, body.clone()),
            NotFound::File { status, path } => {
                let request = ctx.request_with_body();
                match ServeFile::new(path).oneshot(request).await {
                    Ok(response) => {
                        let (mut parts, body) = response.into_parts();
                        if parts.status.is_success() {
                            parts.status = *status;
                        }
                        ctx.response = axum::http::Response::from_parts(parts, Body::new(body));
                    }
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e, "Failed to serve not-found file");
                        ctx.error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
                    }
                }
            }
        }
        if ctx.response.headers().get(header::CONTENT_TYPE).is_none() {
            ctx.response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
        }
    }
}
