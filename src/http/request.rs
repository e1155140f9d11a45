//! Request identity tagging.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for every request
//! - Write it into the configured request header before any other logic
//! - Expose it on the context for logging and proxying
//!
//! # Design Decisions
//! - Runs in the identity slot, inside access logging and outside every
//!   feature middleware
//! - A client-supplied value is always replaced

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use uuid::Uuid;

use crate::config::{ConfigError, RequestIdConfig};
use crate::http::context::RequestCtx;
use crate::http::handler::{middleware, Handler, Middleware, SharedHandler};

/// Default header name for request IDs.
pub const X_REQUEST_ID: &str = "x-request-id";

/// A generated request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct RequestIdHandler {
    header: HeaderName,
    next: SharedHandler,
}

#[async_trait]
impl Handler for RequestIdHandler {
    async fn handle(&self, ctx: &mut RequestCtx) {
        let id = RequestId::new().to_string();
        if let Ok(value) = HeaderValue::from_str(&id) {
            ctx.request.headers_mut().insert(self.header.clone(), value);
        }
        ctx.request_id = Some(id);
        self.next.handle(ctx).await;
    }
}

/// Build the identity-slot middleware.
pub fn request_id_middleware(config: &RequestIdConfig) -> Result<Middleware, ConfigError> {
    let header = HeaderName::from_bytes(config.header.as_bytes()).map_err(|e| {
        ConfigError::Directive(format!("request_id header {:?}: {e}", config.header))
    })?;
    Ok(middleware(move |next| {
        Arc::new(RequestIdHandler { header, next })
    }))
}
