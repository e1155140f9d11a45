//! Inline responses.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;

use crate::config::{ConfigError, ResponseDirective};
use crate::http::context::RequestCtx;
use crate::http::handler::{middleware, Handler, Middleware, SharedHandler};
use crate::routing::{LocationMatcher, LocationRule};

/// Answers matching requests directly; everything else goes to `next`.
#[derive(Debug, Clone)]
pub struct InlineResponse {
    location: LocationRule,
    status: StatusCode,
    content_type: HeaderValue,
    body: Bytes,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl InlineResponse {
    pub fn build(directive: &ResponseDirective) -> Result<Self, ConfigError> {
        let location = match (&directive.path, &directive.pattern) {
            (Some(path), None) => LocationRule::prefix(path.clone()),
            (None, Some(pattern)) => LocationRule::pattern(pattern)?,
            (Some(_), Some(_)) => {
                return Err(ConfigError::Directive(
                    "response path and pattern are exclusive".to_string(),
                ))
            }
            (None, None) => {
                return Err(ConfigError::Directive(
                    "response needs a path or a pattern".to_string(),
                ))
            }
        };
        let status = StatusCode::from_u16(directive.code)
            .map_err(|e| ConfigError::Directive(format!("response code {}: {e}", directive.code)))?;
        let content_type = HeaderValue::from_str(&directive.content_type)
            .map_err(|e| ConfigError::Directive(format!("response content_type: {e}")))?;
        let headers = crate::proxy::dispatcher::parse_header_pairs(&directive.headers, "response")?;
        Ok(Self {
            location,
            status,
            content_type,
            body: Bytes::from(directive.body.clone()),
            headers,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.location.matches(path)
    }

    fn write(&self, ctx: &mut RequestCtx) {
        ctx.respond(self.status, &self.content_type, self.body.clone());
        let headers = ctx.response.headers_mut();
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
    }

    pub fn into_middleware(self) -> Middleware {
        let response = Arc::new(self);
        middleware(move |next| Arc::new(ResponseHandler { response, next }))
    }
}

struct ResponseHandler {
    response: Arc<InlineResponse>,
    next: SharedHandler,
}

#[async_trait]
impl Handler for ResponseHandler {
    async fn handle(&self, ctx: &mut RequestCtx) {
        if self.response.matches(ctx.path()) {
            self.response.write(ctx);
        } else {
            self.next.handle(ctx).await;
        }
    }
}
