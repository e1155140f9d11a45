//! Request header injection.
//!
//! Values are templates executed against the request before the header is
//! written, so `X-Real-Ip = "{remote}"` works as expected.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};

use crate::config::{ConfigError, HeaderDirective};
use crate::http::context::RequestCtx;
use crate::http::handler::{middleware, Handler, Middleware, SharedHandler};
use crate::template::{RequestTags, TemplateStore};

#[derive(Debug)]
pub struct HeaderRule {
    path: String,
    headers: Vec<(HeaderName, String)>,
    templates: TemplateStore,
}

impl HeaderRule {
    pub fn build(directive: &HeaderDirective) -> Result<Self, ConfigError> {
        let mut templates = TemplateStore::new();
        let mut headers = Vec::with_capacity(directive.headers.len());
        for (name, value) in &directive.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConfigError::Directive(format!("header name {name:?}: {e}")))?;
            templates.register(value)?;
            headers.push((name, value.clone()));
        }
        Ok(Self {
            path: directive.path.clone(),
            headers,
            templates,
        })
    }

    /// Write every header whose template resolves. Failures skip that header.
    pub fn apply(&self, ctx: &mut RequestCtx) {
        if !ctx.path().starts_with(self.path.as_str()) {
            return;
        }
        let mut resolved = Vec::with_capacity(self.headers.len());
        for (name, template) in &self.headers {
            match self.templates.execute(template, &[&RequestTags(&*ctx)]) {
                Ok(value) => match HeaderValue::from_str(&value) {
                    Ok(value) => resolved.push((name.clone(), value)),
                    Err(_) => tracing::warn!(header = %name, value = %value, "Invalid header value, skipped"),
                },
                Err(e) => tracing::warn!(header = %name, error = %e, "Header template failed, skipped"),
            }
        }
        let headers = ctx.request.headers_mut();
        for (name, value) in resolved {
            headers.insert(name, value);
        }
    }

    pub fn into_middleware(self) -> Middleware {
        let rule = Arc::new(self);
        middleware(move |next| Arc::new(HeaderHandler { rule, next }))
    }
}

struct HeaderHandler {
    rule: Arc<HeaderRule>,
    next: SharedHandler,
}

#[async_trait]
impl Handler for HeaderHandler {
    async fn handle(&self, ctx: &mut RequestCtx) {
        self.rule.apply(ctx);
        self.next.handle(ctx).await;
    }
}
