//! Status override for path prefixes.
//!
//! Sets the status and keeps going; a later handler that writes its own
//! status wins.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;

use crate::config::{ConfigError, StatusDirective};
use crate::http::context::RequestCtx;
use crate::http::handler::{middleware, Handler, Middleware, SharedHandler};

#[derive(Debug, Clone)]
pub struct StatusRule {
    code: StatusCode,
    paths: Vec<String>,
}

impl StatusRule {
    pub fn build(directive: &StatusDirective) -> Result<Self, ConfigError> {
        let code = StatusCode::from_u16(directive.code)
            .map_err(|e| ConfigError::Directive(format!("status {}: {e}", directive.code)))?;
        if directive.paths.is_empty() {
            return Err(ConfigError::Directive(
                "status needs at least one path".to_string(),
            ));
        }
        Ok(Self {
            code,
            paths: directive.paths.clone(),
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.paths.iter().any(|p| path.starts_with(p.as_str()))
    }

    pub fn into_middleware(self) -> Middleware {
        let rule = Arc::new(self);
        middleware(move |next| Arc::new(StatusHandler { rule, next }))
    }
}

struct StatusHandler {
    rule: Arc<StatusRule>,
    next: SharedHandler,
}

#[async_trait]
impl Handler for StatusHandler {
    async fn handle(&self, ctx: &mut RequestCtx) {
        if self.rule.matches(ctx.path()) {
            *ctx.response.status_mut() = self.rule.code;
        }
        self.next.handle(ctx).await;
    }
}
