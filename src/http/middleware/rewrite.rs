//! Path rewriting.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Uri;
use regex::Regex;

use crate::config::{ConfigError, RewriteDirective};
use crate::http::context::RequestCtx;
use crate::http::handler::{middleware, Handler, Middleware, SharedHandler};

/// Replaces the whole path when `from` matches. `{n}` in `to` is capture
/// group `n`.
#[derive(Debug, Clone)]
pub struct Rewriter {
    from: Regex,
    to: String,
}

impl Rewriter {
    pub fn new(from: &str, to: &str) -> Result<Self, ConfigError> {
        let re = Regex::new(from).map_err(|source| ConfigError::Pattern {
            pattern: from.to_string(),
            source,
        })?;
        Ok(Self {
            from: re,
            to: to.to_string(),
        })
    }

    pub fn from_directive(directive: &RewriteDirective) -> Result<Self, ConfigError> {
        Self::new(&directive.from, &directive.to)
    }

    /// The rewritten path, or `None` when `from` does not match.
    pub fn rewrite(&self, path: &str) -> Option<String> {
        let caps = self.from.captures(path)?;
        let mut out = self.to.clone();
        for i in 1..caps.len() {
            let group = caps.get(i).map(|m| m.as_str()).unwrap_or("");
            out = out.replace(&format!("{{{i}}}"), group);
        }
        Some(out)
    }

    /// Rewrite the request path in place, keeping the query string. A query
    /// already present in the target comes first.
    pub fn apply(&self, ctx: &mut RequestCtx) {
        let Some(path) = self.rewrite(ctx.path()) else {
            return;
        };
        if path.is_empty() {
            return;
        }
        let target = match ctx.query() {
            "" => path,
            query if path.contains('?') => format!("{path}&{query}"),
            query => format!("{path}?{query}"),
        };
        match target.parse::<Uri>() {
            Ok(uri) => *ctx.request.uri_mut() = uri,
            Err(e) => tracing::warn!(target = %target, error = %e, "Rewritten path is not a valid URI"),
        }
    }

    pub fn into_middleware(self) -> Middleware {
        let rewriter = Arc::new(self);
        middleware(move |next| Arc::new(RewriteHandler { rewriter, next }))
    }
}

struct RewriteHandler {
    rewriter: Arc<Rewriter>,
    next: SharedHandler,
}

#[async_trait]
impl Handler for RewriteHandler {
    async fn handle(&self, ctx: &mut RequestCtx) {
        self.rewriter.apply(ctx);
        self.next.handle(ctx).await;
    }
}
