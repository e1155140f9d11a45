//! Static file serving.
//!
//! # Responsibilities
//! - Gate on a path prefix and strip it before the file lookup
//! - Try index names in order for directory requests
//! - Delegate the actual file response to `tower-http` `ServeDir`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{StatusCode, Uri};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::config::StaticDirective;
use crate::http::context::RequestCtx;
use crate::http::handler::{middleware, Handler, Middleware, SharedHandler};

#[derive(Debug, Clone)]
pub struct StaticFiles {
    prefix: String,
    root: PathBuf,
    index: Vec<String>,
    service: ServeDir,
}

impl StaticFiles {
    /// `root` is the server default used when the directive has none.
    pub fn build(directive: &StaticDirective, root: &Path) -> Self {
        let root = directive.root.clone().unwrap_or_else(|| root.to_path_buf());
        let mut service = ServeDir::new(&root).append_index_html_on_directories(false);
        if directive.precompressed_gzip {
            service = service.precompressed_gzip();
        }
        Self {
            prefix: directive.path.clone(),
            root,
            index: directive.index.clone(),
            service,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(self.prefix.as_str())
    }

    /// Path relative to the root, always starting with `/`.
    fn strip(&self, path: &str) -> String {
        let rest = path
            .strip_prefix(self.prefix.trim_end_matches('/'))
            .unwrap_or(path);
        if rest.is_empty() {
            "/".to_string()
        } else if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{rest}")
        }
    }

    async fn resolve_index(&self, mut path: String) -> String {
        if !path.ends_with('/') {
            return path;
        }
        let dir = self.root.join(path.trim_start_matches('/'));
        for name in &self.index {
            let is_file = tokio::fs::metadata(dir.join(name))
                .await
                .is_ok_and(|m| m.is_file());
            if is_file {
                path.push_str(name);
                break;
            }
        }
        path
    }

    async fn serve(&self, ctx: &mut RequestCtx) {
        let stripped = self.strip(ctx.path());
        let path = self.resolve_index(stripped).await;
        let target = match ctx.query() {
            "" => path,
            query => format!("{path}?{query}"),
        };

        let mut request = ctx.request_with_body();
        match target.parse::<Uri>() {
            Ok(uri) => *request.uri_mut() = uri,
            Err(_) => {
                ctx.error(StatusCode::BAD_REQUEST, "Bad Request");
                return;
            }
        }

        match self.service.clone().oneshot(request).await {
            Ok(response) => ctx.response = response.map(Body::new),
            Err(e) => {
                tracing::error!(root = %self.root.display(), error = %e, "Static file service failed");
                ctx.error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        }
    }

    pub fn into_middleware(self) -> Middleware {
        let files = Arc::new(self);
        middleware(move |next| Arc::new(StaticHandler { files, next }))
    }
}

struct StaticHandler {
    files: Arc<StaticFiles>,
    next: SharedHandler,
}

#[async_trait]
impl Handler for StaticHandler {
    async fn handle(&self, ctx: &mut RequestCtx) {
        if self.files.matches(ctx.path()) {
            self.files.serve(ctx).await;
        } else {
            self.next.handle(ctx).await;
        }
    }
}
