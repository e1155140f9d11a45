//! Router slot.
//!
//! The application installs a [`RouterFactory`] programmatically; when a
//! server carries a `[servers.router]` section the factory builds the
//! handler that replaces the not-found terminal.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::Router;
use tower::ServiceExt;

use crate::config::RouterConfig;
use crate::http::context::RequestCtx;
use crate::http::handler::{middleware, Handler, Middleware, SharedHandler};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Builds the application router from its opaque settings.
pub type RouterFactory =
    Arc<dyn Fn(&RouterConfig) -> Result<SharedHandler, BoxError> + Send + Sync>;

/// Middleware that discards `next` and runs `handler` instead.
pub fn router_middleware(handler: SharedHandler) -> Middleware {
    middleware(move |_next| handler)
}

/// An `axum::Router` as a terminal handler.
#[derive(Clone)]
pub struct AxumRouter {
    router: Router,
}

impl AxumRouter {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    pub fn shared(router: Router) -> SharedHandler {
        Arc::new(Self::new(router))
    }
}

#[async_trait]
impl Handler for AxumRouter {
    async fn handle(&self, ctx: &mut RequestCtx) {
        let request = ctx.request_with_body();
        let result: Result<_, Infallible> = self.router.clone().oneshot(request).await;
        match result {
            Ok(response) => ctx.response = response,
            Err(e) => ctx.error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
}
