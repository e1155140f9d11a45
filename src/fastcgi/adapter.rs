//! FastCGI gateway as a pipeline middleware.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, StatusCode};

use super::client::{GatewayClient, GatewayRequest, GatewayResponse, GatewayVerb};
use super::rule::GatewayRule;
use super::wire::TokioFcgiClient;
use crate::config::{ConfigError, FastcgiDirective, ServerConfig};
use crate::http::context::RequestCtx;
use crate::http::handler::{middleware, Handler, Middleware, SharedHandler};
use crate::load_balancer::{RoundRobin, UpstreamRegistry};
use crate::observability::metrics::{self, Outcome};

const SPLIT_ERROR: &str = "[fcgi] path split error";
const INTERNAL_ERROR: &str = "[fcgi] internal error";

/// One `fastcgi` directive bound to its upstream.
pub struct GatewayAdapter {
    rule: GatewayRule,
    balancer: RoundRobin,
    client: Arc<dyn GatewayClient>,
    debug: bool,
}

impl GatewayAdapter {
    pub fn build(
        directive: &FastcgiDirective,
        server: &ServerConfig,
        registry: &UpstreamRegistry,
    ) -> Result<Self, ConfigError> {
        let rule = GatewayRule::build(directive, &server.root, &server.server_name)?;
        let upstream = registry.resolve(&directive.upstream)?;
        let balancer = RoundRobin::new(upstream).ok_or_else(|| {
            ConfigError::Directive(format!("upstream {} has no backends", upstream.name))
        })?;
        let client = Arc::new(TokioFcgiClient::new(
            directive.read_timeout,
            directive.send_timeout,
        ));
        Ok(Self {
            rule,
            balancer,
            client,
            debug: directive.debug,
        })
    }

    /// Replace the wire client.
    pub fn with_client(mut self, client: Arc<dyn GatewayClient>) -> Self {
        self.client = client;
        self
    }

    pub fn rule(&self) -> &GatewayRule {
        &self.rule
    }

    pub fn into_middleware(self) -> Middleware {
        let adapter = Arc::new(self);
        middleware(move |next| Arc::new(GatewayHandler { adapter, next }))
    }

    fn build_request(&self, ctx: &mut RequestCtx) -> Result<GatewayRequest, (StatusCode, String)> {
        let info = self.rule.split_path(ctx.path()).map_err(|e| {
            self.log_failure(ctx, &e.to_string());
            (StatusCode::INTERNAL_SERVER_ERROR, SPLIT_ERROR.to_string())
        })?;
        let env = self.rule.build_env(ctx, &info).map_err(|e| {
            self.log_failure(ctx, &e.to_string());
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR.to_string())
        })?;
        let verb = GatewayVerb::from_request(
            ctx.request.method(),
            ctx.request_header(header::CONTENT_TYPE.as_str()).unwrap_or(""),
            ctx.request.body().len(),
        );
        let body = ctx.request.body().clone();
        ctx.path_info = Some(info);
        Ok(GatewayRequest { env, verb, body })
    }

    async fn serve(&self, ctx: &mut RequestCtx) {
        let request = match self.build_request(ctx) {
            Ok(request) => request,
            Err((status, text)) => {
                ctx.error(status, text);
                return;
            }
        };

        let backend = self.balancer.next_backend();
        let backend_label = backend.to_string();
        match self.client.round_trip(backend, request).await {
            Ok(response) => {
                metrics::record_upstream("fastcgi", &backend_label, Outcome::Success);
                apply_response(ctx, response);
            }
            Err(e) => {
                let outcome = if e.status() == StatusCode::GATEWAY_TIMEOUT {
                    Outcome::Timeout
                } else {
                    Outcome::Error
                };
                metrics::record_upstream("fastcgi", &backend_label, outcome);
                self.log_failure(ctx, &format!("backend {backend_label}: {e}"));
                ctx.error(e.status(), e.public_text());
            }
        }
    }

    fn log_failure(&self, ctx: &RequestCtx, error: &str) {
        if self.debug {
            tracing::error!(
                request_id = ctx.request_id.as_deref().unwrap_or("-"),
                method = %ctx.request.method(),
                uri = %ctx.request_uri(),
                remote = %ctx.remote_addr,
                path_info = ?ctx.path_info,
                error = %error,
                "FastCGI request failed"
            );
        } else {
            tracing::warn!(path = %ctx.path(), error = %error, "FastCGI request failed");
        }
    }
}

/// Copy every backend header onto the response, replacing same-named ones.
fn apply_response(ctx: &mut RequestCtx, response: GatewayResponse) {
    let headers = ctx.response.headers_mut();
    for name in response.headers.keys() {
        headers.remove(name);
        for value in response.headers.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    *ctx.response.status_mut() = response.status;
    *ctx.response.body_mut() = Body::from(response.body);
}

struct GatewayHandler {
    adapter: Arc<GatewayAdapter>,
    next: SharedHandler,
}

#[async_trait]
impl Handler for GatewayHandler {
    async fn handle(&self, ctx: &mut RequestCtx) {
        if !self.adapter.rule.matches(ctx.path()) {
            self.next.handle(ctx).await;
            return;
        }
        self.adapter.serve(ctx).await;
    }
}
