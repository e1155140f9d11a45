//! Reverse-proxy dispatcher.
//!
//! # Responsibilities
//! - Gate on the directive's location; pass everything else to `next`
//! - Rewrite upstream request headers and downstream response headers
//! - Pick the least loaded backend that is under its connection cap
//! - Bound the whole round trip (headers and body) by the timeout
//!
//! # Design Decisions
//! - The backend response is buffered inside the timeout, so the client sees
//!   either the full backend response or an error page, never a mix
//! - Timeout maps to 504; every other transport failure maps to 503 with
//!   the error text as body

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request, Response, StatusCode, Uri};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::config::{ConfigError, ProxyDirective};
use crate::http::context::RequestCtx;
use crate::http::handler::{middleware, Handler, Middleware, SharedHandler};
use crate::load_balancer::{Backend, LeastConnections, Transport, UpstreamRegistry};
use crate::observability::metrics::{self, Outcome};
use crate::routing::{LocationMatcher, LocationRule};

/// Request-time proxy failures.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("no backend available: all backends at connection limit")]
    Saturated,

    #[error("invalid upstream uri: {0}")]
    Uri(#[from] axum::http::Error),

    #[error("upstream request failed: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),

    #[error("upstream body failed: {0}")]
    Body(#[from] hyper::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

pub(crate) fn parse_header_pairs(
    pairs: &[(String, String)],
    what: &str,
) -> Result<Vec<(HeaderName, HeaderValue)>, ConfigError> {
    pairs
        .iter()
        .map(|(k, v)| {
            let name = HeaderName::from_str(k)
                .map_err(|e| ConfigError::Directive(format!("{what} header name {k:?}: {e}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| ConfigError::Directive(format!("{what} header value {v:?}: {e}")))?;
            Ok((name, value))
        })
        .collect()
}

/// A configured reverse proxy.
pub struct ReverseProxy {
    location: LocationRule,
    pool: LeastConnections,
    header_upstream: Vec<(HeaderName, HeaderValue)>,
    header_downstream: Vec<(HeaderName, HeaderValue)>,
    timeout: Duration,
    client: Client<HttpConnector, Body>,
}

impl ReverseProxy {
    /// Build a proxy from its directive.
    ///
    /// Inline `backends` take precedence over a named `upstream`. Zero
    /// usable backends is a configuration error.
    pub fn build(
        directive: &ProxyDirective,
        upstreams: &UpstreamRegistry,
    ) -> Result<Self, ConfigError> {
        let mut location = LocationRule::build(&directive.location.tokens())?;
        if let Some(exclude) = &directive.exclude {
            location = LocationRule::combine(location, LocationRule::build(&exclude.tokens())?);
        }

        let backends = if !directive.backends.is_empty() {
            directive
                .backends
                .iter()
                .map(|a| Backend::parse(a))
                .collect::<Result<Vec<_>, _>>()?
        } else if let Some(name) = &directive.upstream {
            let upstream = upstreams.resolve(name)?;
            let primary: Vec<Backend> = upstream
                .backends
                .iter()
                .filter(|b| !b.backup)
                .cloned()
                .collect();
            if primary.is_empty() {
                upstream.backends.clone()
            } else {
                primary
            }
        } else {
            Vec::new()
        };

        if let Some(b) = backends.iter().find(|b| b.transport != Transport::Tcp) {
            return Err(ConfigError::Directive(format!(
                "proxy backend {b} is not a tcp address"
            )));
        }
        if backends.is_empty() {
            return Err(ConfigError::Directive("proxy has no backends".to_string()));
        }

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Self {
            location,
            pool: LeastConnections::new(backends, directive.max_connections),
            header_upstream: parse_header_pairs(&directive.header_upstream, "upstream")?,
            header_downstream: parse_header_pairs(&directive.header_downstream, "downstream")?,
            timeout: directive.timeout,
            client,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.location.matches(path)
    }

    pub fn backends(&self) -> impl Iterator<Item = &Backend> {
        self.pool.backends()
    }

    fn outbound(&self, ctx: &RequestCtx, backend: &Backend) -> Result<Request<Body>, ProxyError> {
        let uri = Uri::builder()
            .scheme("http")
            .authority(backend.address.as_str())
            .path_and_query(ctx.request_uri())
            .build()?;
        let mut builder = Request::builder()
            .method(ctx.request.method().clone())
            .uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = ctx.request.headers().clone();
            for (name, value) in &self.header_upstream {
                headers.insert(name.clone(), value.clone());
            }
        }
        Ok(builder.body(Body::from(ctx.request.body().clone()))?)
    }

    /// Forward the request and buffer the backend response.
    pub async fn forward(&self, ctx: &mut RequestCtx) -> Result<Response<Body>, ProxyError> {
        let guard = self.pool.acquire().ok_or(ProxyError::Saturated)?;
        let request = self.outbound(ctx, &guard)?;

        tracing::debug!(
            request_id = ctx.request_id.as_deref().unwrap_or("-"),
            backend = %*guard,
            path = %ctx.path(),
            "Proxying request"
        );

        let round_trip = async {
            let response = self.client.request(request).await?;
            let (parts, body) = response.into_parts();
            let body: Bytes = body.collect().await?.to_bytes();
            Ok::<_, ProxyError>(Response::from_parts(parts, Body::from(body)))
        };

        let result = match tokio::time::timeout(self.timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::Timeout(self.timeout)),
        };

        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(ProxyError::Timeout(_)) => Outcome::Timeout,
            Err(_) => Outcome::Error,
        };
        metrics::record_upstream("proxy", &guard.address, outcome);
        result
    }

    /// Wrap `next` with this proxy.
    pub fn into_middleware(self) -> Middleware {
        let proxy = Arc::new(self);
        middleware(move |next| Arc::new(ProxyHandler { proxy, next }))
    }
}

struct ProxyHandler {
    proxy: Arc<ReverseProxy>,
    next: SharedHandler,
}

#[async_trait]
impl Handler for ProxyHandler {
    async fn handle(&self, ctx: &mut RequestCtx) {
        if !self.proxy.matches(ctx.path()) {
            self.next.handle(ctx).await;
            return;
        }

        match self.proxy.forward(ctx).await {
            Ok(mut response) => {
                for (name, value) in &self.proxy.header_downstream {
                    response.headers_mut().insert(name.clone(), value.clone());
                }
                ctx.response = response;
            }
            Err(e) => {
                tracing::warn!(
                    request_id = ctx.request_id.as_deref().unwrap_or("-"),
                    path = %ctx.path(),
                    error = %e,
                    "Proxy request failed"
                );
                ctx.error(e.status(), e.to_string());
            }
        }
    }
}
