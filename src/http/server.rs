//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router that hands every request to the compiled pipeline
//! - Wire up listener-level layers (tracing, timeout, concurrency, gzip)
//! - Buffer request bodies up to the configured limit
//! - Bind server to listener and drain on shutdown

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{
        connect_info::{ConnectInfo, Connected},
        State,
    },
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    serve::IncomingStream,
    Router,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    compression::{CompressionLayer, CompressionLevel},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::http::context::RequestCtx;
use crate::http::handler::SharedHandler;
use crate::observability::metrics;

/// Both ends of an accepted TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeConnection {
    pub remote: SocketAddr,
    /// Address the client actually reached; `None` if the socket could not report it.
    pub local: Option<SocketAddr>,
}

impl Connected<IncomingStream<'_, TcpListener>> for EdgeConnection {
    fn connect_info(stream: IncomingStream<'_, TcpListener>) -> Self {
        Self {
            remote: *stream.remote_addr(),
            local: stream.io().local_addr().ok(),
        }
    }
}

/// State injected into the dispatch handler.
#[derive(Clone)]
struct EdgeState {
    pipeline: SharedHandler,
    local_addr: SocketAddr,
    max_body: usize,
}

/// One listener serving one compiled pipeline.
pub struct HttpServer {
    pipeline: SharedHandler,
    config: ServerConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(pipeline: SharedHandler, config: ServerConfig) -> Self {
        Self { pipeline, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ServerConfig, state: EdgeState) -> Router {
        let router = Router::new().fallback(dispatch).with_state(state);
        let router = match &config.gzip {
            Some(gzip) => router.layer(
                CompressionLayer::new().quality(CompressionLevel::Precise(gzip.level as i32)),
            ),
            None => router,
        };
        router
            .layer(ConcurrencyLimitLayer::new(config.concurrency))
            .layer(TimeoutLayer::new(config.timeouts.request))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            server_name = %self.config.server_name,
            "HTTP server starting"
        );

        let state = EdgeState {
            pipeline: self.pipeline,
            local_addr: addr,
            max_body: self.config.max_request_body_size,
        };
        let app = Self::build_router(&self.config, state)
            .into_make_service_with_connect_info::<EdgeConnection>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!(address = %addr, "Draining connections");
            })
            .await?;

        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn declared_length(request: &Request<Body>) -> Option<usize> {
    request
        .headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Buffer the request and run it through the pipeline.
async fn dispatch(
    State(state): State<EdgeState>,
    ConnectInfo(conn): ConnectInfo<EdgeConnection>,
    request: Request<Body>,
) -> Response {
    let remote = conn.remote;
    let start = Instant::now();
    let method = request.method().as_str().to_string();

    if declared_length(&request).is_some_and(|len| len > state.max_body) {
        metrics::record_request(&method, 413, start);
        return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
    }

    let (parts, body) = request.into_parts();
    let body = match Limited::new(body, state.max_body).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let status = if e.downcast_ref::<LengthLimitError>().is_some() {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            };
            tracing::debug!(remote = %remote, error = %e, "Failed to read request body");
            metrics::record_request(&method, status.as_u16(), start);
            return (status, status.canonical_reason().unwrap_or("")).into_response();
        }
    };

    let mut ctx = RequestCtx::new(
        Request::from_parts(parts, body),
        remote.into(),
        conn.local.unwrap_or(state.local_addr).into(),
    );
    state.pipeline.handle(&mut ctx).await;

    metrics::record_request(&method, ctx.status().as_u16(), start);
    ctx.into_response()
}
