//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration and build the upstream registry
//! - Compile one pipeline per listener
//! - Bind every listener, then serve them all until shutdown
//!
//! # Design Decisions
//! - Fail fast: any setup error is fatal and nothing is bound
//! - Listeners bind only after every pipeline compiled
//! - Directives register as generic middlewares in file order

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use futures_util::future::try_join_all;
use tokio::net::TcpListener;

use crate::config::{validate_config, ConfigError, Directive, EdgeConfig, ServerConfig};
use crate::fastcgi::GatewayAdapter;
use crate::http::handler::{Middleware, NotFound, SharedHandler};
use crate::http::middleware::{
    router_middleware, HeaderRule, InlineResponse, Rewriter, RouterFactory, StaticFiles,
    StatusRule,
};
use crate::http::pipeline::{PipelineConfig, Slot};
use crate::http::request::request_id_middleware;
use crate::http::server::HttpServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::load_balancer::UpstreamRegistry;
use crate::observability::access_log::access_log_middleware;
use crate::proxy::ReverseProxy;

fn directive_middleware(
    directive: &Directive,
    server: &ServerConfig,
    upstreams: &UpstreamRegistry,
) -> Result<Middleware, ConfigError> {
    Ok(match directive {
        Directive::Proxy(d) => ReverseProxy::build(d, upstreams)?.into_middleware(),
        Directive::Fastcgi(d) => GatewayAdapter::build(d, server, upstreams)?.into_middleware(),
        Directive::Header(d) => HeaderRule::build(d)?.into_middleware(),
        Directive::Rewrite(d) => Rewriter::from_directive(d)?.into_middleware(),
        Directive::Status(d) => StatusRule::build(d)?.into_middleware(),
        Directive::Response(d) => InlineResponse::build(d)?.into_middleware(),
        Directive::Static(d) => StaticFiles::build(d, &server.root).into_middleware(),
    })
}

/// Compile the handler chain for one listener.
pub fn build_pipeline(
    server: &ServerConfig,
    upstreams: &UpstreamRegistry,
    router: Option<&RouterFactory>,
) -> Result<SharedHandler, ConfigError> {
    let mut pipeline = PipelineConfig::new();

    if let Some(not_found) = &server.not_found {
        pipeline.set_not_found(NotFound::from_config(not_found)?);
    }

    for directive in &server.directives {
        pipeline.add_middleware(directive_middleware(directive, server, upstreams)?);
        tracing::debug!(server = %server.address, kind = directive.kind(), "Directive registered");
    }

    if let Some(config) = &server.request_id {
        pipeline.add_named_middleware(Slot::Identity, request_id_middleware(config)?);
    }
    if let Some(config) = &server.access_log {
        pipeline.add_named_middleware(Slot::AccessLog, access_log_middleware(config)?);
    }
    match (&server.router, router) {
        (Some(config), Some(factory)) => {
            let handler =
                factory(config).map_err(|e| ConfigError::Directive(format!("router: {e}")))?;
            pipeline.add_named_middleware(Slot::Router, router_middleware(handler));
        }
        (Some(_), None) => tracing::warn!(
            server = %server.address,
            "Router section present but no router factory installed"
        ),
        (None, _) => {}
    }

    tracing::debug!(server = %server.address, pipeline = ?pipeline, "Pipeline compiled");
    Ok(pipeline.compile())
}

/// Every configured listener with its compiled pipeline.
pub struct Edge {
    servers: Vec<(ServerConfig, SharedHandler)>,
}

impl Edge {
    /// Validate the config and compile every pipeline.
    pub fn from_config(
        config: &EdgeConfig,
        router: Option<RouterFactory>,
    ) -> Result<Self, ConfigError> {
        validate_config(config).map_err(ConfigError::Validation)?;
        let upstreams = UpstreamRegistry::from_config(&config.upstreams)?;
        tracing::info!(upstreams = upstreams.len(), "Upstream registry built");

        let servers = config
            .servers
            .iter()
            .map(|server| {
                let pipeline = build_pipeline(server, &upstreams, router.as_ref())?;
                Ok((server.clone(), pipeline))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { servers })
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Bind every listener. Nothing is served until [`BoundEdge::serve`].
    pub async fn bind(self) -> io::Result<BoundEdge> {
        let mut listeners = Vec::with_capacity(self.servers.len());
        for (config, pipeline) in self.servers {
            let listener = TcpListener::bind(&config.address).await?;
            tracing::info!(
                address = %listener.local_addr()?,
                server_name = %config.server_name,
                "Listener bound"
            );
            listeners.push((HttpServer::new(pipeline, config), listener));
        }
        Ok(BoundEdge { listeners })
    }
}

/// Listeners bound and ready to accept.
pub struct BoundEdge {
    listeners: Vec<(HttpServer, TcpListener)>,
}

impl BoundEdge {
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|(_, l)| l.local_addr().ok())
            .collect()
    }

    /// Serve every listener until `shutdown` triggers and all have drained.
    pub fn serve(self, shutdown: &Shutdown) -> impl Future<Output = io::Result<()>> + Send + 'static {
        let tasks: Vec<_> = self
            .listeners
            .into_iter()
            .map(|(server, listener)| server.run(listener, shutdown.subscribe()))
            .collect();
        async move {
            try_join_all(tasks).await?;
            Ok(())
        }
    }
}
