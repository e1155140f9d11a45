//! Pluggable HTTP edge: location matching, a compiled middleware pipeline,
//! reverse proxying and a FastCGI gateway.

pub mod config;
pub mod fastcgi;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod proxy;
pub mod routing;
pub mod template;

pub use config::schema::EdgeConfig;
pub use http::HttpServer;
pub use lifecycle::{Edge, Shutdown};
