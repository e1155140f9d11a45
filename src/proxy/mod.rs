//! Reverse proxy subsystem.
//!
//! # Data Flow
//! ```text
//! Request (location matched)
//!     → header_upstream rewrite (overwrite)
//!     → LeastConnections pool picks a backend under its cap
//!     → hyper-util client round trip, bounded by timeout
//!     → header_downstream rewrite
//!     → response (or 504 / 503 error page)
//! ```

pub mod dispatcher;

pub use dispatcher::{ProxyError, ReverseProxy};
