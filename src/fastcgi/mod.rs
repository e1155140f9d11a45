//! FastCGI gateway subsystem.
//!
//! # Data Flow
//! ```text
//! Request (location matched)
//!     → rule.rs: split path → PathInfo, synthesize CGI environment
//!     → adapter.rs: round-robin backend pick
//!     → client.rs seam → wire.rs records over tcp / unix socket
//!     → CGI header block decoded, every header value copied
//!     → response (or 500 / 502 / 504 error text)
//! ```

pub mod adapter;
pub mod client;
pub mod rule;
pub mod wire;

pub use adapter::GatewayAdapter;
pub use client::{FcgiError, GatewayClient, GatewayRequest, GatewayResponse, GatewayVerb};
pub use rule::{header_to_env, CgiEnvironment, GatewayError, GatewayRule, PathInfo};
pub use wire::TokioFcgiClient;
