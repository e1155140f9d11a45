//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Config [[upstreams]]
//!     → upstream.rs (UpstreamRegistry, built once, read-only afterwards)
//!
//! Gateway adapter:
//!     upstream name → round_robin.rs (atomic counter, modulo backend count)
//!
//! Reverse proxy:
//!     backend list → least_conn.rs (fewest active connections, per-backend cap)
//!     → backend.rs (connection guard released on drop)
//! ```
//!
//! # Design Decisions
//! - The round-robin counter is the only shared mutable state in the core
//! - Upstreams are immutable snapshots passed by reference into constructors
//! - Connection caps are enforced with RAII guards

pub mod backend;
pub mod least_conn;
pub mod round_robin;
pub mod upstream;

pub use backend::{Backend, Transport};
pub use least_conn::LeastConnections;
pub use round_robin::RoundRobin;
pub use upstream::{Upstream, UpstreamRegistry};
